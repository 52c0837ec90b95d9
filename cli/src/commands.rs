use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use config::{AppConfig, GatewayKind};
use do_ecf_core::{FiscalDocument, InvoiceData, ServiceEnv};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracker::{BatchReport, LocalSignature, Tracker, TransitionResult};

#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    pub id: Option<String>,
    pub immediate_terms: bool,
    pub external_sequence: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GatewayUpdate {
    pub kind: Option<GatewayKind>,
    pub api_url: Option<String>,
    pub result_api_url: Option<String>,
    pub env: Option<ServiceEnv>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub id: String,
    pub ncf: String,
    pub document_type: String,
    pub state: String,
    pub tracking_id: Option<String>,
    pub security_code: Option<String>,
    pub expecting_payment: bool,
    pub last_error: Option<String>,
    pub updated_at: String,
}

/// Builds the document record for a posted invoice, applying company
/// settings.
fn prepare_document(
    mut invoice: InvoiceData,
    cfg: &AppConfig,
    options: PostOptions,
) -> (FiscalDocument, InvoiceData) {
    invoice.deferred_submission |= cfg.company.deferred_submissions;
    let immediate = options.immediate_terms && cfg.company.send_on_payment;
    let id = options.id.unwrap_or_else(|| invoice.ncf.clone());

    let mut doc = FiscalDocument::new(id, invoice.ncf.clone(), invoice.document_type, immediate);
    doc.is_internal_sequence = !options.external_sequence;
    (doc, invoice)
}

fn print_result(result: &TransitionResult) {
    match &result.connection_error {
        Some(err) => println!(
            "{}: {} -> {} (gateway unreachable: {err})",
            result.document_id, result.from, result.to
        ),
        None if result.changed() => {
            println!("{}: {} -> {}", result.document_id, result.from, result.to)
        }
        None => println!("{}: {} (unchanged)", result.document_id, result.to),
    }
}

fn print_report(what: &str, report: &BatchReport) {
    println!(
        "{what}: {} processed, {} changed, {} failed",
        report.processed,
        report.changed,
        report.failed.len()
    );
    for (id, err) in &report.failed {
        println!("  {id}: {err}");
    }
}

pub async fn post(
    tracker: &Tracker,
    cfg: &AppConfig,
    path: &Path,
    options: PostOptions,
) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read invoice {}", path.display()))?;
    let invoice: InvoiceData = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid invoice data in {}", path.display()))?;

    let (mut doc, invoice) = prepare_document(invoice, cfg, options);
    let result = tracker.on_posted(&mut doc, Some(&invoice)).await?;
    tracing::info!(document_id=%doc.id, path=%path.display(), "posted invoice");
    print_result(&result);
    if doc.expecting_payment() {
        println!("{}: waiting for payment", doc.id);
    }
    Ok(())
}

pub async fn pay(tracker: &Tracker, id: &str) -> Result<()> {
    let result = tracker.on_payment(id).await?;
    print_result(&result);
    Ok(())
}

pub async fn submit(tracker: &Tracker, id: &str) -> Result<()> {
    let mut doc = tracker.store().load(id)?;
    let result = tracker.submit(&mut doc).await?;
    print_result(&result);
    Ok(())
}

pub async fn poll(tracker: &Tracker, id: Option<&str>) -> Result<()> {
    match id {
        Some(id) => {
            let mut doc = tracker.store().load(id)?;
            let result = tracker.poll_status(&mut doc).await?;
            print_result(&result);
        }
        None => print_report("pending check", &tracker.check_pending().await?),
    }
    Ok(())
}

pub async fn resend_contingency(tracker: &Tracker) -> Result<()> {
    print_report("contingency resend", &tracker.resend_contingencies().await?);
    Ok(())
}

pub fn local_signature(
    security_code: String,
    tracking_id: Option<String>,
    signed_at: Option<String>,
) -> Result<LocalSignature> {
    let signed_at = match signed_at {
        Some(raw) => NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
            .with_context(|| format!("Invalid signature time {raw}"))?,
        None => Local::now().naive_local(),
    };
    Ok(LocalSignature {
        security_code,
        signed_at,
        tracking_id,
        signed_xml: None,
    })
}

pub async fn contingency(tracker: &Tracker, id: &str, signature: LocalSignature) -> Result<()> {
    let mut doc = tracker.store().load(id)?;
    let result = tracker.declare_contingency(&mut doc, signature).await?;
    print_result(&result);
    Ok(())
}

pub fn status(tracker: &Tracker) -> Result<()> {
    let statuses: Vec<DocumentStatus> = tracker
        .store()
        .list()?
        .into_iter()
        .map(|d| DocumentStatus {
            expecting_payment: d.expecting_payment(),
            id: d.id,
            ncf: d.ncf,
            document_type: d.document_type.to_string(),
            state: d.send_state.to_string(),
            tracking_id: d.tracking_id,
            security_code: d.security_code,
            last_error: d.last_error,
            updated_at: d.updated_at.to_rfc3339(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}

pub fn show_config(cfg: &AppConfig) -> Result<()> {
    println!("# {}", config::config_path()?.display());
    println!("{}", serde_json::to_string_pretty(cfg)?);
    let token = match config::access_token() {
        Some(_) => "set",
        None => "not set",
    };
    println!("# access token: {token}");
    Ok(())
}

pub fn set_token(token: &str) -> Result<()> {
    config::store_access_token(token)?;
    tracing::info!("Access token stored");
    Ok(())
}

fn apply_gateway_update(cfg: &mut AppConfig, update: GatewayUpdate) {
    if let Some(kind) = update.kind {
        cfg.gateway.kind = kind;
    }
    if let Some(url) = update.api_url {
        cfg.gateway.api_url = Some(url);
    }
    if let Some(url) = update.result_api_url {
        cfg.gateway.result_api_url = Some(url);
    }
    if let Some(env) = update.env {
        cfg.gateway.service_env = env;
    }
    if let Some(secs) = update.timeout_secs {
        cfg.gateway.request_timeout_secs = Some(secs);
    }
}

pub fn set_gateway(mut cfg: AppConfig, update: GatewayUpdate) -> Result<()> {
    apply_gateway_update(&mut cfg, update);
    config::store(&cfg)?;
    tracing::info!("Settings updated");
    Ok(())
}

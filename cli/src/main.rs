mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::{AppConfig, GatewayKind};
use do_ecf_core::ServiceEnv;
use gateway::{
    http::{HttpGatewayClient, HttpGatewaySettings},
    mock::MockGateway,
    GatewayClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker::{AuditLog, DocumentStore, StoredInvoiceBuilder, Tracker, TrackerError};

#[derive(Parser)]
#[command(name = "ecf")]
#[command(about = "Dominican e-CF submission tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a posted invoice and submit it unless it waits for payment
    Post {
        /// Invoice data as JSON
        invoice: PathBuf,

        /// Document id (defaults to the eNCF)
        #[arg(long)]
        id: Option<String>,

        /// Immediate payment terms: submission waits for the payment
        #[arg(long, default_value_t = false)]
        immediate_terms: bool,

        /// The eNCF was issued outside this system
        #[arg(long, default_value_t = false)]
        external_sequence: bool,
    },

    /// Register the payment of a document and submit it
    Pay { id: String },

    /// Submit (or resubmit) a document
    Submit { id: String },

    /// Poll pending documents for their DGII verdict
    Poll {
        /// Only this document
        #[arg(long)]
        id: Option<String>,
    },

    /// Resend every document signed during contingency
    ResendContingency,

    /// Declare a document signed locally while DGII is unreachable
    Contingency {
        id: String,

        #[arg(long)]
        security_code: String,

        #[arg(long)]
        tracking_id: Option<String>,

        /// Local signature time, `YYYY-MM-DD HH:MM:SS` (defaults to now)
        #[arg(long)]
        signed_at: Option<String>,
    },

    /// List documents and their submission state
    Status,

    /// Settings and secrets
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,

    /// Store the gateway access token in the OS keychain
    SetToken { token: String },

    /// Point the tracker at a gateway
    SetGateway {
        #[arg(long, value_enum)]
        kind: Option<GatewayArg>,

        #[arg(long)]
        api_url: Option<String>,

        #[arg(long)]
        result_api_url: Option<String>,

        #[arg(long, value_enum)]
        env: Option<EnvArg>,

        /// Request timeout in seconds, 0 for the transport default
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GatewayArg {
    Mock,
    Http,
}

impl From<GatewayArg> for GatewayKind {
    fn from(arg: GatewayArg) -> Self {
        match arg {
            GatewayArg::Mock => GatewayKind::Mock,
            GatewayArg::Http => GatewayKind::Http,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EnvArg {
    #[value(name = "TesteCF")]
    Test,
    #[value(name = "CerteCF")]
    Certification,
    #[value(name = "eCF")]
    Production,
}

impl From<EnvArg> for ServiceEnv {
    fn from(arg: EnvArg) -> Self {
        match arg {
            EnvArg::Test => ServiceEnv::Test,
            EnvArg::Certification => ServiceEnv::Certification,
            EnvArg::Production => ServiceEnv::Production,
        }
    }
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn create_gateway_client(cfg: &AppConfig) -> Result<Arc<dyn GatewayClient>> {
    match cfg.gateway.kind {
        GatewayKind::Http => {
            if let Some(missing) = cfg.gateway.missing_setting() {
                return Err(TrackerError::MissingConfiguration(missing.to_string()).into());
            }

            let access_token = config::access_token();
            if access_token.is_none() {
                tracing::warn!("No gateway access token in ECF_API_TOKEN or keychain");
            }

            tracing::info!(env=%cfg.gateway.service_env, "Using HTTP e-CF gateway");
            let client = HttpGatewayClient::new(HttpGatewaySettings {
                api_url: cfg.gateway.api_url.clone(),
                result_api_url: cfg.gateway.result_api_url.clone(),
                service_env: cfg.gateway.service_env,
                access_token,
                request_timeout: cfg.gateway.request_timeout(),
            })?;
            Ok(client)
        }
        GatewayKind::Mock => {
            tracing::info!("Using mock e-CF gateway");
            Ok(MockGateway::new())
        }
    }
}

fn build_tracker(cfg: &AppConfig) -> Result<Tracker> {
    let store = DocumentStore::open(&cfg.storage.path)
        .with_context(|| format!("Failed to open document store at {}", cfg.storage.path.display()))?;
    let audit = AuditLog::new(cfg.audit.path.clone());
    let gateway = create_gateway_client(cfg)?;

    Ok(Tracker::new(
        store.clone(),
        gateway,
        Arc::new(StoredInvoiceBuilder::new(store)),
        Arc::new(audit.clone()),
        Arc::new(audit.clone()),
    )
    .with_audit(audit))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load().unwrap_or_else(|e| {
        tracing::warn!(error=%e, "Falling back to default config");
        AppConfig::default()
    });

    match cli.cmd {
        Commands::Config { cmd } => match cmd {
            ConfigCmd::Show => commands::show_config(&cfg),
            ConfigCmd::SetToken { token } => commands::set_token(&token),
            ConfigCmd::SetGateway {
                kind,
                api_url,
                result_api_url,
                env,
                timeout_secs,
            } => commands::set_gateway(
                cfg,
                commands::GatewayUpdate {
                    kind: kind.map(Into::into),
                    api_url,
                    result_api_url,
                    env: env.map(Into::into),
                    timeout_secs,
                },
            ),
        },
        Commands::Post {
            invoice,
            id,
            immediate_terms,
            external_sequence,
        } => {
            let options = commands::PostOptions {
                id,
                immediate_terms,
                external_sequence,
            };
            commands::post(&build_tracker(&cfg)?, &cfg, &invoice, options).await
        }
        Commands::Pay { id } => commands::pay(&build_tracker(&cfg)?, &id).await,
        Commands::Submit { id } => commands::submit(&build_tracker(&cfg)?, &id).await,
        Commands::Poll { id } => commands::poll(&build_tracker(&cfg)?, id.as_deref()).await,
        Commands::ResendContingency => {
            commands::resend_contingency(&build_tracker(&cfg)?).await
        }
        Commands::Contingency {
            id,
            security_code,
            tracking_id,
            signed_at,
        } => {
            let signature = commands::local_signature(security_code, tracking_id, signed_at)?;
            commands::contingency(&build_tracker(&cfg)?, &id, signature).await
        }
        Commands::Status => commands::status(&build_tracker(&cfg)?),
    }
}

//! Seams towards the accounting side: payload assembly, remark logging and
//! cancellation of refused documents.

use crate::audit::{AuditEvent, AuditLog};
use crate::store::DocumentStore;
use async_trait::async_trait;
use chrono::Local;
use do_ecf_core::{EcfPayload, FiscalDocument, PayloadBody};

pub trait PayloadBuilder: Send + Sync {
    /// Errors are human readable validation messages.
    fn build(&self, doc: &FiscalDocument) -> Result<PayloadBody, Vec<String>>;
}

pub trait RemarkLog: Send + Sync {
    fn log_remark(&self, doc: &FiscalDocument, message: &str);
}

#[async_trait]
pub trait CancellationService: Send + Sync {
    async fn unreconcile_payments(&self, doc: &FiscalDocument) -> anyhow::Result<()>;
    async fn cancel_document(&self, doc: &FiscalDocument, reason: &str) -> anyhow::Result<()>;
}

/// Builds payloads from the invoice data stored alongside each document.
pub struct StoredInvoiceBuilder {
    store: DocumentStore,
}

impl StoredInvoiceBuilder {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }
}

impl PayloadBuilder for StoredInvoiceBuilder {
    fn build(&self, doc: &FiscalDocument) -> Result<PayloadBody, Vec<String>> {
        let invoice = match self.store.invoice(&doc.id) {
            Ok(Some(invoice)) => invoice,
            Ok(None) => return Err(vec![format!("no invoice data stored for {}", doc.id)]),
            Err(e) => return Err(vec![e.to_string()]),
        };
        if invoice.ncf != doc.ncf {
            return Err(vec![format!(
                "invoice data is for {} but the document carries {}",
                invoice.ncf, doc.ncf
            )]);
        }
        let signed_at = doc
            .signed_at
            .unwrap_or_else(|| Local::now().naive_local());
        EcfPayload::build(&invoice, signed_at)?
            .to_body()
            .map_err(|e| vec![e.to_string()])
    }
}

/// Remarks land in the audit trail next to the transition that produced
/// them.
impl RemarkLog for AuditLog {
    fn log_remark(&self, doc: &FiscalDocument, message: &str) {
        tracing::info!(document_id=%doc.id, ncf=%doc.ncf, remark=%message, "gateway remark");
        self.record(AuditEvent::for_document("gateway_remark", doc).with_message(message.to_string()));
    }
}

/// Standalone deployments have no ledger to reverse; the request is left in
/// the audit trail for the accounting team.
#[async_trait]
impl CancellationService for AuditLog {
    async fn unreconcile_payments(&self, doc: &FiscalDocument) -> anyhow::Result<()> {
        self.write(
            &AuditEvent::for_document("payments_unreconcile_requested", doc)
                .with_message(format!("unreconcile payments of {}", doc.ncf)),
        )
    }

    async fn cancel_document(&self, doc: &FiscalDocument, reason: &str) -> anyhow::Result<()> {
        tracing::warn!(document_id=%doc.id, ncf=%doc.ncf, reason=%reason, "e-CF refused, cancellation requested");
        self.write(
            &AuditEvent::for_document("cancellation_requested", doc).with_message(reason.to_string()),
        )
    }
}

use anyhow::Result;
use chrono::Utc;
use do_ecf_core::{FiscalDocument, SendState};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub document_id: String,
    pub ncf: Option<String>,
    pub from_state: Option<String>,
    pub state: String,
    pub tracking_id: Option<String>,
    pub payload_digest: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, document_id: &str, state: SendState) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            document_id: document_id.to_string(),
            ncf: None,
            from_state: None,
            state: state.to_string(),
            tracking_id: None,
            payload_digest: None,
            message: None,
            error: None,
        }
    }

    pub fn for_document(event_type: &str, doc: &FiscalDocument) -> Self {
        let mut event = Self::new(event_type, &doc.id, doc.send_state);
        event.ncf = Some(doc.ncf.clone());
        event.tracking_id = doc.tracking_id.clone().filter(|t| !t.trim().is_empty());
        event
    }

    pub fn with_from_state(mut self, from: SendState) -> Self {
        self.from_state = Some(from.to_string());
        self
    }

    pub fn with_digest(mut self, digest: Option<String>) -> Self {
        self.payload_digest = digest;
        self
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Append-only JSON-lines trail of every submission outcome.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, event: &AuditEvent) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(event_type=%event.event_type, document_id=%event.document_id, "Audit event written");
        Ok(())
    }

    /// Audit failures never abort a submission; they are logged instead.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(&event) {
            tracing::warn!(document_id=%event.document_id, error=%e, "audit write failed");
        }
    }
}

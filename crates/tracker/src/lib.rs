mod audit;
mod collaborators;
mod error;
pub mod state;
mod store;
mod tracker;

#[cfg(test)]
mod fixtures;

pub use audit::{AuditEvent, AuditLog};
pub use collaborators::{CancellationService, PayloadBuilder, RemarkLog, StoredInvoiceBuilder};
pub use error::{Result, TrackerError};
pub use store::DocumentStore;
pub use tracker::{BatchReport, LocalSignature, Tracker, TransitionResult};

pub mod digest;
pub mod invoice;
pub mod models;
pub mod payload;
pub mod validation;

pub use invoice::InvoiceData;
pub use models::{DocumentType, FiscalDocument, SendState, ServiceEnv};
pub use payload::{EcfPayload, PayloadBody};

use do_ecf_core::SendState;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("e-CF {document_id} was already delivered and accepted; resending it is not allowed")]
    AlreadyDelivered { document_id: String },

    #[error("e-CF {document_id} was refused by DGII and is being cancelled; issue a new document instead")]
    AlreadyRefused { document_id: String },

    #[error("e-CF {document_id} failed validation: {}", .messages.join("; "))]
    Validation {
        document_id: String,
        messages: Vec<String>,
    },

    #[error(
        "e-CF {document_id} could not be sent due to an external service issue ({detail}); \
         try again later or declare contingency"
    )]
    ServiceUnreachable { document_id: String, detail: String },

    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    #[error("e-CF {document_id} cannot leave {from} on {event}")]
    IllegalTransition {
        document_id: String,
        from: SendState,
        event: String,
    },

    #[error("cancellation of e-CF {document_id} failed: {reason}")]
    Cancellation { document_id: String, reason: String },

    #[error("document {0} not found")]
    NotFound(String),

    #[error("document {0} already exists")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

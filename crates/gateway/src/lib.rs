use async_trait::async_trait;
use do_ecf_core::PayloadBody;

pub mod http;
pub mod mock;
pub mod types;

pub use types::{GatewayReceipt, GatewayStatus, PollReply, SubmitReply};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("missing gateway configuration: {0}")]
    MissingConfiguration(&'static str),
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed gateway reply: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// Transport towards the e-CF signing/submission service.
///
/// Implementations classify HTTP outcomes into [`SubmitReply`] and
/// [`PollReply`]; they never decide document states.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn submit(&self, payload: &PayloadBody) -> Result<SubmitReply>;
    async fn status(&self, track_id: &str) -> Result<PollReply>;
}

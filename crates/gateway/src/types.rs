//! Wire types of the e-CF gateway.

use base64::prelude::*;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Verdicts the DGII hands back through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayStatus {
    Aceptado,
    AceptadoCondicional,
    EnProceso,
    Rechazado,
}

impl GatewayStatus {
    pub const ALL: [GatewayStatus; 4] = [
        GatewayStatus::Aceptado,
        GatewayStatus::AceptadoCondicional,
        GatewayStatus::EnProceso,
        GatewayStatus::Rechazado,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Aceptado => "Aceptado",
            GatewayStatus::AceptadoCondicional => "AceptadoCondicional",
            GatewayStatus::EnProceso => "EnProceso",
            GatewayStatus::Rechazado => "Rechazado",
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GatewayStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GatewayStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown gateway status: {s}"))
    }
}

/// Body of a successful (HTTP 200) submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayReceipt {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(rename = "trackId", default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub security_code: Option<String>,
    #[serde(default)]
    pub signature_datetime: Option<String>,
    /// Base64 encoded signed e-CF.
    #[serde(default)]
    pub xml: Option<String>,
    /// DGII sends `null` when there is nothing to say.
    #[serde(default)]
    pub messages: Option<Vec<Value>>,
}

impl GatewayReceipt {
    pub fn gateway_status(&self) -> Option<GatewayStatus> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }

    pub fn signed_at(&self) -> Option<NaiveDateTime> {
        self.signature_datetime
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
    }

    /// The signed document, when the gateway returned one and it decodes.
    pub fn signed_xml(&self) -> Option<String> {
        let encoded = self.xml.as_deref()?;
        let bytes = BASE64_STANDARD.decode(encoded.trim()).ok()?;
        String::from_utf8(bytes).ok()
    }

    pub fn remarks(&self) -> Vec<String> {
        render_messages(self.messages.as_deref().unwrap_or_default())
    }
}

/// Body of a status query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollReply {
    #[serde(default)]
    pub estado: Option<String>,
    #[serde(default)]
    pub mensajes: Option<Vec<Value>>,
}

impl PollReply {
    /// A missing `estado` means the authority has not decided yet.
    pub fn estado_or_pending(&self) -> &str {
        self.estado.as_deref().unwrap_or(GatewayStatus::EnProceso.as_str())
    }

    pub fn remarks(&self) -> Vec<String> {
        render_messages(self.mensajes.as_deref().unwrap_or_default())
    }
}

/// Classified outcome of a submission attempt.
#[derive(Debug, Clone)]
pub enum SubmitReply {
    /// The request never reached the gateway.
    ConnectionFailed(String),
    /// HTTP 200.
    Received(GatewayReceipt),
    /// HTTP 408: the gateway signed the document but could not reach DGII.
    AuthorityTimeout,
    /// HTTP 400: schema validation failed.
    SchemaRejected(Vec<String>),
    /// Any other HTTP status.
    Unexpected { status: u16, body: String },
}

/// Messages come either as plain strings or as `{codigo, valor}` objects.
fn render_messages(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => match (obj.get("codigo"), obj.get("valor")) {
                (Some(code), Some(Value::String(text))) => Some(format!("{code}: {text}")),
                (None, Some(Value::String(text))) => Some(text.clone()),
                _ => Some(m.to_string()),
            },
            other => Some(other.to_string()),
        })
        .collect()
}

/// Error body of a 400 reply: `{"messages": [...]}` or free text.
pub(crate) fn schema_messages(body: &str) -> Vec<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        messages: Option<Vec<Value>>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            messages: Some(messages),
        }) if !messages.is_empty() => render_messages(&messages),
        _ if body.trim().is_empty() => Vec::new(),
        _ => vec![body.trim().to_string()],
    }
}

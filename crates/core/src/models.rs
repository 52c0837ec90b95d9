use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Submission state of a fiscal document against the DGII gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    ToSend,
    SignedPending,
    DeliveredAccepted,
    ConditionallyAccepted,
    DeliveredRefused,
    DeliveredPending,
    Invalid,
    Contingency,
    NotSent,
    ServiceUnreachable,
}

impl SendState {
    pub const ALL: [SendState; 10] = [
        SendState::ToSend,
        SendState::SignedPending,
        SendState::DeliveredAccepted,
        SendState::ConditionallyAccepted,
        SendState::DeliveredRefused,
        SendState::DeliveredPending,
        SendState::Invalid,
        SendState::Contingency,
        SendState::NotSent,
        SendState::ServiceUnreachable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SendState::ToSend => "to_send",
            SendState::SignedPending => "signed_pending",
            SendState::DeliveredAccepted => "delivered_accepted",
            SendState::ConditionallyAccepted => "conditionally_accepted",
            SendState::DeliveredRefused => "delivered_refused",
            SendState::DeliveredPending => "delivered_pending",
            SendState::Invalid => "invalid",
            SendState::Contingency => "contingency",
            SendState::NotSent => "not_sent",
            SendState::ServiceUnreachable => "service_unreachable",
        }
    }

    /// Accepted by the tax authority, with or without conditions. Such a
    /// document must never be sent again.
    pub fn is_delivered(&self) -> bool {
        matches!(
            self,
            SendState::DeliveredAccepted | SendState::ConditionallyAccepted
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_delivered() || matches!(self, SendState::DeliveredRefused)
    }

    /// States whose final verdict is still owed by the gateway.
    pub fn awaits_verdict(&self) -> bool {
        matches!(self, SendState::DeliveredPending | SendState::SignedPending)
    }

    /// Failure states a later submit may recover from.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(
            self,
            SendState::Invalid
                | SendState::Contingency
                | SendState::NotSent
                | SendState::ServiceUnreachable
        )
    }

    /// States a submit may start from: never sent, signed without a DGII
    /// answer, or a retry-eligible failure.
    pub fn is_sendable(&self) -> bool {
        matches!(self, SendState::ToSend | SendState::SignedPending) || self.is_retry_eligible()
    }
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SendState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown send state: {s}"))
    }
}

/// Electronic receipt types (TipoeCF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// 31: Factura de Crédito Fiscal Electrónica
    #[serde(rename = "31")]
    CreditoFiscal,
    /// 32: Factura de Consumo Electrónica
    #[serde(rename = "32")]
    Consumo,
    /// 33: Nota de Débito Electrónica
    #[serde(rename = "33")]
    NotaDebito,
    /// 34: Nota de Crédito Electrónica
    #[serde(rename = "34")]
    NotaCredito,
    /// 41: Compras Electrónico
    #[serde(rename = "41")]
    Compras,
    /// 43: Gastos Menores Electrónico
    #[serde(rename = "43")]
    GastosMenores,
    /// 44: Regímenes Especiales Electrónica
    #[serde(rename = "44")]
    RegimenesEspeciales,
    /// 45: Gubernamental Electrónico
    #[serde(rename = "45")]
    Gubernamental,
    /// 46: Comprobante para Exportaciones Electrónico
    #[serde(rename = "46")]
    Exportaciones,
    /// 47: Comprobante para Pagos al Exterior Electrónico
    #[serde(rename = "47")]
    PagosExterior,
}

impl DocumentType {
    pub const ALL: [DocumentType; 10] = [
        DocumentType::CreditoFiscal,
        DocumentType::Consumo,
        DocumentType::NotaDebito,
        DocumentType::NotaCredito,
        DocumentType::Compras,
        DocumentType::GastosMenores,
        DocumentType::RegimenesEspeciales,
        DocumentType::Gubernamental,
        DocumentType::Exportaciones,
        DocumentType::PagosExterior,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::CreditoFiscal => "31",
            DocumentType::Consumo => "32",
            DocumentType::NotaDebito => "33",
            DocumentType::NotaCredito => "34",
            DocumentType::Compras => "41",
            DocumentType::GastosMenores => "43",
            DocumentType::RegimenesEspeciales => "44",
            DocumentType::Gubernamental => "45",
            DocumentType::Exportaciones => "46",
            DocumentType::PagosExterior => "47",
        }
    }

    pub fn is_debit_or_credit_note(&self) -> bool {
        matches!(self, DocumentType::NotaDebito | DocumentType::NotaCredito)
    }

    pub fn has_sequence_expiry(&self) -> bool {
        !matches!(self, DocumentType::Consumo | DocumentType::NotaCredito)
    }

    pub fn has_taxed_amount_indicator(&self) -> bool {
        !matches!(
            self,
            DocumentType::GastosMenores
                | DocumentType::RegimenesEspeciales
                | DocumentType::Exportaciones
        )
    }

    pub fn has_income_type(&self) -> bool {
        !matches!(
            self,
            DocumentType::Compras | DocumentType::GastosMenores | DocumentType::PagosExterior
        )
    }

    /// Payment table and payment term text are not reported on credit
    /// notes nor on minor expenses.
    pub fn reports_payment_detail(&self) -> bool {
        !matches!(self, DocumentType::NotaCredito | DocumentType::GastosMenores)
    }

    pub fn has_buyer_section(&self) -> bool {
        !matches!(self, DocumentType::GastosMenores)
    }

    pub fn identifies_buyer(&self) -> bool {
        !matches!(
            self,
            DocumentType::GastosMenores | DocumentType::PagosExterior
        )
    }

    /// Types for which the buyer tax id is always mandatory.
    pub fn requires_buyer_id(&self) -> bool {
        matches!(
            self,
            DocumentType::CreditoFiscal | DocumentType::Compras | DocumentType::Gubernamental
        )
    }

    pub fn carries_retention(&self) -> bool {
        matches!(self, DocumentType::Compras | DocumentType::PagosExterior)
    }

    pub fn reports_foreign_taxed_amounts(&self) -> bool {
        !matches!(
            self,
            DocumentType::GastosMenores
                | DocumentType::RegimenesEspeciales
                | DocumentType::PagosExterior
        )
    }

    pub fn reports_foreign_exempt_amount(&self) -> bool {
        !matches!(self, DocumentType::Exportaciones)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .into_iter()
            .find(|t| t.code() == s)
            .ok_or_else(|| format!("unknown e-CF type: {s}"))
    }
}

/// Gateway environment passed as the `env` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceEnv {
    #[default]
    #[serde(rename = "TesteCF")]
    Test,
    #[serde(rename = "CerteCF")]
    Certification,
    #[serde(rename = "eCF")]
    Production,
}

impl ServiceEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceEnv::Test => "TesteCF",
            ServiceEnv::Certification => "CerteCF",
            ServiceEnv::Production => "eCF",
        }
    }
}

impl fmt::Display for ServiceEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A posted fiscal document and its submission bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub id: String,
    pub ncf: String,
    pub document_type: DocumentType,
    pub send_state: SendState,
    pub tracking_id: Option<String>,
    pub security_code: Option<String>,
    pub signed_at: Option<NaiveDateTime>,
    pub signed_xml: Option<String>,
    pub is_internal_sequence: bool,
    pub payment_terms_immediate: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FiscalDocument {
    pub fn new(
        id: impl Into<String>,
        ncf: impl Into<String>,
        document_type: DocumentType,
        payment_terms_immediate: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            ncf: ncf.into(),
            document_type,
            send_state: SendState::ToSend,
            tracking_id: None,
            security_code: None,
            signed_at: None,
            signed_xml: None,
            is_internal_sequence: true,
            payment_terms_immediate,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_tracking_id(&self) -> bool {
        self.tracking_id
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Documents on immediate payment terms wait for the payment before
    /// being sent; everything else goes out when posted.
    pub fn sends_on_post(&self) -> bool {
        !self.payment_terms_immediate
    }

    pub fn expecting_payment(&self) -> bool {
        self.payment_terms_immediate && self.send_state == SendState::ToSend
    }
}

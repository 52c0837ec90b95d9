//! Accounting data an e-CF payload is assembled from.

use crate::models::DocumentType;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceData {
    pub document_type: DocumentType,
    /// Electronic fiscal number (eNCF).
    pub ncf: String,
    pub sequence_expiry: Option<NaiveDate>,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub payment_terms: PaymentTerms,
    pub income_type: Option<String>,
    #[serde(default)]
    pub deferred_submission: bool,
    pub issuer: Issuer,
    pub buyer: Option<Buyer>,
    pub lines: Vec<InvoiceLine>,
    /// Total in the invoice currency.
    pub amount_total: Decimal,
    /// Total in the company currency (DOP).
    pub amount_total_company: Decimal,
    /// ISO code when the invoice is not in the company currency.
    pub currency: Option<String>,
    #[serde(default)]
    pub payments: Vec<PaymentEntry>,
    pub reference: Option<Reference>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentTerms {
    #[default]
    None,
    Immediate,
    Credit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issuer {
    pub rnc: String,
    pub name: String,
    pub street: Option<String>,
    #[serde(default)]
    pub special_taxpayer: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buyer {
    pub vat: Option<String>,
    pub name: String,
    #[serde(default = "default_domestic")]
    pub domestic: bool,
}

fn default_domestic() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItbisRate {
    #[serde(rename = "18")]
    Standard,
    #[serde(rename = "16")]
    Reduced,
    #[serde(rename = "0")]
    Zero,
}

impl ItbisRate {
    pub fn percent(&self) -> Decimal {
        match self {
            ItbisRate::Standard => Decimal::from(18),
            ItbisRate::Reduced => Decimal::from(16),
            ItbisRate::Zero => Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub name: String,
    pub product_name: Option<String>,
    #[serde(default)]
    pub service: bool,
    pub quantity: Decimal,
    pub price_unit: Decimal,
    /// Discount percentage.
    #[serde(default)]
    pub discount: Decimal,
    /// Line amount after discount, untaxed, invoice currency.
    pub subtotal: Decimal,
    #[serde(default)]
    pub itbis: Vec<ItbisRate>,
    #[serde(default)]
    pub tax_included: bool,
    /// Withholdings, only reported on purchase (41) and foreign payment (47) receipts.
    #[serde(default)]
    pub withheld_itbis: Decimal,
    #[serde(default)]
    pub withheld_isr: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentForm {
    Cash,
    Bank,
    Card,
    Credit,
    GiftCertificate,
    Swap,
    CreditNote,
    Other,
}

impl PaymentForm {
    pub fn code(&self) -> &'static str {
        match self {
            PaymentForm::Cash => "01",
            PaymentForm::Bank => "02",
            PaymentForm::Card => "03",
            PaymentForm::Credit => "04",
            PaymentForm::GiftCertificate => "05",
            PaymentForm::Swap => "06",
            PaymentForm::CreditNote => "07",
            PaymentForm::Other => "08",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub form: PaymentForm,
    /// Company currency.
    pub amount: Decimal,
}

/// The document a debit or credit note modifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub ncf: String,
    pub issue_date: NaiveDate,
    pub modification_code: String,
    /// Total of the modified document in company currency.
    pub amount_total_company: Decimal,
}

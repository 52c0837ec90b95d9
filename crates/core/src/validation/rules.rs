use crate::invoice::InvoiceData;
use crate::models::DocumentType;
use crate::payload::BUYER_ID_THRESHOLD;
use rust_decimal::Decimal;

/// Largest amount or quantity accepted on an invoice. Together with
/// [`MAX_EXCHANGE_RATE`] it keeps every company-currency conversion within
/// `Decimal` range.
pub const MAX_AMOUNT: u64 = 10_000_000_000;
pub const MAX_EXCHANGE_RATE: u64 = 1_000_000;

/// RNC (9 digits) or Cédula (11 digits).
pub fn is_valid_rnc(vat: &str) -> bool {
    matches!(vat.len(), 9 | 11) && vat.chars().all(|c| c.is_ascii_digit())
}

/// eNCF: `E`, the two digit receipt type, then a 10 digit sequence.
pub fn is_valid_ecf_number(ncf: &str, doc_type: DocumentType) -> bool {
    ncf.len() == 13
        && ncf.starts_with('E')
        && ncf.get(1..3) == Some(doc_type.code())
        && ncf[3..].chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_security_code(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn format_checks(invoice: &InvoiceData) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();

    if !is_valid_ecf_number(&invoice.ncf, invoice.document_type) {
        errs.push(format!(
            "eNCF {} has an invalid format for e-CF type {}",
            invoice.ncf, invoice.document_type
        ));
    }

    if !is_valid_rnc(&invoice.issuer.rnc) {
        errs.push(format!("Issuer RNC {} is not a valid RNC/Cédula", invoice.issuer.rnc));
    }

    if let Some(buyer) = &invoice.buyer {
        if let Some(vat) = buyer.vat.as_deref().filter(|v| !v.is_empty()) {
            if buyer.domestic && !is_valid_rnc(vat) {
                errs.push(format!("Buyer RNC {vat} is not a valid RNC/Cédula"));
            }
        }
    }

    if let Some(code) = &invoice.currency {
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            errs.push(format!("Currency code {code} must be a 3 letter ISO 4217 code"));
        }
    }

    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

pub fn content_checks(invoice: &InvoiceData) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();
    let doc_type = invoice.document_type;

    if invoice.issuer.name.trim().is_empty() {
        errs.push("Issuer name is mandatory".to_string());
    }

    if invoice.lines.is_empty() {
        errs.push("At least one invoice line is required".to_string());
    }

    if doc_type.has_sequence_expiry() && invoice.sequence_expiry.is_none() {
        errs.push(format!(
            "Sequence expiry date is mandatory for e-CF type {doc_type}"
        ));
    }

    let buyer_vat = invoice
        .buyer
        .as_ref()
        .and_then(|b| b.vat.as_deref())
        .filter(|v| !v.trim().is_empty());
    let threshold = Decimal::from(BUYER_ID_THRESHOLD);
    let buyer_id_required = doc_type.requires_buyer_id()
        || (doc_type == DocumentType::Consumo && invoice.amount_total_company.abs() >= threshold)
        || (doc_type.is_debit_or_credit_note()
            && invoice
                .reference
                .as_ref()
                .is_some_and(|r| r.amount_total_company.abs() >= threshold));
    if buyer_id_required && buyer_vat.is_none() {
        errs.push(format!("Buyer tax id is mandatory for e-CF type {doc_type}"));
    }

    if doc_type.is_debit_or_credit_note() && invoice.reference.is_none() {
        errs.push(format!(
            "e-CF type {doc_type} must reference the modified document"
        ));
    }

    if invoice.amount_total.is_zero() && !invoice.amount_total_company.is_zero() {
        errs.push("Invoice total is zero but company total is not".to_string());
    }

    magnitude_checks(invoice, &mut errs);

    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

fn magnitude_checks(invoice: &InvoiceData, errs: &mut Vec<String>) {
    let limit = Decimal::from(MAX_AMOUNT);
    let mut amounts = vec![
        ("Invoice total".to_string(), invoice.amount_total),
        ("Company total".to_string(), invoice.amount_total_company),
    ];
    for (i, line) in invoice.lines.iter().enumerate() {
        let n = i + 1;
        amounts.extend([
            (format!("Line {n} quantity"), line.quantity),
            (format!("Line {n} unit price"), line.price_unit),
            (format!("Line {n} discount"), line.discount),
            (format!("Line {n} subtotal"), line.subtotal),
            (format!("Line {n} withheld ITBIS"), line.withheld_itbis),
            (format!("Line {n} withheld ISR"), line.withheld_isr),
        ]);
    }
    for (i, payment) in invoice.payments.iter().enumerate() {
        amounts.push((format!("Payment {} amount", i + 1), payment.amount));
    }
    if let Some(reference) = &invoice.reference {
        amounts.push((
            "Referenced document total".to_string(),
            reference.amount_total_company,
        ));
    }

    for (what, value) in amounts {
        if value.abs() > limit {
            errs.push(format!("{what} {value} exceeds the maximum of {limit}"));
        }
    }

    if invoice.currency.is_some() && !invoice.amount_total.is_zero() {
        let rate = invoice
            .amount_total_company
            .checked_div(invoice.amount_total)
            .map(|r| r.abs());
        if rate.map_or(true, |r| r > Decimal::from(MAX_EXCHANGE_RATE)) {
            errs.push(format!(
                "Exchange rate implied by the totals exceeds {MAX_EXCHANGE_RATE}"
            ));
        }
    }
}

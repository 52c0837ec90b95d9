mod rules;

pub use rules::{
    is_valid_ecf_number, is_valid_rnc, is_valid_security_code, MAX_AMOUNT, MAX_EXCHANGE_RATE,
};

use crate::invoice::InvoiceData;

pub fn validate(invoice: &InvoiceData) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();
    if let Err(mut fe) = rules::format_checks(invoice) {
        errs.append(&mut fe);
    }
    if let Err(mut ce) = rules::content_checks(invoice) {
        errs.append(&mut ce);
    }
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

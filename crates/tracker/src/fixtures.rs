use do_ecf_core::InvoiceData;
use serde_json::json;

pub(crate) fn consumer_invoice(ncf: &str) -> InvoiceData {
    serde_json::from_value(json!({
        "document_type": "32",
        "ncf": ncf,
        "issue_date": "2020-06-20",
        "income_type": "01",
        "issuer": {"rnc": "131793916", "name": "Indexa SRL", "street": "Calle 1"},
        "buyer": null,
        "lines": [{
            "name": "Servicio",
            "service": true,
            "quantity": 1,
            "price_unit": 100,
            "subtotal": 100,
            "itbis": ["18"]
        }],
        "amount_total": 118,
        "amount_total_company": 118
    }))
    .unwrap()
}

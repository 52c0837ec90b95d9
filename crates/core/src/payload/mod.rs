//! Typed e-CF payload assembly.
//!
//! Rules that depend on the receipt type are asked of [`DocumentType`]
//! rather than branched on raw codes, so each section builder reads as the
//! list of elements it may emit.

mod types;

pub use types::*;

use crate::digest::compute_sha256_hex;
use crate::invoice::{InvoiceData, InvoiceLine, ItbisRate, PaymentTerms};
use crate::models::DocumentType;
use crate::validation;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

const ECF_VERSION: &str = "1.0";
const ITEM_NAME_LIMIT: usize = 78;
/// Amount (DOP) from which a consumer invoice must identify its buyer.
pub const BUYER_ID_THRESHOLD: i64 = 250_000;

/// The exact JSON body sent to the gateway, with its digest for the audit
/// trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadBody {
    pub json: String,
    pub digest: String,
}

impl PayloadBody {
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(value)?;
        let digest = compute_sha256_hex(&json);
        Ok(Self { json, digest })
    }
}

impl EcfPayload {
    /// Validates the invoice and assembles its e-CF. `signed_at` only fills
    /// the placeholder signature time.
    pub fn build(invoice: &InvoiceData, signed_at: NaiveDateTime) -> Result<Self, Vec<String>> {
        validation::validate(invoice)?;

        let rate = exchange_rate(invoice);
        let totales = totales(invoice, rate);
        let otra_moneda = invoice
            .currency
            .as_ref()
            .map(|code| otra_moneda(invoice, code, rate, &totales));

        Ok(EcfPayload {
            ecf: Ecf {
                encabezado: Encabezado {
                    version: ECF_VERSION.to_string(),
                    id_doc: id_doc(invoice),
                    emisor: emisor(invoice),
                    comprador: comprador(invoice),
                    totales,
                    otra_moneda,
                },
                detalles_items: DetallesItems {
                    item: items(invoice, rate),
                },
                informacion_referencia: informacion_referencia(invoice),
                fecha_hora_firma: signed_at.format("%d-%m-%Y %H:%M:%S").to_string(),
                any: String::new(),
            },
        })
    }

    pub fn to_body(&self) -> Result<PayloadBody, serde_json::Error> {
        PayloadBody::from_serializable(self)
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

fn non_zero(value: Decimal) -> Option<Decimal> {
    (!value.is_zero()).then(|| round2(value).abs())
}

/// Company-currency units per invoice-currency unit (TipoCambio).
fn exchange_rate(invoice: &InvoiceData) -> Decimal {
    if invoice.currency.is_none() || invoice.amount_total.is_zero() {
        return Decimal::ONE;
    }
    round2((invoice.amount_total_company / invoice.amount_total).abs())
}

fn payment_type(invoice: &InvoiceData) -> u8 {
    match invoice.payment_terms {
        PaymentTerms::Credit => 2,
        PaymentTerms::Immediate => 1,
        PaymentTerms::None => match invoice.due_date {
            Some(due) if due > invoice.issue_date => 2,
            _ => 1,
        },
    }
}

fn id_doc(invoice: &InvoiceData) -> IdDoc {
    let doc_type = invoice.document_type;
    let tipo_pago = payment_type(invoice);

    let indicador_nota_credito = match (doc_type, &invoice.reference) {
        (DocumentType::NotaCredito, Some(reference)) => {
            let elapsed = (invoice.issue_date - reference.issue_date).num_days();
            Some(u8::from(elapsed > 30))
        }
        _ => None,
    };

    let indicador_monto_gravado = doc_type.has_taxed_amount_indicator().then(|| {
        u8::from(
            invoice
                .lines
                .iter()
                .any(|line| line.tax_included && !line.itbis.is_empty()),
        )
    });

    let tabla_formas_pago = (!invoice.payments.is_empty() && doc_type.reports_payment_detail())
        .then(|| TablaFormasPago {
            forma_de_pago: invoice
                .payments
                .iter()
                .map(|p| FormaDePago {
                    forma_pago: p.form.code().to_string(),
                    monto_pago: round2(p.amount).abs(),
                })
                .collect(),
        });

    let credit_due = invoice.due_date.filter(|_| tipo_pago == 2);

    IdDoc {
        tipo_ecf: doc_type.code().to_string(),
        encf: invoice.ncf.clone(),
        fecha_vencimiento_secuencia: invoice
            .sequence_expiry
            .filter(|_| doc_type.has_sequence_expiry())
            .map(format_date),
        indicador_nota_credito,
        indicador_envio_diferido: invoice.deferred_submission.then_some(1),
        indicador_monto_gravado,
        tipo_ingresos: doc_type.has_income_type().then(|| {
            invoice
                .income_type
                .clone()
                .unwrap_or_else(|| "01".to_string())
        }),
        tipo_pago,
        fecha_limite_pago: credit_due.map(format_date),
        termino_pago: credit_due
            .filter(|_| doc_type.reports_payment_detail())
            .map(|due| format!("{} días", (due - invoice.issue_date).num_days())),
        tabla_formas_pago,
    }
}

fn emisor(invoice: &InvoiceData) -> Emisor {
    Emisor {
        rnc_emisor: invoice.issuer.rnc.clone(),
        razon_social_emisor: invoice.issuer.name.clone(),
        nombre_comercial: "N/A".to_string(),
        sucursal: "N/A".to_string(),
        direccion_emisor: invoice.issuer.street.clone().unwrap_or_default(),
        fecha_emision: format_date(invoice.issue_date),
    }
}

fn comprador(invoice: &InvoiceData) -> Option<Comprador> {
    let doc_type = invoice.document_type;
    if !doc_type.has_buyer_section() {
        return None;
    }
    let mut section = Comprador::default();
    let Some(buyer) = invoice.buyer.as_ref().filter(|_| doc_type.identifies_buyer()) else {
        return Some(section);
    };

    let vat = buyer.vat.clone().filter(|v| !v.trim().is_empty());
    let large = invoice.amount_total_company.abs() >= Decimal::from(BUYER_ID_THRESHOLD);
    let identify = match doc_type {
        DocumentType::Consumo => vat.is_some() || large,
        DocumentType::NotaDebito | DocumentType::NotaCredito => vat.is_some(),
        _ => true,
    };

    if identify {
        if buyer.domestic {
            section.rnc_comprador = vat;
        } else {
            section.identificador_extranjero = vat;
        }
        section.razon_social_comprador = Some(buyer.name.clone());
    }
    Some(section)
}

#[derive(Default)]
struct TaxBucket {
    base: Decimal,
    amount: Decimal,
}

fn totales(invoice: &InvoiceData, rate: Decimal) -> Totales {
    let mut standard = TaxBucket::default();
    let mut reduced = TaxBucket::default();
    let mut zero = TaxBucket::default();
    let mut exempt = Decimal::ZERO;

    for line in &invoice.lines {
        let base = line.subtotal * rate;
        if line.itbis.is_empty() {
            exempt += base;
            continue;
        }
        for itbis in &line.itbis {
            let bucket = match itbis {
                ItbisRate::Standard => &mut standard,
                ItbisRate::Reduced => &mut reduced,
                ItbisRate::Zero => &mut zero,
            };
            bucket.base += base;
            bucket.amount += base * itbis.percent() / Decimal::ONE_HUNDRED;
        }
    }

    let total_taxed = standard.base + reduced.base + zero.base;
    let total_itbis = standard.amount + reduced.amount + zero.amount;
    let has = |bucket: &TaxBucket| !bucket.base.is_zero();

    Totales {
        monto_gravado_total: non_zero(total_taxed),
        monto_gravado_i1: non_zero(standard.base),
        monto_gravado_i2: non_zero(reduced.base),
        monto_gravado_i3: non_zero(zero.base),
        monto_exento: non_zero(exempt),
        itbis1: has(&standard).then_some(18),
        itbis2: has(&reduced).then_some(16),
        itbis3: has(&zero).then_some(0),
        total_itbis: (!total_taxed.is_zero()).then(|| round2(total_itbis).abs()),
        total_itbis1: has(&standard).then(|| round2(standard.amount).abs()),
        total_itbis2: has(&reduced).then(|| round2(reduced.amount).abs()),
        total_itbis3: has(&zero).then(|| round2(zero.amount).abs()),
        monto_total: round2(invoice.amount_total_company).abs(),
    }
}

fn otra_moneda(invoice: &InvoiceData, code: &str, rate: Decimal, totales: &Totales) -> OtraMoneda {
    let doc_type = invoice.document_type;
    let convert = |amount: Option<Decimal>| amount.and_then(|a| a.checked_div(rate)).map(round2);
    let taxed = |amount: Option<Decimal>| {
        if doc_type.reports_foreign_taxed_amounts() {
            convert(amount)
        } else {
            None
        }
    };

    OtraMoneda {
        tipo_moneda: code.to_string(),
        tipo_cambio: rate,
        monto_gravado_total: taxed(totales.monto_gravado_total),
        monto_gravado1: taxed(totales.monto_gravado_i1),
        monto_gravado2: taxed(totales.monto_gravado_i2),
        monto_gravado3: taxed(totales.monto_gravado_i3),
        monto_exento: if doc_type.reports_foreign_exempt_amount() {
            convert(totales.monto_exento)
        } else {
            None
        },
        total_itbis: taxed(totales.total_itbis),
        total_itbis1: taxed(totales.total_itbis1),
        total_itbis2: taxed(totales.total_itbis2),
        total_itbis3: taxed(totales.total_itbis3),
        monto_total: round2(invoice.amount_total).abs(),
    }
}

/// IndicadorFacturacion: 1 ITBIS 18% (or mixed), 2 ITBIS 16%, 3 other
/// taxes, 4 exempt or zero rated.
fn invoicing_indicator(line: &InvoiceLine) -> u8 {
    if line.itbis.is_empty() {
        return 4;
    }
    let mixed = line.itbis.iter().any(|r| *r != line.itbis[0]);
    if mixed || line.itbis.contains(&ItbisRate::Standard) {
        1
    } else if line.itbis.contains(&ItbisRate::Reduced) {
        2
    } else if line.itbis.contains(&ItbisRate::Zero) {
        4
    } else {
        3
    }
}

fn item_name(line: &InvoiceLine) -> String {
    let name = line.product_name.as_deref().unwrap_or(&line.name);
    if name.chars().count() > ITEM_NAME_LIMIT {
        let mut truncated: String = name.chars().take(ITEM_NAME_LIMIT).collect();
        truncated.push_str("..");
        truncated
    } else {
        name.to_string()
    }
}

fn items(invoice: &InvoiceData, rate: Decimal) -> Vec<Item> {
    let foreign = invoice.currency.is_some();

    invoice
        .lines
        .iter()
        .enumerate()
        .map(|(index, line)| {
            let discount_amount =
                round2(line.price_unit * line.quantity - line.subtotal).abs();
            let discounted = !line.discount.is_zero();

            Item {
                numero_linea: index as u32 + 1,
                indicador_facturacion: invoicing_indicator(line),
                retencion: invoice.document_type.carries_retention().then(|| Retencion {
                    indicador_agente: 1,
                    monto_itbis_retenido: round2(line.withheld_itbis * rate).abs(),
                    monto_isr_retenido: round2(line.withheld_isr * rate).abs(),
                }),
                nombre_item: item_name(line),
                indicador_bieno_servicio: if line.service { 2 } else { 1 },
                descripcion_item: line.name.clone(),
                cantidad_item: line.quantity,
                precio_unitario_item: round2(line.price_unit * rate).abs(),
                descuento_monto: discounted.then(|| round2(discount_amount * rate)),
                tabla_sub_descuento: discounted.then(|| TablaSubDescuento {
                    sub_descuento: vec![SubDescuento {
                        tipo_sub_descuento: "%".to_string(),
                        sub_descuento_porcentaje: line.discount,
                        monto_sub_descuento: round2(discount_amount * rate),
                    }],
                }),
                otra_moneda_detalle: foreign.then(|| OtraMonedaDetalle {
                    precio_otra_moneda: line.price_unit.abs(),
                    descuento_otra_moneda: discount_amount,
                    monto_item_otra_moneda: round2(line.subtotal).abs(),
                }),
                monto_item: round2(line.subtotal * rate).abs(),
            }
        })
        .collect()
}

fn informacion_referencia(invoice: &InvoiceData) -> Option<InformacionReferencia> {
    if !invoice.document_type.is_debit_or_credit_note() {
        return None;
    }
    invoice
        .reference
        .as_ref()
        .map(|reference| InformacionReferencia {
            ncf_modificado: reference.ncf.clone(),
            fecha_ncf_modificado: format_date(reference.issue_date),
            codigo_modificacion: reference.modification_code.clone(),
        })
}

//! e-CF document sections.
//!
//! Field order in every struct follows the DGII e-CF schema; serde keeps
//! declaration order when serializing, so the JSON sent to the gateway has
//! the same key order. Optional elements are skipped instead of sent as
//! `null`.

use rust_decimal::Decimal;
use serde::Serialize;

/// Root wrapper: `{"ECF": {...}}`.
#[derive(Debug, Clone, Serialize)]
pub struct EcfPayload {
    #[serde(rename = "ECF")]
    pub ecf: Ecf,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ecf {
    pub encabezado: Encabezado,
    pub detalles_items: DetallesItems,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub informacion_referencia: Option<InformacionReferencia>,
    /// Placeholder; the signing service stamps the real time.
    pub fecha_hora_firma: String,
    #[serde(rename = "_ANY_")]
    pub any: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Encabezado {
    pub version: String,
    pub id_doc: IdDoc,
    pub emisor: Emisor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comprador: Option<Comprador>,
    pub totales: Totales,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otra_moneda: Option<OtraMoneda>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdDoc {
    #[serde(rename = "TipoeCF")]
    pub tipo_ecf: String,
    #[serde(rename = "eNCF")]
    pub encf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_vencimiento_secuencia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicador_nota_credito: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicador_envio_diferido: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicador_monto_gravado: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tipo_ingresos: Option<String>,
    pub tipo_pago: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_limite_pago: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termino_pago: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabla_formas_pago: Option<TablaFormasPago>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablaFormasPago {
    #[serde(rename = "FormaDePago")]
    pub forma_de_pago: Vec<FormaDePago>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FormaDePago {
    pub forma_pago: String,
    pub monto_pago: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Emisor {
    #[serde(rename = "RNCEmisor")]
    pub rnc_emisor: String,
    pub razon_social_emisor: String,
    pub nombre_comercial: String,
    pub sucursal: String,
    pub direccion_emisor: String,
    pub fecha_emision: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Comprador {
    #[serde(rename = "RNCComprador", skip_serializing_if = "Option::is_none")]
    pub rnc_comprador: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identificador_extranjero: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub razon_social_comprador: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Totales {
    #[serde(rename = "MontoGravadoTotal", skip_serializing_if = "Option::is_none")]
    pub monto_gravado_total: Option<Decimal>,
    #[serde(rename = "MontoGravadoI1", skip_serializing_if = "Option::is_none")]
    pub monto_gravado_i1: Option<Decimal>,
    #[serde(rename = "MontoGravadoI2", skip_serializing_if = "Option::is_none")]
    pub monto_gravado_i2: Option<Decimal>,
    #[serde(rename = "MontoGravadoI3", skip_serializing_if = "Option::is_none")]
    pub monto_gravado_i3: Option<Decimal>,
    #[serde(rename = "MontoExento", skip_serializing_if = "Option::is_none")]
    pub monto_exento: Option<Decimal>,
    #[serde(rename = "ITBIS1", skip_serializing_if = "Option::is_none")]
    pub itbis1: Option<u8>,
    #[serde(rename = "ITBIS2", skip_serializing_if = "Option::is_none")]
    pub itbis2: Option<u8>,
    #[serde(rename = "ITBIS3", skip_serializing_if = "Option::is_none")]
    pub itbis3: Option<u8>,
    #[serde(rename = "TotalITBIS", skip_serializing_if = "Option::is_none")]
    pub total_itbis: Option<Decimal>,
    #[serde(rename = "TotalITBIS1", skip_serializing_if = "Option::is_none")]
    pub total_itbis1: Option<Decimal>,
    #[serde(rename = "TotalITBIS2", skip_serializing_if = "Option::is_none")]
    pub total_itbis2: Option<Decimal>,
    #[serde(rename = "TotalITBIS3", skip_serializing_if = "Option::is_none")]
    pub total_itbis3: Option<Decimal>,
    #[serde(rename = "MontoTotal")]
    pub monto_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtraMoneda {
    #[serde(rename = "TipoMoneda")]
    pub tipo_moneda: String,
    #[serde(rename = "TipoCambio")]
    pub tipo_cambio: Decimal,
    #[serde(
        rename = "MontoGravadoTotalOtraMoneda",
        skip_serializing_if = "Option::is_none"
    )]
    pub monto_gravado_total: Option<Decimal>,
    #[serde(rename = "MontoGravado1OtraMoneda", skip_serializing_if = "Option::is_none")]
    pub monto_gravado1: Option<Decimal>,
    #[serde(rename = "MontoGravado2OtraMoneda", skip_serializing_if = "Option::is_none")]
    pub monto_gravado2: Option<Decimal>,
    #[serde(rename = "MontoGravado3OtraMoneda", skip_serializing_if = "Option::is_none")]
    pub monto_gravado3: Option<Decimal>,
    #[serde(rename = "MontoExentoOtraMoneda", skip_serializing_if = "Option::is_none")]
    pub monto_exento: Option<Decimal>,
    #[serde(rename = "TotalITBISOtraMoneda", skip_serializing_if = "Option::is_none")]
    pub total_itbis: Option<Decimal>,
    #[serde(rename = "TotalITBIS1OtraMoneda", skip_serializing_if = "Option::is_none")]
    pub total_itbis1: Option<Decimal>,
    #[serde(rename = "TotalITBIS2OtraMoneda", skip_serializing_if = "Option::is_none")]
    pub total_itbis2: Option<Decimal>,
    #[serde(rename = "TotalITBIS3OtraMoneda", skip_serializing_if = "Option::is_none")]
    pub total_itbis3: Option<Decimal>,
    #[serde(rename = "MontoTotalOtraMoneda")]
    pub monto_total: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetallesItems {
    #[serde(rename = "Item")]
    pub item: Vec<Item>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Item {
    pub numero_linea: u32,
    pub indicador_facturacion: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retencion: Option<Retencion>,
    pub nombre_item: String,
    pub indicador_bieno_servicio: u8,
    pub descripcion_item: String,
    pub cantidad_item: Decimal,
    pub precio_unitario_item: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descuento_monto: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tabla_sub_descuento: Option<TablaSubDescuento>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otra_moneda_detalle: Option<OtraMonedaDetalle>,
    pub monto_item: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Retencion {
    #[serde(rename = "IndicadorAgenteRetencionoPercepcion")]
    pub indicador_agente: u8,
    #[serde(rename = "MontoITBISRetenido")]
    pub monto_itbis_retenido: Decimal,
    #[serde(rename = "MontoISRRetenido")]
    pub monto_isr_retenido: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TablaSubDescuento {
    #[serde(rename = "SubDescuento")]
    pub sub_descuento: Vec<SubDescuento>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubDescuento {
    pub tipo_sub_descuento: String,
    pub sub_descuento_porcentaje: Decimal,
    pub monto_sub_descuento: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OtraMonedaDetalle {
    pub precio_otra_moneda: Decimal,
    pub descuento_otra_moneda: Decimal,
    pub monto_item_otra_moneda: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct InformacionReferencia {
    #[serde(rename = "NCFModificado")]
    pub ncf_modificado: String,
    #[serde(rename = "FechaNCFModificado")]
    pub fecha_ncf_modificado: String,
    #[serde(rename = "CodigoModificacion")]
    pub codigo_modificacion: String,
}

//! Exportación del registro ambiental a JSON y CSV.

use anyhow::{Context, Result};

use crate::models::EnvironmentalRecord;

pub fn to_json_pretty(record: &EnvironmentalRecord) -> Result<String> {
    serde_json::to_string_pretty(record).context("No se pudo serializar el registro")
}

pub fn from_json(raw: &str) -> Result<EnvironmentalRecord> {
    serde_json::from_str(raw).context("JSON de registro inválido")
}

/// Filas clave/valor, una métrica por línea y sin cabecera.
pub fn to_csv(record: &EnvironmentalRecord) -> Result<String> {
    let rows: [(&str, String); 12] = [
        ("Location", record.location.clone()),
        ("Latitude", record.coordinates.latitude.to_string()),
        ("Longitude", record.coordinates.longitude.to_string()),
        ("Avg Temperature (°C)", record.weather.avg_temperature_c.to_string()),
        ("Avg Humidity (%)", record.weather.avg_humidity_pct.to_string()),
        ("Previous Year Rainfall (mm)", record.weather.prev_year_rainfall_mm.to_string()),
        ("Avg Annual Rainfall (mm)", record.weather.avg_annual_rainfall_mm.to_string()),
        ("pH", record.soil.ph.to_string()),
        ("Nitrogen (mg/kg)", record.soil.nitrogen_mg_kg.to_string()),
        ("Phosphorus (mg/kg)", record.soil.phosphorus_mg_kg.to_string()),
        ("Potassium (mg/kg)", record.soil.potassium_mg_kg.to_string()),
        (
            "Soil Type",
            record.soil.soil_type.map(|t| t.to_string()).unwrap_or_default(),
        ),
    ];

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    for (key, value) in &rows {
        writer.write_record([*key, value.as_str()])?;
    }
    let bytes = writer.into_inner().context("No se pudo vaciar el escritor CSV")?;
    String::from_utf8(bytes).context("CSV no UTF-8")
}

/// Nombre de fichero sugerido: `<ubicación>_environmental_data.<ext>`.
pub fn file_name(record: &EnvironmentalRecord, extension: &str) -> String {
    let stem: String = record
        .location
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    format!("{stem}_environmental_data.{extension}")
}

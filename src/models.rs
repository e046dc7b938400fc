//! Modelos de dominio: coordenadas, resumen climático, resumen de suelo y el
//! registro agregado que el cliente va rellenando.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Redondea a 2 decimales con la misma regla que `Math.round` (mitades hacia +∞).
pub fn round2(value: f64) -> f64 {
    ((value * 100.0) + 0.5).floor() / 100.0
}

/// Resultado de geocodificar un nombre de lugar. Inmutable una vez emitido.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoResult {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    /// `[sur, norte, oeste, este]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<[f64; 4]>,
    /// Contorno GeoJSON del lugar, tal cual lo devuelve el geocodificador.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<serde_json::Value>,
}

/// Resumen de cinco años de datos diarios.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSummary {
    pub avg_temperature_c: f64,
    pub avg_humidity_pct: f64,
    pub prev_year_rainfall_mm: f64,
    pub avg_annual_rainfall_mm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoilType {
    Clay,
    Loamy,
    Silty,
    Sandy,
}

impl SoilType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clay => "Clay",
            Self::Loamy => "Loamy",
            Self::Silty => "Silty",
            Self::Sandy => "Sandy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Clay" => Some(Self::Clay),
            "Loamy" => Some(Self::Loamy),
            "Silty" => Some(Self::Silty),
            "Sandy" => Some(Self::Sandy),
            _ => None,
        }
    }
}

impl fmt::Display for SoilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimación de pH y NPK. Siempre se recalcula a partir de sus entradas.
///
/// `soil_type` es `None` sólo en el registro de cliente antes de recibir el
/// evento correspondiente; los modelos de suelo siempre lo rellenan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoilSummary {
    pub ph: f64,
    pub nitrogen_mg_kg: f64,
    pub phosphorus_mg_kg: f64,
    pub potassium_mg_kg: f64,
    pub soil_type: Option<SoilType>,
}

/// Registro que el cliente construye evento a evento.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentalRecord {
    pub location: String,
    pub coordinates: GeoResult,
    pub weather: WeatherSummary,
    pub soil: SoilSummary,
}

impl EnvironmentalRecord {
    /// Registro vacío (todo a cero) con el texto buscado como nombre provisional.
    pub fn placeholder(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Self::default()
        }
    }
}

/// Cuerpo de `POST /api/environmental-data`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationQuery {
    #[serde(default)]
    pub location: Option<String>,
}

impl LocationQuery {
    /// Texto recortado, o `None` si falta o está vacío.
    pub fn normalized(&self) -> Option<&str> {
        self.location
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_matches_half_up_rounding() {
        assert_eq!(round2(25.304), 25.3);
        assert_eq!(round2(1.005 + 1e-9), 1.01);
        assert_eq!(round2(-2.5e-3), 0.0);
        assert_eq!(round2(0.0), 0.0);
    }

    #[test]
    fn location_query_rejects_blank_input() {
        let q = LocationQuery { location: Some("   ".into()) };
        assert_eq!(q.normalized(), None);
        let q = LocationQuery { location: None };
        assert_eq!(q.normalized(), None);
        let q = LocationQuery { location: Some("  Pune ".into()) };
        assert_eq!(q.normalized(), Some("Pune"));
    }

    #[test]
    fn placeholder_record_is_all_zero() {
        let rec = EnvironmentalRecord::placeholder("Nagpur");
        assert_eq!(rec.location, "Nagpur");
        assert_eq!(rec.weather, WeatherSummary::default());
        assert_eq!(rec.soil.soil_type, None);
        assert_eq!(rec.coordinates.latitude, 0.0);
    }

    #[test]
    fn records_use_camel_case_on_the_wire() {
        let rec = EnvironmentalRecord::placeholder("Agra");
        let json = serde_json::to_value(&rec).unwrap();
        assert!(json["weather"].get("avgTemperatureC").is_some());
        assert!(json["soil"].get("nitrogenMgKg").is_some());
        assert!(json["coordinates"].get("displayName").is_some());
        assert!(json["coordinates"].get("boundingBox").is_none());
    }
}

//! Protocolo de eventos SSE entre el orquestador y el cliente.
//!
//! Cada registro en el cable tiene la forma `event: <tipo>\ndata: <json>\n\n`.
//! La granularidad (un evento por métrica) forma parte del contrato.

use axum::response::sse::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::{ErrorKind, PipelineError},
    models::{GeoResult, SoilSummary, WeatherSummary},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusStage {
    Geocoding,
    Weather,
    Soil,
}

impl StatusStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Geocoding => "geocoding",
            Self::Weather => "weather",
            Self::Soil => "soil",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub stage: StatusStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatesPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon: Option<serde_json::Value>,
}

impl From<&GeoResult> for CoordinatesPayload {
    fn from(geo: &GeoResult) -> Self {
        Self {
            latitude: geo.latitude,
            longitude: geo.longitude,
            location: geo.display_name.clone(),
            bounding_box: geo.bounding_box,
            polygon: geo.polygon.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeatherMetric {
    #[serde(rename = "temperature")]
    Temperature,
    #[serde(rename = "humidity")]
    Humidity,
    #[serde(rename = "prevRainfall")]
    PrevRainfall,
    #[serde(rename = "avgRainfall")]
    AvgRainfall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilMetric {
    Type,
    Ph,
    Nitrogen,
    Phosphorus,
    Potassium,
}

/// Valor de una métrica: numérico salvo el tipo de suelo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload<M> {
    pub metric: M,
    pub value: MetricValue,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletePayload {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    /// Ausente en servidores que sólo envían el mensaje.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl From<&PipelineError> for ErrorPayload {
    fn from(err: &PipelineError) -> Self {
        Self {
            error: err.to_string(),
            kind: Some(err.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Status(StatusPayload),
    Coordinates(CoordinatesPayload),
    Weather(MetricPayload<WeatherMetric>),
    Soil(MetricPayload<SoilMetric>),
    Complete(CompletePayload),
    Error(ErrorPayload),
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("tipo de evento desconocido: {0}")]
    UnknownEvent(String),
    #[error("payload inválido para el evento '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineEvent {
    pub fn status(stage: StatusStage, message: &str) -> Self {
        Self::Status(StatusPayload {
            stage,
            message: message.to_string(),
        })
    }

    pub fn complete_now() -> Self {
        Self::Complete(CompletePayload {
            message: "Analysis complete".to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Nombre del campo `event:` en el cable.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::Coordinates(_) => "coordinates",
            Self::Weather(_) => "weather",
            Self::Soil(_) => "soil",
            Self::Complete(_) => "complete",
            Self::Error(_) => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_) | Self::Error(_))
    }

    /// JSON compacto del campo `data:` (sin saltos de línea).
    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            Self::Status(p) => serde_json::to_string(p),
            Self::Coordinates(p) => serde_json::to_string(p),
            Self::Weather(p) => serde_json::to_string(p),
            Self::Soil(p) => serde_json::to_string(p),
            Self::Complete(p) => serde_json::to_string(p),
            Self::Error(p) => serde_json::to_string(p),
        }
    }

    /// Registro SSE completo, terminado en la línea en blanco.
    #[cfg(test)]
    pub fn encode(&self) -> serde_json::Result<String> {
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), self.payload_json()?))
    }

    pub fn to_sse(&self) -> Result<Event, axum::Error> {
        let data = self.payload_json().map_err(axum::Error::new)?;
        Ok(Event::default().event(self.name()).data(data))
    }

    /// Reconstruye un evento a partir de los campos `event:` y `data:`.
    pub fn parse(name: &str, data: &str) -> Result<Self, EventParseError> {
        fn payload<T: serde::de::DeserializeOwned>(
            name: &str,
            data: &str,
        ) -> Result<T, EventParseError> {
            serde_json::from_str(data).map_err(|source| EventParseError::InvalidPayload {
                event: name.to_string(),
                source,
            })
        }

        match name {
            "status" => payload(name, data).map(Self::Status),
            "coordinates" => payload(name, data).map(Self::Coordinates),
            "weather" => payload(name, data).map(Self::Weather),
            "soil" => payload(name, data).map(Self::Soil),
            "complete" => payload(name, data).map(Self::Complete),
            "error" => payload(name, data).map(Self::Error),
            other => Err(EventParseError::UnknownEvent(other.to_string())),
        }
    }
}

fn metric<M>(metric: M, value: MetricValue, label: &str, unit: Option<&str>) -> MetricPayload<M> {
    MetricPayload {
        metric,
        value,
        label: label.to_string(),
        unit: unit.map(str::to_string),
    }
}

/// Los cuatro eventos `weather`, en el orden del contrato.
pub fn weather_events(summary: &WeatherSummary) -> Vec<PipelineEvent> {
    use MetricValue::Number;
    vec![
        metric(WeatherMetric::Temperature, Number(summary.avg_temperature_c), "Average Temperature", Some("°C")),
        metric(WeatherMetric::Humidity, Number(summary.avg_humidity_pct), "Average Humidity", Some("%")),
        metric(WeatherMetric::PrevRainfall, Number(summary.prev_year_rainfall_mm), "Previous Year Total Rainfall", Some("mm")),
        metric(WeatherMetric::AvgRainfall, Number(summary.avg_annual_rainfall_mm), "Average Annual Rainfall", Some("mm")),
    ]
    .into_iter()
    .map(PipelineEvent::Weather)
    .collect()
}

/// Los cinco eventos `soil`, en el orden del contrato.
pub fn soil_events(summary: &SoilSummary) -> Vec<PipelineEvent> {
    use MetricValue::{Number, Text};
    let soil_type = summary
        .soil_type
        .map(|t| t.as_str().to_string())
        .unwrap_or_default();
    vec![
        metric(SoilMetric::Type, Text(soil_type), "Soil Type", None),
        metric(SoilMetric::Ph, Number(summary.ph), "pH", None),
        metric(SoilMetric::Nitrogen, Number(summary.nitrogen_mg_kg), "Nitrogen (N)", Some("mg/kg")),
        metric(SoilMetric::Phosphorus, Number(summary.phosphorus_mg_kg), "Phosphorus (P)", Some("mg/kg")),
        metric(SoilMetric::Potassium, Number(summary.potassium_mg_kg), "Potassium (K)", Some("mg/kg")),
    ]
    .into_iter()
    .map(PipelineEvent::Soil)
    .collect()
}

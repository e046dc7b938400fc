//! Taxonomía de errores del pipeline (geocodificación y clima).
//!
//! En el cable todos acaban como un evento `error` con un mensaje; el campo
//! `kind` permite al cliente distinguirlos sin parsear texto.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// El geocodificador respondió sin candidatos o con un estado no-200.
    #[error("{0}")]
    LocationNotFound(String),

    /// El archivo meteorológico respondió con un estado no-200.
    #[error("{0}")]
    WeatherFetchFailed(String),

    /// Fallo de red (conexión, timeout, TLS...).
    #[error("{0}")]
    TransportFailure(String),

    /// La respuesta llegó pero no tiene la forma esperada.
    #[error("{0}")]
    MalformedUpstreamResponse(String),
}

/// Etiqueta serializada en el campo `kind` del evento `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LocationNotFound,
    TransportFailure,
    MalformedUpstreamResponse,
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LocationNotFound(_) => ErrorKind::LocationNotFound,
            // Un no-200 del archivo meteorológico es un fallo de transporte.
            Self::WeatherFetchFailed(_) | Self::TransportFailure(_) => ErrorKind::TransportFailure,
            Self::MalformedUpstreamResponse(_) => ErrorKind::MalformedUpstreamResponse,
        }
    }

    /// Clasifica un error de `reqwest` ocurrido antes de tener respuesta.
    pub fn from_transport(service: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::TransportFailure(format!("{service} request timed out"))
        } else {
            Self::TransportFailure(format!("{service} request failed: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weather_failures_are_reported_as_transport_kind() {
        let err = PipelineError::WeatherFetchFailed("Failed to fetch weather data".into());
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(err.to_string(), "Failed to fetch weather data");
    }

    #[test]
    fn kind_tags_are_snake_case() {
        let json = serde_json::to_string(&ErrorKind::MalformedUpstreamResponse).unwrap();
        assert_eq!(json, "\"malformed_upstream_response\"");
        let kind: ErrorKind = serde_json::from_str("\"location_not_found\"").unwrap();
        assert_eq!(kind, ErrorKind::LocationNotFound);
    }
}

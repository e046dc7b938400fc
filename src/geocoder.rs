//! Cliente de geocodificación (API compatible con Nominatim).
//!
//! Una única petición, sin caché ni reintentos: gana el primer resultado.

use reqwest::header::USER_AGENT;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{error::PipelineError, models::GeoResult};

/// Candidato tal y como lo devuelve `/search?format=json`.
/// Nominatim entrega `lat`, `lon` y `boundingbox` como cadenas.
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    boundingbox: Option<Vec<String>>,
    #[serde(default)]
    geojson: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct Geocoder {
    http: reqwest::Client,
    endpoint: String,
    user_agent: String,
}

impl Geocoder {
    pub fn new(http: reqwest::Client, endpoint: &str, user_agent: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// Resuelve `query` a coordenadas.
    ///
    /// Un estado no-200 o una lista vacía se reportan como
    /// `LocationNotFound`; los fallos de red como `TransportFailure`.
    pub async fn locate(&self, query: &str) -> Result<GeoResult, PipelineError> {
        let not_found = || PipelineError::LocationNotFound(format!("Could not find coordinates for {query}"));

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("polygon_geojson", "1"),
            ])
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .map_err(|e| PipelineError::from_transport("Geocoding", &e))?;

        if !response.status().is_success() {
            warn!("Geocodificación fallida para '{query}': estado {}", response.status());
            return Err(not_found());
        }

        let places: Vec<Place> = response.json().await.map_err(|e| {
            PipelineError::MalformedUpstreamResponse(format!("Unexpected geocoding response: {e}"))
        })?;

        let place = places.into_iter().next().ok_or_else(not_found)?;
        debug!("Geocodificador devolvió: {:?}", place.display_name);
        place_to_geo(place, query)
    }
}

fn place_to_geo(place: Place, query: &str) -> Result<GeoResult, PipelineError> {
    let parse = |field: &str, raw: &str| {
        raw.trim().parse::<f64>().map_err(|_| {
            PipelineError::MalformedUpstreamResponse(format!("Invalid {field} in geocoding response: '{raw}'"))
        })
    };

    let latitude = parse("latitude", &place.lat)?;
    let longitude = parse("longitude", &place.lon)?;

    // Una caja incompleta o ilegible se descarta sin invalidar el resultado.
    let bounding_box = place.boundingbox.and_then(|raw| {
        let values: Vec<f64> = raw.iter().filter_map(|v| v.trim().parse().ok()).collect();
        <[f64; 4]>::try_from(values).ok()
    });

    Ok(GeoResult {
        latitude,
        longitude,
        display_name: place
            .display_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| query.to_string()),
        bounding_box,
        polygon: place.geojson,
    })
}

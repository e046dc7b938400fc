//! Consumidor del stream SSE: troceado de registros y reductor incremental.
//!
//! El reductor es una función pura `(estado, evento) -> estado'` que se
//! aplica en el orden de llegada. Cada búsqueda lleva un `SearchId`; los
//! eventos de búsquedas anteriores se descartan.

use anyhow::{anyhow, Result};
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    events::{MetricPayload, MetricValue, PipelineEvent, SoilMetric, WeatherMetric},
    models::{EnvironmentalRecord, GeoResult, SoilType},
};

/// Registro SSE crudo (`event:` + `data:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

/// Acumula bytes y devuelve los registros completos (separados por `\n\n`).
///
/// Trabaja sobre bytes para que un corte a mitad de un carácter UTF-8 no
/// corrompa el texto.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let record: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&record[..pos]);
            if let Some(event) = parse_record(&text) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes pendientes de un registro incompleto.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Busca una línea `event: <palabra>` seguida de `data: <json>`.
/// Los comentarios de keep-alive y registros vacíos devuelven `None`.
pub fn parse_record(record: &str) -> Option<RawEvent> {
    let lines: Vec<&str> = record.lines().collect();
    lines.windows(2).find_map(|pair| {
        let name = pair[0].strip_prefix("event: ")?;
        let data = pair[1].strip_prefix("data: ")?;
        let is_word = !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
        (is_word && !data.is_empty()).then(|| RawEvent {
            name: name.to_string(),
            data: data.to_string(),
        })
    })
}

/// Aviso transitorio para el usuario (no modifica el registro).
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Info { title: String, description: String },
    Failure { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchId(u64);

/// Estado de una búsqueda en curso.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState {
    pub search_id: SearchId,
    pub record: EnvironmentalRecord,
    pub loading: bool,
    /// `true` sólo tras recibir `complete`.
    pub complete: bool,
    pub failure: Option<String>,
}

impl SearchState {
    pub fn new(search_id: SearchId, location: &str) -> Self {
        Self {
            search_id,
            record: EnvironmentalRecord::placeholder(location),
            loading: true,
            complete: false,
            failure: None,
        }
    }
}

/// Escribe `value` salvo que sea un marcador (cero) y el campo ya tenga dato.
fn merge_number(slot: &mut f64, value: Option<f64>) {
    match value {
        Some(v) if v.is_finite() && !(v == 0.0 && *slot != 0.0) => *slot = v,
        _ => {}
    }
}

fn merge_weather(record: &mut EnvironmentalRecord, payload: &MetricPayload<WeatherMetric>) {
    let value = payload.value.as_f64();
    let weather = &mut record.weather;
    match payload.metric {
        WeatherMetric::Temperature => merge_number(&mut weather.avg_temperature_c, value),
        WeatherMetric::Humidity => merge_number(&mut weather.avg_humidity_pct, value),
        WeatherMetric::PrevRainfall => merge_number(&mut weather.prev_year_rainfall_mm, value),
        WeatherMetric::AvgRainfall => merge_number(&mut weather.avg_annual_rainfall_mm, value),
    }
}

fn merge_soil(record: &mut EnvironmentalRecord, payload: &MetricPayload<SoilMetric>) {
    let soil = &mut record.soil;
    match payload.metric {
        SoilMetric::Type => {
            if let MetricValue::Text(text) = &payload.value {
                if let Some(soil_type) = SoilType::parse(text) {
                    soil.soil_type = Some(soil_type);
                }
            }
        }
        SoilMetric::Ph => merge_number(&mut soil.ph, payload.value.as_f64()),
        SoilMetric::Nitrogen => merge_number(&mut soil.nitrogen_mg_kg, payload.value.as_f64()),
        SoilMetric::Phosphorus => merge_number(&mut soil.phosphorus_mg_kg, payload.value.as_f64()),
        SoilMetric::Potassium => merge_number(&mut soil.potassium_mg_kg, payload.value.as_f64()),
    }
}

/// `(0, 0)` es el marcador del registro vacío: no pisa una posición ya
/// conocida. Tampoco se aceptan coordenadas no finitas.
fn merge_position(previous: &GeoResult, latitude: f64, longitude: f64) -> (f64, f64) {
    let known = previous.latitude != 0.0 || previous.longitude != 0.0;
    let placeholder = latitude == 0.0 && longitude == 0.0;
    if !latitude.is_finite() || !longitude.is_finite() || (placeholder && known) {
        (previous.latitude, previous.longitude)
    } else {
        (latitude, longitude)
    }
}

/// Aplica un evento al estado. Las actualizaciones son aditivas: nunca se
/// vuelve a un valor de marcador ni se tocan campos hermanos.
pub fn reduce(mut state: SearchState, event: &PipelineEvent) -> SearchState {
    match event {
        PipelineEvent::Status(_) => {}
        PipelineEvent::Coordinates(p) => {
            let previous = &state.record.coordinates;
            let display_name = if p.location.is_empty() {
                previous.display_name.clone()
            } else {
                p.location.clone()
            };
            let (latitude, longitude) = merge_position(previous, p.latitude, p.longitude);
            state.record.coordinates = GeoResult {
                latitude,
                longitude,
                display_name: display_name.clone(),
                bounding_box: p.bounding_box.or(previous.bounding_box),
                polygon: p.polygon.clone().or_else(|| previous.polygon.clone()),
            };
            if !display_name.is_empty() {
                state.record.location = display_name;
            }
        }
        PipelineEvent::Weather(p) => merge_weather(&mut state.record, p),
        PipelineEvent::Soil(p) => merge_soil(&mut state.record, p),
        PipelineEvent::Complete(_) => {
            state.loading = false;
            state.complete = true;
        }
        PipelineEvent::Error(p) => {
            state.loading = false;
            state.failure = Some(p.error.clone());
        }
    }
    state
}

fn value_text(value: &MetricValue) -> String {
    match value {
        MetricValue::Number(n) => n.to_string(),
        MetricValue::Text(t) => t.clone(),
    }
}

/// Aviso asociado a un evento, si lo tiene.
pub fn notification_for(event: &PipelineEvent, location: &str) -> Option<Notification> {
    let metric_notice = |label: &str, value: &MetricValue, unit: &Option<String>| Notification::Info {
        title: format!("{label} received"),
        description: format!("{} {}", value_text(value), unit.as_deref().unwrap_or("")).trim_end().to_string(),
    };

    match event {
        PipelineEvent::Status(p) => Some(Notification::Info {
            title: p.message.clone(),
            description: format!("Processing {}...", p.stage.as_str()),
        }),
        PipelineEvent::Coordinates(_) => None,
        PipelineEvent::Weather(p) => Some(metric_notice(&p.label, &p.value, &p.unit)),
        PipelineEvent::Soil(p) => Some(metric_notice(&p.label, &p.value, &p.unit)),
        PipelineEvent::Complete(p) => Some(Notification::Info {
            title: p.message.clone(),
            description: format!("All environmental data retrieved for {location}"),
        }),
        PipelineEvent::Error(p) => Some(Notification::Failure {
            message: p.error.clone(),
        }),
    }
}

/// Búsquedas del lado cliente. Empezar una búsqueda nueva sustituye el
/// registro entero e invalida los eventos de la anterior.
#[derive(Debug, Default)]
pub struct SearchSession {
    next_id: u64,
    current: Option<SearchState>,
}

impl SearchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, location: &str) -> SearchId {
        self.next_id += 1;
        let id = SearchId(self.next_id);
        self.current = Some(SearchState::new(id, location));
        id
    }

    /// Aplica `event` si pertenece a la búsqueda vigente. Devuelve el aviso
    /// a mostrar, o `None` si el evento se descartó o no genera aviso.
    pub fn apply(&mut self, id: SearchId, event: &PipelineEvent) -> Option<Notification> {
        let state = self.current.take()?;
        if state.search_id != id {
            debug!("Descartado evento '{}' de una búsqueda anterior", event.name());
            self.current = Some(state);
            return None;
        }
        let location = state.record.location.clone();
        self.current = Some(reduce(state, event));
        notification_for(event, &location)
    }

    pub fn current(&self) -> Option<&SearchState> {
        self.current.as_ref()
    }

    pub fn into_current(self) -> Option<SearchState> {
        self.current
    }
}

/// Lanza una búsqueda contra un servidor en marcha y aplica cada evento al
/// llegar. `on_event` recibe el estado tras cada fusión y el aviso, si hay.
pub async fn stream_search<F>(
    http: &reqwest::Client,
    server_url: &str,
    location: &str,
    mut on_event: F,
) -> Result<SearchState>
where
    F: FnMut(&SearchState, Option<&Notification>),
{
    let mut session = SearchSession::new();
    let id = session.begin(location);

    let url = format!("{}/api/environmental-data", server_url.trim_end_matches('/'));
    let response = http
        .post(&url)
        .json(&json!({ "location": location }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(anyhow!("Failed to fetch data: {}", response.status()));
    }

    let mut decoder = SseDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for raw in decoder.push(&chunk) {
            let event = match PipelineEvent::parse(&raw.name, &raw.data) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Evento ignorado: {e}");
                    continue;
                }
            };
            let notice = session.apply(id, &event);
            if let Some(state) = session.current() {
                on_event(state, notice.as_ref());
            }
        }
    }

    if decoder.pending() > 0 {
        warn!("El stream terminó con {} bytes sin procesar", decoder.pending());
    }

    session
        .into_current()
        .ok_or_else(|| anyhow!("La búsqueda no tiene estado"))
}

//! Orquestador del pipeline: geocodificación → clima → suelo.
//!
//! Flujo:
//!   1. `status` + geocodificación → `coordinates` (o `error` y fin).
//!   2. `status` + archivo meteorológico → 4 eventos `weather` (o `error` y fin).
//!   3. `status` + modelo de suelo → 5 eventos `soil`.
//!   4. `complete` con marca de tiempo.
//!
//! Las etapas son estrictamente secuenciales y cada petición tiene su propio
//! stream; no se comparte estado mutable entre búsquedas.

use std::sync::Arc;

use futures::Stream;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::PipelineError,
    events::{self, CoordinatesPayload, ErrorPayload, PipelineEvent, StatusStage},
    geocoder::Geocoder,
    soil::SoilModel,
    weather::WeatherArchive,
};

/// Estado de una ejecución. `Error` es alcanzable desde cualquier etapa.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Geocoding,
    WeatherFetching,
    SoilDeriving,
    Complete,
    Error,
}

#[derive(Clone)]
pub struct Pipeline {
    geocoder: Geocoder,
    weather: WeatherArchive,
    soil: Arc<dyn SoilModel>,
}

impl Pipeline {
    pub fn new(geocoder: Geocoder, weather: WeatherArchive, soil: Arc<dyn SoilModel>) -> Self {
        Self { geocoder, weather, soil }
    }

    pub fn soil_model_name(&self) -> &'static str {
        self.soil.name()
    }

    /// Ejecuta el pipeline para `location` emitiendo los eventos a medida que
    /// cada resultado está disponible.
    ///
    /// Si el consumidor suelta el stream (cliente desconectado), la ejecución
    /// se abandona en el siguiente punto de suspensión.
    pub fn run(&self, location: String) -> impl Stream<Item = PipelineEvent> + Send + 'static {
        let pipeline = self.clone();
        let run_id = Uuid::new_v4();

        async_stream::stream! {
            let mut stage = PipelineStage::Idle;
            info!(%run_id, "Procesando ubicación: {location}");

            // --- Etapa 1: geocodificación ---
            stage = advance(run_id, stage, PipelineStage::Geocoding);
            yield PipelineEvent::status(StatusStage::Geocoding, "Finding location coordinates...");
            let geo = match pipeline.geocoder.locate(&location).await {
                Ok(geo) => geo,
                Err(err) => {
                    fail(run_id, stage, &err);
                    yield PipelineEvent::Error(ErrorPayload::from(&err));
                    return;
                }
            };
            info!(%run_id, "Coordenadas encontradas: {}, {}", geo.latitude, geo.longitude);
            yield PipelineEvent::Coordinates(CoordinatesPayload::from(&geo));

            // --- Etapa 2: clima ---
            stage = advance(run_id, stage, PipelineStage::WeatherFetching);
            yield PipelineEvent::status(StatusStage::Weather, "Fetching 5-year weather history...");
            let weather = match pipeline.weather.fetch_summary(geo.latitude, geo.longitude).await {
                Ok(summary) => summary,
                Err(err) => {
                    fail(run_id, stage, &err);
                    yield PipelineEvent::Error(ErrorPayload::from(&err));
                    return;
                }
            };
            for event in events::weather_events(&weather) {
                yield event;
            }

            // --- Etapa 3: suelo (no puede fallar) ---
            stage = advance(run_id, stage, PipelineStage::SoilDeriving);
            yield PipelineEvent::status(StatusStage::Soil, "Analyzing soil composition...");
            let soil = pipeline.soil.derive(geo.latitude, geo.longitude, &weather);
            for event in events::soil_events(&soil) {
                yield event;
            }

            advance(run_id, stage, PipelineStage::Complete);
            yield PipelineEvent::complete_now();
        }
    }
}

fn advance(run_id: Uuid, from: PipelineStage, to: PipelineStage) -> PipelineStage {
    info!(%run_id, "Etapa {:?} -> {:?}", from, to);
    to
}

fn fail(run_id: Uuid, from: PipelineStage, err: &PipelineError) {
    match err {
        PipelineError::LocationNotFound(_) => warn!(%run_id, "Fallo en {:?}: {}", from, err),
        _ => error!(%run_id, "Fallo en {:?}: {}", from, err),
    }
    advance(run_id, from, PipelineStage::Error);
}

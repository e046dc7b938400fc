// Módulos de la aplicación
mod advisor;
mod api;
mod app_state;
mod client;
mod config;
mod error;
mod events;
mod export;
mod geocoder;
mod models;
mod pipeline;
mod soil;
mod weather;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::{AppState, Status},
    client::Notification,
    config::{AppConfig, SoilModelKind},
    geocoder::Geocoder,
    models::EnvironmentalRecord,
    pipeline::Pipeline,
    soil::{HeuristicSoilModel, RandomizedSoilModel, SoilModel},
    weather::WeatherArchive,
};

#[derive(Parser, Debug)]
#[command(name = "agro_env_stream", version, about = "Datos agroambientales por ubicación, servidos por SSE")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Arranca el servidor HTTP (por defecto).
    Serve,
    /// Consulta una ubicación contra un servidor en marcha.
    Query {
        location: String,
        /// URL base del servidor; por defecto la de SERVER_ADDR.
        #[arg(long)]
        server: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
        /// Guarda además el resultado en `<ubicación>_environmental_data.<ext>`.
        #[arg(long)]
        save: bool,
    },
    /// Muestra un registro exportado previamente en JSON.
    Show {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
    Text,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text => "txt",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración sólo para los comandos que la usan
    match Cli::parse().command.unwrap_or(Command::Serve) {
        Command::Serve => serve(load_config()?).await,
        Command::Query { location, server, format, save } => {
            let server = match server {
                Some(url) => url,
                None => format!("http://{}", load_config()?.server_addr),
            };
            query(&server, &location, format, save).await
        }
        Command::Show { file, format } => {
            let record = load_record(&file).await?;
            println!("{}", render(&record, format)?);
            Ok(())
        }
    }
}

fn load_config() -> Result<AppConfig> {
    AppConfig::from_env().context("Error al cargar la configuración")
}

fn soil_model_for(cfg: &AppConfig) -> Arc<dyn SoilModel> {
    match (cfg.soil_model, cfg.soil_seed) {
        (SoilModelKind::Heuristic, _) => Arc::new(HeuristicSoilModel),
        (SoilModelKind::Randomized, Some(seed)) => Arc::new(RandomizedSoilModel::seeded(seed)),
        (SoilModelKind::Randomized, None) => Arc::new(RandomizedSoilModel::from_entropy()),
    }
}

async fn serve(cfg: AppConfig) -> Result<()> {
    // 3. Servicios externos y modelo de suelo
    let http = cfg.http_client()?;
    let pipeline = Pipeline::new(
        Geocoder::new(http.clone(), &cfg.geocoder_url, &cfg.geocoder_user_agent),
        WeatherArchive::new(http, &cfg.weather_archive_url),
        soil_model_for(&cfg),
    );
    info!("Modelo de suelo activo: {}", pipeline.soil_model_name());

    // 4. Inicializar gestor de LLMs
    let llm_manager = advisor::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        pipeline,
        llm_manager,
        status: Arc::new(Mutex::new(Status::default())),
    };

    // 6. Configurar el router de la API
    let app = api::create_router(app_state).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    // Apagado ordenado con Ctrl-C.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

async fn query(server: &str, location: &str, format: OutputFormat, save: bool) -> Result<()> {
    // Sin timeout global: el stream dura lo que tarden los servicios externos.
    let http = reqwest::Client::new();
    let state = client::stream_search(&http, server, location, |_, notice| match notice {
        Some(Notification::Info { title, description }) => eprintln!("{title}: {description}"),
        Some(Notification::Failure { message }) => eprintln!("Error: {message}"),
        None => {}
    })
    .await?;

    let rendered = render(&state.record, format)?;
    println!("{rendered}");
    if save {
        let path = export::file_name(&state.record, format.extension());
        tokio::fs::write(&path, &rendered)
            .await
            .with_context(|| format!("No se pudo escribir {path}"))?;
        info!("Resultado guardado en {}", path);
    }

    match state.failure {
        Some(message) => Err(anyhow!(message)),
        None if !state.complete => Err(anyhow!("El stream terminó sin evento final")),
        None => Ok(()),
    }
}

async fn load_record(path: &Path) -> Result<EnvironmentalRecord> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("No se pudo leer {}", path.display()))?;
    export::from_json(&raw)
}

fn render(record: &EnvironmentalRecord, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => export::to_json_pretty(record),
        OutputFormat::Csv => export::to_csv(record),
        OutputFormat::Text => {
            let soil_type = record
                .soil
                .soil_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            Ok(format!(
                "{}\n  Coordenadas: {:.4}, {:.4}\n  Temperatura media: {} °C\n  Humedad media: {} %\n  \
                 Lluvia año anterior: {} mm\n  Lluvia media anual: {} mm\n  Suelo: {} (pH {}, N {} / P {} / K {} mg/kg)",
                record.location,
                record.coordinates.latitude,
                record.coordinates.longitude,
                record.weather.avg_temperature_c,
                record.weather.avg_humidity_pct,
                record.weather.prev_year_rainfall_mm,
                record.weather.avg_annual_rainfall_mm,
                soil_type,
                record.soil.ph,
                record.soil.nitrogen_mg_kg,
                record.soil.phosphorus_mg_kg,
                record.soil.potassium_mg_kg,
            ))
        }
    }
}

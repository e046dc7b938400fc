//! Carga y gestión de configuración de la aplicación (servicios externos,
//! modelo de suelo y LLM).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use url::Url;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Estrategia de derivación de suelo seleccionable por entorno.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SoilModelKind {
    Heuristic,
    Randomized,
}

impl SoilModelKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "randomized" | "random" => Ok(Self::Randomized),
            other => Err(anyhow!("Modelo de suelo no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub geocoder_url: String,
    pub geocoder_user_agent: String,
    pub weather_archive_url: String,
    /// `None` = sin límite (comportamiento de referencia).
    pub upstream_timeout: Option<Duration>,

    pub soil_model: SoilModelKind,
    /// Semilla del modelo aleatorio (`SOIL_MODEL_SEED`) para ejecuciones reproducibles.
    pub soil_seed: Option<u64>,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, con una fuente de variables inyectable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server_addr = var("SERVER_ADDR", "127.0.0.1:3322");

        let geocoder_url = var("GEOCODER_URL", "https://nominatim.openstreetmap.org/search");
        Url::parse(&geocoder_url).with_context(|| format!("GEOCODER_URL inválida: {geocoder_url}"))?;
        let geocoder_user_agent = var("GEOCODER_USER_AGENT", "agro_env_stream");

        let weather_archive_url = var("WEATHER_ARCHIVE_URL", "https://archive-api.open-meteo.com/v1/archive");
        Url::parse(&weather_archive_url)
            .with_context(|| format!("WEATHER_ARCHIVE_URL inválida: {weather_archive_url}"))?;

        let upstream_timeout = match lookup("UPSTREAM_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("UPSTREAM_TIMEOUT_SECS debe ser un entero: {raw}"))?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        let soil_model = SoilModelKind::from_str(&var("SOIL_MODEL", "heuristic"))?;
        let soil_seed = match lookup("SOIL_MODEL_SEED") {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("SOIL_MODEL_SEED debe ser un entero: {raw}"))?,
            ),
            _ => None,
        };

        let llm_provider = LlmProvider::from_str(&var("LLM_PROVIDER", "openai"))?;
        let llm_chat_model = var("LLM_CHAT_MODEL", "gpt-4o-mini");

        Ok(Self {
            server_addr,
            geocoder_url,
            geocoder_user_agent,
            weather_archive_url,
            upstream_timeout,
            soil_model,
            soil_seed,
            llm_provider,
            llm_chat_model,
        })
    }

    /// Cliente HTTP compartido por el geocodificador y el archivo meteorológico.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.upstream_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().context("No se pudo construir el cliente HTTP")
    }
}

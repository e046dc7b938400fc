//! Recomendación de cultivos a través de Rig.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.

use anyhow::Result;
use rig::completion::Prompt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{
    config::{AppConfig, LlmProvider},
    models::{SoilSummary, WeatherSummary},
};

const SYSTEM_PROMPT: &str = "You are an expert Indian agricultural advisor with deep knowledge of crop \
cultivation, soil science, and farming practices across different regions of India. Provide practical, \
actionable advice tailored to Indian farmers.";

/// Cuerpo de `POST /api/predict-crops`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CropAdviceRequest {
    pub location: String,
    pub weather: WeatherSummary,
    pub soil: SoilSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CropAdviceResponse {
    pub recommendations: String,
}

/// Fallos del asesor. Los límites del proveedor se distinguen para que la API
/// responda 429/402 en lugar de un 500 genérico.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,
    #[error("AI service quota exceeded. Please contact support.")]
    QuotaExceeded,
    #[error("Proveedor LLM {0:?} aún no implementado para recomendaciones")]
    Unsupported(LlmProvider),
    #[error("{0}")]
    Provider(String),
}

impl AdvisorError {
    /// Clasifica el mensaje de error del proveedor. Rig sólo expone el texto
    /// de la respuesta HTTP, así que se buscan el código y las marcas de OpenAI.
    pub fn from_provider_message(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("insufficient_quota") || lower.contains("402") || lower.contains("payment required") {
            Self::QuotaExceeded
        } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
            Self::RateLimited
        } else {
            Self::Provider(message)
        }
    }
}

/// Construye el prompt con los datos ambientales de la ubicación.
pub fn build_prompt(req: &CropAdviceRequest) -> String {
    let w = &req.weather;
    let s = &req.soil;
    let soil_type = s.soil_type.map(|t| t.as_str()).unwrap_or("Unknown");

    format!(
        "You are an expert agricultural advisor specializing in Indian farming. Based on the following \
environmental data for {location}, India, provide detailed crop recommendations.

Weather Data:
- Average Temperature: {temp}°C
- Average Humidity: {hum}%
- Previous Year Rainfall: {prev}mm
- Average Annual Rainfall: {avg}mm

Soil Data:
- pH Level: {ph}
- Nitrogen: {n} mg/kg
- Phosphorus: {p} mg/kg
- Potassium: {k} mg/kg
- Soil Type: {soil_type}

Provide recommendations in the following structured format for 5-6 most suitable crops for this region:

For each crop, include:
1. Crop Name (in English and Hindi)
2. Suitability Score (1-10)
3. Best Planting Season (Kharif/Rabi/Zaid)
4. Growing Duration (in days/months)
5. Expected Yield per hectare
6. Market Demand & Price Range
7. Water Requirements
8. Fertilizer Recommendations (NPK ratios)
9. Common Pests/Diseases and Management
10. Specific cultivation tips for this soil and climate

Also provide:
- Crop rotation suggestions
- Soil improvement recommendations
- Water management strategies
- Government schemes applicable (PM-KISAN, etc.)
- Expected income per hectare per season",
        location = req.location,
        temp = w.avg_temperature_c,
        hum = w.avg_humidity_pct,
        prev = w.prev_year_rainfall_mm,
        avg = w.avg_annual_rainfall_mm,
        ph = s.ph,
        n = s.nitrogen_mg_kg,
        p = s.phosphorus_mg_kg,
        k = s.potassium_mg_kg,
    )
}

/// Gestor de LLMs para el asesor de cultivos.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    /// Genera las recomendaciones de cultivo en texto libre.
    pub async fn recommend_crops(&self, req: &CropAdviceRequest) -> Result<String, AdvisorError> {
        info!("[CROP-PREDICT] Petición para la ubicación: {}", req.location);
        match self.provider {
            LlmProvider::OpenAI => self.recommend_with_openai(&build_prompt(req)).await,
            ref other => Err(AdvisorError::Unsupported(other.clone())),
        }
    }

    async fn recommend_with_openai(&self, prompt: &str) -> Result<String, AdvisorError> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(SYSTEM_PROMPT).build();

        let answer = agent
            .prompt(prompt)
            .await
            .map_err(|e| AdvisorError::from_provider_message(e.to_string()))?;
        info!("[CROP-PREDICT] Recomendaciones generadas");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SoilType;

    fn request() -> CropAdviceRequest {
        CropAdviceRequest {
            location: "Nashik".into(),
            weather: WeatherSummary {
                avg_temperature_c: 24.6,
                avg_humidity_pct: 61.2,
                prev_year_rainfall_mm: 701.0,
                avg_annual_rainfall_mm: 688.4,
            },
            soil: SoilSummary {
                ph: 7.1,
                nitrogen_mg_kg: 31.5,
                phosphorus_mg_kg: 18.0,
                potassium_mg_kg: 190.0,
                soil_type: Some(SoilType::Loamy),
            },
        }
    }

    #[test]
    fn prompt_includes_every_metric() {
        let prompt = build_prompt(&request());
        for needle in [
            "for Nashik, India",
            "Average Temperature: 24.6°C",
            "Average Humidity: 61.2%",
            "Previous Year Rainfall: 701mm",
            "Average Annual Rainfall: 688.4mm",
            "pH Level: 7.1",
            "Nitrogen: 31.5 mg/kg",
            "Potassium: 190 mg/kg",
            "Soil Type: Loamy",
            "(Kharif/Rabi/Zaid)",
        ] {
            assert!(prompt.contains(needle), "falta '{needle}'");
        }
    }

    #[test]
    fn missing_soil_type_is_reported_as_unknown() {
        let mut req = request();
        req.soil.soil_type = None;
        assert!(build_prompt(&req).contains("Soil Type: Unknown"));
    }

    #[test]
    fn unsupported_provider_is_an_error() {
        let manager = LlmManager {
            provider: LlmProvider::Gemini,
            chat_model: String::new(),
        };
        let err = tokio_test::block_on(manager.recommend_crops(&request())).unwrap_err();
        assert!(matches!(err, AdvisorError::Unsupported(LlmProvider::Gemini)));
        assert!(err.to_string().contains("Gemini"));
    }

    #[test]
    fn provider_limits_are_recognised() {
        let classify = |m: &str| AdvisorError::from_provider_message(m.to_string());
        assert!(matches!(
            classify("ProviderError: 429 Too Many Requests: Rate limit reached for gpt-4o-mini"),
            AdvisorError::RateLimited
        ));
        assert!(matches!(
            classify(r#"ProviderError: {"error":{"code":"insufficient_quota"}}"#),
            AdvisorError::QuotaExceeded
        ));
        assert!(matches!(classify("HTTP 402 Payment Required"), AdvisorError::QuotaExceeded));
        match classify("connection reset by peer") {
            AdvisorError::Provider(m) => assert_eq!(m, "connection reset by peer"),
            other => panic!("clasificación inesperada: {other:?}"),
        }
    }
}

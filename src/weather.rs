//! Agregador meteorológico: cinco años de serie diaria del archivo histórico
//! (API compatible con Open-Meteo) reducidos a cuatro escalares.

use chrono::{Days, Months, NaiveDate, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    error::PipelineError,
    models::{round2, WeatherSummary},
};

const HISTORY_YEARS: u32 = 5;
const DAILY_VARIABLES: &str = "precipitation_sum,temperature_2m_mean,relative_humidity_2m_mean";

/// Series diarias crudas; cada estación puede tener días sin dato (`null`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailySeries {
    #[serde(default)]
    pub precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    pub temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    pub relative_humidity_2m_mean: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: DailySeries,
}

/// Ventana de fechas `[start, end]` de la consulta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Cinco años hacia atrás terminando en `end` (mismo día del calendario;
    /// un 29 de febrero cae en el 28).
    pub fn trailing_years(end: NaiveDate, years: u32) -> Self {
        let start = end
            .checked_sub_months(Months::new(years * 12))
            .unwrap_or_else(|| end - Days::new(u64::from(years) * 365));
        Self { start, end }
    }
}

fn valid(samples: &[Option<f64>]) -> Vec<f64> {
    samples.iter().flatten().copied().filter(|v| v.is_finite()).collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Reduce las series diarias a un `WeatherSummary`.
///
/// La lluvia anual media es el total de todas las muestras dividido entre 5,
/// aunque haya menos de cinco años de datos.
pub fn summarize(series: &DailySeries) -> WeatherSummary {
    let temperature = valid(&series.temperature_2m_mean);
    let humidity = valid(&series.relative_humidity_2m_mean);
    let rainfall = valid(&series.precipitation_sum);

    let last_year = &rainfall[rainfall.len().saturating_sub(365)..];
    let prev_year_rainfall: f64 = last_year.iter().sum();
    let total_rainfall: f64 = rainfall.iter().sum();

    WeatherSummary {
        avg_temperature_c: round2(mean(&temperature)),
        avg_humidity_pct: round2(mean(&humidity)),
        prev_year_rainfall_mm: round2(prev_year_rainfall),
        avg_annual_rainfall_mm: round2(total_rainfall / f64::from(HISTORY_YEARS)),
    }
}

#[derive(Debug, Clone)]
pub struct WeatherArchive {
    http: reqwest::Client,
    endpoint: String,
}

impl WeatherArchive {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.to_string(),
        }
    }

    /// Resumen de los últimos cinco años hasta hoy (UTC).
    pub async fn fetch_summary(&self, latitude: f64, longitude: f64) -> Result<WeatherSummary, PipelineError> {
        let window = DateWindow::trailing_years(Utc::now().date_naive(), HISTORY_YEARS);
        self.fetch_summary_for(latitude, longitude, window).await
    }

    pub async fn fetch_summary_for(
        &self,
        latitude: f64,
        longitude: f64,
        window: DateWindow,
    ) -> Result<WeatherSummary, PipelineError> {
        let start = window.start.format("%Y-%m-%d").to_string();
        let end = window.end.format("%Y-%m-%d").to_string();
        info!("Consultando archivo meteorológico ({latitude}, {longitude}) de {start} a {end}");

        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("start_date", start),
                ("end_date", end),
                ("daily", DAILY_VARIABLES.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::from_transport("Weather archive", &e))?;

        if !response.status().is_success() {
            warn!("Error del archivo meteorológico: estado {}", response.status());
            return Err(PipelineError::WeatherFetchFailed("Failed to fetch weather data".to_string()));
        }

        let body: ArchiveResponse = response.json().await.map_err(|e| {
            PipelineError::MalformedUpstreamResponse(format!("Unexpected weather archive response: {e}"))
        })?;

        Ok(summarize(&body.daily))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn series(temp: Vec<Option<f64>>, hum: Vec<Option<f64>>, rain: Vec<Option<f64>>) -> DailySeries {
        DailySeries {
            precipitation_sum: rain,
            temperature_2m_mean: temp,
            relative_humidity_2m_mean: hum,
        }
    }

    #[test]
    fn means_ignore_null_samples() {
        let s = series(
            vec![Some(20.0), None, Some(30.0), None],
            vec![None, Some(60.0), Some(70.0)],
            vec![],
        );
        let summary = summarize(&s);
        assert_eq!(summary.avg_temperature_c, 25.0);
        assert_eq!(summary.avg_humidity_pct, 65.0);
    }

    #[test]
    fn all_null_or_empty_series_yield_zero() {
        let s = series(vec![None, None], vec![], vec![None]);
        let summary = summarize(&s);
        assert_eq!(summary, WeatherSummary::default());
        assert!(!summary.avg_temperature_c.is_nan());
    }

    #[test]
    fn annual_rainfall_is_total_over_five_even_with_short_history() {
        // 100 días de 2 mm: 200 mm en total, 40 mm "anuales".
        let s = series(vec![], vec![], vec![Some(2.0); 100]);
        let summary = summarize(&s);
        assert_eq!(summary.avg_annual_rainfall_mm, 40.0);
        assert_eq!(summary.prev_year_rainfall_mm, 200.0);
    }

    #[test]
    fn previous_year_sums_the_last_365_valid_samples() {
        let mut rain = vec![Some(10.0); 400];
        rain.extend(vec![Some(1.0); 365]);
        // Los nulos no cuentan como día.
        rain.insert(500, None);
        let summary = summarize(&series(vec![], vec![], rain));
        assert_eq!(summary.prev_year_rainfall_mm, 365.0);
        assert_eq!(summary.avg_annual_rainfall_mm, (4000.0 + 365.0) / 5.0);
    }

    #[test]
    fn outputs_are_rounded_to_two_decimals() {
        let s = series(vec![Some(1.0), Some(1.0), Some(2.0)], vec![], vec![Some(0.333)]);
        let summary = summarize(&s);
        assert_eq!(summary.avg_temperature_c, 1.33);
        assert_eq!(summary.avg_annual_rainfall_mm, 0.07);
    }

    #[test]
    fn window_spans_five_calendar_years() {
        let end = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let w = DateWindow::trailing_years(end, 5);
        assert_eq!(w.start, NaiveDate::from_ymd_opt(2021, 10, 18).unwrap());

        let leap = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let w = DateWindow::trailing_years(leap, 5);
        assert_eq!(w.start, NaiveDate::from_ymd_opt(2019, 2, 28).unwrap());
    }

    #[tokio::test]
    async fn fetch_requests_the_three_daily_variables() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .and(query_param("daily", DAILY_VARIABLES))
            .and(query_param("start_date", "2021-10-18"))
            .and(query_param("end_date", "2026-10-18"))
            .and(query_param("timezone", "auto"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "latitude": 19.07,
                "daily": {
                    "time": ["2026-10-17", "2026-10-18"],
                    "precipitation_sum": [12.5, null],
                    "temperature_2m_mean": [27.1, 28.3],
                    "relative_humidity_2m_mean": [null, 80.0]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let archive = WeatherArchive::new(reqwest::Client::new(), &format!("{}/v1/archive", server.uri()));
        let window = DateWindow::trailing_years(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(), 5);
        let summary = archive.fetch_summary_for(19.07, 72.87, window).await.unwrap();

        assert_eq!(summary.avg_temperature_c, 27.7);
        assert_eq!(summary.avg_humidity_pct, 80.0);
        assert_eq!(summary.prev_year_rainfall_mm, 12.5);
        assert_eq!(summary.avg_annual_rainfall_mm, 2.5);
    }

    #[tokio::test]
    async fn non_success_status_is_weather_fetch_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let archive = WeatherArchive::new(reqwest::Client::new(), &server.uri());
        let err = archive.fetch_summary(10.0, 10.0).await.unwrap_err();
        assert_eq!(err, PipelineError::WeatherFetchFailed("Failed to fetch weather data".into()));
    }
}

//! Historical weather summary for a location and date span.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const OPEN_METEO_ARCHIVE: &str = "https://archive-api.open-meteo.com/v1/archive";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    /// Mean of the daily maximum temperatures, °C.
    pub temp_c: f64,
    /// Total precipitation, mm.
    pub precipitation_mm: f64,
    pub condition: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeatherError {
    #[error("No Date")]
    NoDate,
    #[error("API Error")]
    Api(u16),
    #[error("No Data")]
    NoData,
    #[error("Empty Data")]
    EmptyData,
    #[error("{0}")]
    Request(String),
}

#[async_trait]
pub trait WeatherLookup: Send + Sync {
    /// Summary over `[start, end]`, or the single day `start`.
    async fn fetch_weather(
        &self,
        lat: f64,
        lon: f64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<WeatherReport, WeatherError>;
}

#[derive(Debug, Default, Deserialize)]
pub struct DailySeries {
    #[serde(default)]
    pub weathercode: Vec<Option<i64>>,
    #[serde(default)]
    pub temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation_sum: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    daily: Option<DailySeries>,
}

/// Condition text and icon of a WMO weather interpretation code.
pub fn wmo_condition(code: i64) -> (&'static str, &'static str) {
    match code {
        0 => ("Clear Sky", "☀️"),
        1 | 2 => ("Partly Cloudy", "⛅"),
        3 => ("Overcast", "☁️"),
        45 | 48 => ("Foggy", "🌫️"),
        51 | 53 | 55 => ("Drizzle", "🌦️"),
        61 | 63 | 65 | 80 | 81 | 82 => ("Rainy", "🌧️"),
        71 | 73 | 75 | 85 | 86 => ("Snowy", "❄️"),
        c if c >= 95 => ("Thunderstorm", "⛈️"),
        _ => ("Unknown", "🌡️"),
    }
}

/// Collapse daily values into one report. Gaps are skipped; ties between
/// equally common codes go to the higher code.
pub fn summarize_daily(daily: &DailySeries) -> Result<WeatherReport, WeatherError> {
    if daily.temperature_2m_max.is_empty() {
        return Err(WeatherError::EmptyData);
    }
    let temps: Vec<f64> = daily.temperature_2m_max.iter().flatten().copied().collect();
    if temps.is_empty() {
        return Err(WeatherError::NoData);
    }

    let temp_c = temps.iter().sum::<f64>() / temps.len() as f64;
    let precipitation_mm: f64 = daily.precipitation_sum.iter().flatten().sum();

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for code in daily.weathercode.iter().flatten() {
        *counts.entry(*code).or_insert(0) += 1;
    }
    let code = counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(code, _)| code)
        .unwrap_or(0);
    let (condition, icon) = wmo_condition(code);

    Ok(WeatherReport {
        temp_c,
        precipitation_mm,
        condition: condition.to_string(),
        icon: icon.to_string(),
    })
}

/// Open-Meteo archive API client.
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(base_url: impl Into<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl WeatherLookup for OpenMeteoClient {
    async fn fetch_weather(
        &self,
        lat: f64,
        lon: f64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<WeatherReport, WeatherError> {
        let start = start.ok_or(WeatherError::NoDate)?;
        let end = end.unwrap_or(start);
        let params = [
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("start_date", start.to_string()),
            ("end_date", end.to_string()),
            (
                "daily",
                "weathercode,temperature_2m_max,precipitation_sum".to_string(),
            ),
            ("timezone", "auto".to_string()),
        ];

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| WeatherError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            log::warn!("Weather API returned {}", status);
            return Err(WeatherError::Api(status.as_u16()));
        }

        let body: ArchiveResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Request(e.to_string()))?;
        summarize_daily(&body.daily.ok_or(WeatherError::NoData)?)
    }
}

//! Data Transfer Objects for the HTTP API.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
use crate::geo::ImageInfo;
use crate::models::{
    AnalysisKind, AnalysisMode, AnalysisRequest, Boundary, DateCandidate, DateWindow, LandClass,
};
use crate::services::job_tracker::{JobStatus, LogEntry};
use crate::services::pipeline::PipelineOptions;
use crate::services::time_series::TrendSeries;
use crate::services::weather::WeatherReport;

/// Sentinel-2 bands averaged when a request names none.
pub const DEFAULT_BANDS: [&str; 5] = ["B2", "B3", "B4", "B8", "B11"];

fn parse_boundary(geometry: &serde_json::Value) -> Result<Boundary, AnalysisError> {
    Ok(Boundary::from_geojson(geometry)?)
}

/// Body of `POST /v1/analyses` and `POST /v1/classification`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequestDto {
    /// GeoJSON geometry or Feature
    pub geometry: serde_json::Value,
    #[serde(default)]
    pub bands: Vec<String>,
    pub mode: AnalysisMode,
    pub date1: NaiveDate,
    #[serde(default)]
    pub date2: Option<NaiveDate>,
    /// Acquisition date picked from an earlier candidate list
    #[serde(default)]
    pub specific_date: Option<NaiveDate>,
    #[serde(default)]
    pub analysis_type: AnalysisKind,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub options: PipelineOptions,
    /// Job slot; a new job cancels the running job of the same slot
    #[serde(default)]
    pub slot: Option<String>,
}

impl AnalysisRequestDto {
    pub fn to_request(&self) -> Result<AnalysisRequest, AnalysisError> {
        let boundary = parse_boundary(&self.geometry)?;
        let mut window = match self.mode {
            AnalysisMode::Range => {
                let end = self.date2.ok_or_else(|| {
                    AnalysisError::InvalidRequest("range mode requires date2".to_string())
                })?;
                DateWindow::range(self.date1, end)?
            }
            AnalysisMode::Single => DateWindow::single(self.date1),
        };
        if let Some(day) = self.specific_date {
            window = window.with_specific(day);
        }

        let bands = if self.bands.is_empty() {
            DEFAULT_BANDS.iter().map(|b| b.to_string()).collect()
        } else {
            self.bands.clone()
        };
        let mut request = AnalysisRequest::new(boundary, bands, window);
        if self.analysis_type == AnalysisKind::Product {
            let product = self.product_id.clone().ok_or_else(|| {
                AnalysisError::InvalidRequest("product analysis requires product_id".to_string())
            })?;
            request = request.for_product(product);
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendRequestDto {
    pub geometry: serde_json::Value,
    /// `dd.mm.yyyy` or ISO date
    pub start: String,
    /// Absent: two months either side of `start`
    #[serde(default)]
    pub end: Option<String>,
    /// Classification year, defaults to the year of `start`
    #[serde(default)]
    pub year: Option<i32>,
}

impl TrendRequestDto {
    pub fn boundary(&self) -> Result<Boundary, AnalysisError> {
        parse_boundary(&self.geometry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendResponse {
    pub year: i32,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub series: TrendSeries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestChangeRequestDto {
    pub geometry: serde_json::Value,
    pub mode: AnalysisMode,
    pub date1: NaiveDate,
    #[serde(default)]
    pub date2: Option<NaiveDate>,
}

impl ForestChangeRequestDto {
    pub fn parts(&self) -> Result<(Boundary, DateWindow), AnalysisError> {
        let boundary = parse_boundary(&self.geometry)?;
        let window = match (self.mode, self.date2) {
            (AnalysisMode::Range, Some(end)) => {
                DateWindow::range(self.date1.min(end), self.date1.max(end))?
            }
            _ => DateWindow::single(self.date1),
        };
        Ok((boundary, window))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatesRequestDto {
    pub geometry: serde_json::Value,
    pub date: NaiveDate,
}

impl CandidatesRequestDto {
    pub fn boundary(&self) -> Result<Boundary, AnalysisError> {
        parse_boundary(&self.geometry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatesResponse {
    /// Clear image on the requested day itself
    pub exact: Option<ImageInfo>,
    pub candidates: Vec<DateCandidate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheClearQuery {
    #[serde(default)]
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub removed: usize,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

/// Weather failures are reported in the body, not as HTTP errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeatherResponse {
    Report(WeatherReport),
    Error { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: u8,
    pub label: String,
    /// Label of id 1 when June imagery separates barley from wheat
    pub label_with_transition: String,
    pub color: String,
    pub palette_index: u8,
}

impl From<LandClass> for ClassInfo {
    fn from(class: LandClass) -> Self {
        Self {
            id: class.id(),
            label: class.label(false).to_string(),
            label_with_transition: class.label(true).to_string(),
            color: class.color().to_string(),
            palette_index: class.palette_index(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Cache store status
    pub cache: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(extra: serde_json::Value) -> AnalysisRequestDto {
        let mut value = serde_json::json!({
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[32.0, 39.0], [32.01, 39.0], [32.01, 39.01], [32.0, 39.0]]]
            },
            "mode": "single",
            "date1": "2024-06-15"
        });
        if let (Some(base), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_fill_bands_and_options() {
        let dto = body(serde_json::json!({}));
        assert_eq!(dto.options, PipelineOptions::default());
        let request = dto.to_request().unwrap();
        assert_eq!(request.bands.len(), DEFAULT_BANDS.len());
        assert_eq!(request.kind, AnalysisKind::Area);
    }

    #[test]
    fn test_range_without_end_is_rejected() {
        let dto = body(serde_json::json!({"mode": "range"}));
        assert!(matches!(
            dto.to_request(),
            Err(AnalysisError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_product_needs_id() {
        let dto = body(serde_json::json!({"analysis_type": "product"}));
        assert!(dto.to_request().is_err());

        let dto = body(serde_json::json!({"analysis_type": "product", "product_id": "32"}));
        assert_eq!(dto.to_request().unwrap().product_id.as_deref(), Some("32"));
    }
}

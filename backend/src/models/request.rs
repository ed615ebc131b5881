//! Immutable analysis request passed between pipeline stages.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::boundary::Boundary;

/// How the user picked dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Range,
    Single,
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisMode::Range => write!(f, "range"),
            AnalysisMode::Single => write!(f, "single"),
        }
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "range" => Ok(Self::Range),
            "single" => Ok(Self::Single),
            _ => Err(format!("Unknown analysis mode: {}", s)),
        }
    }
}

/// Whole-area statistics or a single product (crop class) scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisKind {
    #[default]
    Area,
    Product,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisKind::Area => write!(f, "area"),
            AnalysisKind::Product => write!(f, "product"),
        }
    }
}

impl FromStr for AnalysisKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "area" => Ok(Self::Area),
            "product" => Ok(Self::Product),
            _ => Err(format!("Unknown analysis type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DateWindowError {
    #[error("range mode requires an end date")]
    MissingEnd,
    #[error("range end {end} is before start {start}")]
    Inverted { start: NaiveDate, end: NaiveDate },
    #[error("date {date} shifted by {days} days is out of range")]
    OutOfRange { date: NaiveDate, days: i64 },
}

/// `date` moved by `days` (negative moves back), failing at chrono's limits.
pub fn shift_days(date: NaiveDate, days: i64) -> Result<NaiveDate, DateWindowError> {
    Duration::try_days(days)
        .and_then(|delta| date.checked_add_signed(delta))
        .ok_or(DateWindowError::OutOfRange { date, days })
}

/// Dates of a request.
///
/// `start` is the `date1` of the request and anchors every relative window
/// (trailing comparison, radar, soil moisture) regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub mode: AnalysisMode,
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub specific: Option<NaiveDate>,
}

impl DateWindow {
    pub fn range(start: NaiveDate, end: NaiveDate) -> Result<Self, DateWindowError> {
        if end < start {
            return Err(DateWindowError::Inverted { start, end });
        }
        Ok(Self {
            mode: AnalysisMode::Range,
            start,
            end: Some(end),
            specific: None,
        })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            mode: AnalysisMode::Single,
            start: date,
            end: None,
            specific: None,
        }
    }

    /// Pin a single-date window to an explicitly chosen acquisition date.
    pub fn with_specific(mut self, specific: NaiveDate) -> Self {
        self.specific = Some(specific);
        self
    }

    pub fn validate(&self) -> Result<(), DateWindowError> {
        if self.mode == AnalysisMode::Range {
            let end = self.end.ok_or(DateWindowError::MissingEnd)?;
            if end < self.start {
                return Err(DateWindowError::Inverted {
                    start: self.start,
                    end,
                });
            }
        }
        Ok(())
    }

    pub fn year(&self) -> i32 {
        self.start.year()
    }
}

/// Everything a stats/classification run needs. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub boundary: Boundary,
    pub bands: Vec<String>,
    pub window: DateWindow,
    #[serde(default)]
    pub kind: AnalysisKind,
    #[serde(default)]
    pub product_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(boundary: Boundary, bands: Vec<String>, window: DateWindow) -> Self {
        Self {
            boundary,
            bands,
            window,
            kind: AnalysisKind::Area,
            product_id: None,
        }
    }

    pub fn for_product(mut self, product_id: impl Into<String>) -> Self {
        self.kind = AnalysisKind::Product;
        self.product_id = Some(product_id.into());
        self
    }

    /// Same request with the acquisition date fixed, as after a date pick.
    pub fn with_specific_date(&self, date: NaiveDate) -> Self {
        Self {
            window: self.window.with_specific(date),
            ..self.clone()
        }
    }

    /// Classification year, taken from `date1`.
    pub fn year(&self) -> i32 {
        self.window.year()
    }
}

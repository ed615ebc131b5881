//! Service layer: the analysis components and their orchestration.
//!
//! Services sit between the geospatial seam ([`crate::geo`]), the result
//! cache ([`crate::db`]) and the HTTP layer. Each component is constructed
//! with its collaborators; nothing here is a process-wide singleton.

pub mod candidates;
pub mod change_detector;
pub mod classification;
pub mod histogram;
pub mod job_tracker;
pub mod licensing;
pub mod pipeline;
pub mod soil_moisture;
pub mod stats_aggregator;
pub mod time_series;
pub mod weather;

pub use candidates::CandidateSearch;
pub use change_detector::{ChangeDetector, ChangeResult, Verdict};
pub use classification::{ClassificationEngine, ClassifiedImage};
pub use histogram::{ClassificationOutcome, ClassificationSummary, HistogramSummarizer};
pub use job_tracker::{Job, JobHandle, JobLog, JobStatus, JobTracker, LogEntry, LogLevel};
pub use licensing::{AccessDecision, HttpLicenseGate, LicenseGate, UnlimitedLicense};
pub use pipeline::{AnalysisPipeline, AnalysisReport, PipelineOptions, PipelineOutcome};
pub use stats_aggregator::{StatsAggregator, StatsOutcome};
pub use time_series::{ClassTrend, TimeSeriesExtractor, TrendSeries};
pub use weather::{OpenMeteoClient, WeatherError, WeatherLookup, WeatherReport};

//! Stats → classification → change detection, as one cancellable run.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AnalysisSettings;
use crate::db::ResultCache;
use crate::error::{AnalysisError, AnalysisResult};
use crate::geo::GeoService;
use crate::models::{AnalysisRequest, DateCandidate, StatsResult};

use super::change_detector::{ChangeDetector, ChangeResult};
use super::classification::ClassificationEngine;
use super::histogram::{ClassificationOutcome, HistogramSummarizer};
use super::job_tracker::JobLog;
use super::licensing::LicenseGate;
use super::stats_aggregator::{StatsAggregator, StatsOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Run classification and change detection on cached statistics too.
    #[serde(default)]
    pub chain_when_cached: bool,
    #[serde(default = "default_true")]
    pub classify: bool,
    #[serde(default = "default_true")]
    pub detect_change: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chain_when_cached: false,
            classify: true,
            detect_change: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub stats: StatsResult,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forest_change: Option<ChangeResult>,
    /// Failures of the chained stages; the statistics stand on their own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed(AnalysisReport),
    NeedsDateSelection { candidates: Vec<DateCandidate> },
    Failed { code: String, message: String },
}

impl PipelineOutcome {
    fn failed(err: &AnalysisError) -> Self {
        PipelineOutcome::Failed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

pub struct AnalysisPipeline {
    stats: StatsAggregator,
    engine: ClassificationEngine,
    summarizer: HistogramSummarizer,
    change: ChangeDetector,
}

impl AnalysisPipeline {
    pub fn new(
        geo: Arc<dyn GeoService>,
        cache: ResultCache,
        license: Arc<dyn LicenseGate>,
        settings: AnalysisSettings,
    ) -> Self {
        Self {
            engine: ClassificationEngine::new(geo.clone(), settings.clone()),
            summarizer: HistogramSummarizer::new(geo.clone(), settings.significance_floor_pct),
            change: ChangeDetector::new(geo.clone(), settings.clone()),
            stats: StatsAggregator::new(geo, cache, license, settings),
        }
    }

    pub fn cache(&self) -> &ResultCache {
        self.stats.cache()
    }

    pub fn classifier(&self) -> &ClassificationEngine {
        &self.engine
    }

    pub fn summarizer(&self) -> &HistogramSummarizer {
        &self.summarizer
    }

    pub fn change_detector(&self) -> &ChangeDetector {
        &self.change
    }

    pub async fn run(
        &self,
        request: &AnalysisRequest,
        options: PipelineOptions,
        cancel: &CancellationToken,
        progress: &JobLog,
    ) -> PipelineOutcome {
        match self.run_stages(request, options, cancel, progress).await {
            Ok(outcome) => outcome,
            Err(err) => {
                if !matches!(err, AnalysisError::Cancelled) {
                    progress.warning(format!("Analysis failed: {}", err));
                }
                PipelineOutcome::failed(&err)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &AnalysisRequest,
        options: PipelineOptions,
        cancel: &CancellationToken,
        progress: &JobLog,
    ) -> AnalysisResult<PipelineOutcome> {
        progress.info("Calculating statistics...");
        let (stats, cached) = match self.stats.aggregate(request, cancel).await? {
            StatsOutcome::Computed { stats, cached } => (stats, cached),
            StatsOutcome::NeedsDateSelection { candidates } => {
                progress.warning("No clear image on the selected date, pick a nearby date");
                return Ok(PipelineOutcome::NeedsDateSelection { candidates });
            }
        };
        progress.success(if cached {
            "Statistics loaded from cache"
        } else {
            "Statistics ready"
        });

        let mut report = AnalysisReport {
            stats,
            cached,
            classification: None,
            forest_change: None,
            warnings: Vec::new(),
        };
        if cached && !options.chain_when_cached {
            return Ok(PipelineOutcome::Completed(report));
        }

        if report.stats.is_radar() {
            progress.info("Analysis Complete (Radar Mode).");
            if options.classify {
                report.classification = Some(ClassificationOutcome::RadarMode);
            }
            return Ok(PipelineOutcome::Completed(report));
        }

        if options.classify {
            check(cancel)?;
            progress.info("Classifying vegetation...");
            match self.classify(request).await {
                Ok(outcome) => report.classification = Some(outcome),
                Err(AnalysisError::Cancelled) => return Err(AnalysisError::Cancelled),
                Err(e) => {
                    progress.warning(format!("Classification Error: {}", e));
                    report.warnings.push(e.to_string());
                }
            }
        }

        if options.detect_change {
            check(cancel)?;
            progress.info("Performing Forest Analysis...");
            match self.change.detect(&request.boundary, &request.window).await {
                Ok(change) => {
                    progress.success(change.verdict.description());
                    report.forest_change = Some(change);
                }
                Err(e) => {
                    progress.warning(format!("Forest analysis: {}", e));
                    report.warnings.push(e.to_string());
                }
            }
        }

        check(cancel)?;
        Ok(PipelineOutcome::Completed(report))
    }

    /// Classification summary of the request's year.
    pub async fn classify(&self, request: &AnalysisRequest) -> AnalysisResult<ClassificationOutcome> {
        let Some(classified) = self.engine.build(request.year(), &request.boundary).await? else {
            return Ok(ClassificationOutcome::InsufficientData);
        };
        self.summarizer
            .summarize(
                &classified,
                &request.boundary,
                request.kind,
                request.product_id.as_deref(),
            )
            .await
    }
}

fn check(cancel: &CancellationToken) -> AnalysisResult<()> {
    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    Ok(())
}

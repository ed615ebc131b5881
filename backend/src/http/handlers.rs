//! HTTP handlers for the REST API.
//!
//! Each handler corresponds to an API endpoint and delegates to the
//! service layer for the analysis itself.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::Datelike;
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;

use super::dto::{
    AnalysisRequestDto, CacheClearQuery, CacheClearResponse, CandidatesRequestDto,
    CandidatesResponse, ClassInfo, ForestChangeRequestDto, HealthResponse, JobAccepted,
    JobStatusResponse, TrendRequestDto, TrendResponse, WeatherQuery, WeatherResponse,
};
use super::error::AppError;
use super::state::AppState;
use crate::error::AnalysisError;
use crate::models::LandClass;
use crate::services::histogram::ClassificationOutcome;
use crate::services::job_tracker::{JobLog, JobStatus, LogEntry};
use crate::services::pipeline::PipelineOutcome;
use crate::services::time_series::trend_window;
use crate::services::ChangeResult;

/// Result type for handlers.
pub type HandlerResult<T> = Result<Json<T>, AppError>;

const DEFAULT_SLOT: &str = "analysis";

// =============================================================================
// Health Check
// =============================================================================

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> HandlerResult<HealthResponse> {
    let cache_status = match state.cache().repository().health_check().await {
        Ok(true) => "connected".to_string(),
        Ok(false) => "disconnected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: cache_status,
    }))
}

/// GET /v1/classes
pub async fn list_classes() -> Json<Vec<ClassInfo>> {
    Json(LandClass::ALL.into_iter().map(ClassInfo::from).collect())
}

// =============================================================================
// Analysis jobs
// =============================================================================

/// POST /v1/analyses
///
/// Validates the request, starts the pipeline in the background and returns
/// the job id. A job in the same slot that is still running gets cancelled.
pub async fn start_analysis(
    State(state): State<AppState>,
    Json(body): Json<AnalysisRequestDto>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let request = body.to_request()?;
    let slot = body.slot.clone().unwrap_or_else(|| DEFAULT_SLOT.to_string());
    let handle = state.job_tracker.create_job(&slot);
    let job_id = handle.job_id.clone();

    let tracker = state.job_tracker.clone();
    let pipeline = state.pipeline.clone();
    let options = body.options;
    tokio::spawn(async move {
        let progress = JobLog::new(&tracker, &handle.job_id);
        let outcome = pipeline.run(&request, options, &handle.cancel, &progress).await;
        let value = match serde_json::to_value(&outcome) {
            Ok(value) => value,
            Err(e) => {
                tracker.fail_job(&handle.job_id, format!("Failed to encode result: {}", e));
                return;
            }
        };
        match outcome {
            PipelineOutcome::Completed(_) => tracker.complete_job(&handle.job_id, Some(value)),
            PipelineOutcome::NeedsDateSelection { .. } => {
                tracker.request_input(&handle.job_id, value)
            }
            PipelineOutcome::Failed { message, .. } => tracker.fail_job(&handle.job_id, message),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            message: "Analysis started".to_string(),
        }),
    ))
}

/// GET /v1/jobs/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> HandlerResult<JobStatusResponse> {
    let job = state
        .job_tracker
        .get_job(&job_id)
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job_id)))?;

    Ok(Json(JobStatusResponse {
        job_id: job.job_id,
        status: job.status,
        logs: job.logs,
        result: job.result,
    }))
}

/// DELETE /v1/jobs/{job_id}
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> HandlerResult<JobStatusResponse> {
    if state.job_tracker.get_job(&job_id).is_none() {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }
    if !state.job_tracker.cancel_job(&job_id) {
        log::debug!("Job {} already finished, nothing to cancel", job_id);
    }
    get_job_status(State(state), Path(job_id)).await
}

struct LogCursor {
    sent: usize,
    pending: std::vec::IntoIter<LogEntry>,
    done: bool,
}

/// GET /v1/jobs/{job_id}/logs
///
/// Server-Sent Events stream of the job's log entries, closed by a
/// `complete` event once the job leaves the running state.
pub async fn stream_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    if state.job_tracker.get_job(&job_id).is_none() {
        return Err(AppError::NotFound(format!("Job {} not found", job_id)));
    }

    let tracker = state.job_tracker.clone();
    let cursor = LogCursor {
        sent: 0,
        pending: Vec::new().into_iter(),
        done: false,
    };
    let stream = stream::unfold(cursor, move |mut cursor| {
        let tracker = tracker.clone();
        let job_id = job_id.clone();
        async move {
            loop {
                if let Some(entry) = cursor.pending.next() {
                    let data = serde_json::to_string(&entry).unwrap_or_default();
                    return Some((Ok(Event::default().data(data)), cursor));
                }
                if cursor.done {
                    return None;
                }

                let logs = tracker.get_logs(&job_id);
                let fresh: Vec<LogEntry> = logs.iter().skip(cursor.sent).cloned().collect();
                cursor.sent = logs.len();
                if !fresh.is_empty() {
                    cursor.pending = fresh.into_iter();
                    continue;
                }

                match tracker.get_job(&job_id) {
                    Some(job) if job.status != JobStatus::Running => {
                        cursor.done = true;
                        let final_event = serde_json::json!({
                            "status": job.status,
                            "result": job.result,
                        });
                        let event = Event::default()
                            .event("complete")
                            .data(serde_json::to_string(&final_event).unwrap_or_default());
                        return Some((Ok(event), cursor));
                    }
                    Some(_) => tokio::time::sleep(Duration::from_millis(200)).await,
                    None => return None,
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(1))
            .text("keep-alive"),
    ))
}

// =============================================================================
// Direct analyses
// =============================================================================

/// POST /v1/classification
pub async fn classify(
    State(state): State<AppState>,
    Json(body): Json<AnalysisRequestDto>,
) -> HandlerResult<ClassificationOutcome> {
    let request = body.to_request()?;
    Ok(Json(state.pipeline.classify(&request).await?))
}

/// POST /v1/trends
pub async fn class_trends(
    State(state): State<AppState>,
    Json(body): Json<TrendRequestDto>,
) -> HandlerResult<TrendResponse> {
    let boundary = body.boundary()?;
    let (start, end) = trend_window(&body.start, body.end.as_deref())?;
    let year = body.year.unwrap_or_else(|| start.year());

    let classified = state
        .pipeline
        .classifier()
        .build(year, &boundary)
        .await?
        .ok_or_else(|| {
            AnalysisError::ImageUnavailable(format!("No classification imagery for {}", year))
        })?;
    let series = state.trends.extract(&classified, &boundary, start, end).await?;

    Ok(Json(TrendResponse {
        year,
        start,
        end,
        series,
    }))
}

/// POST /v1/forest-change
pub async fn forest_change(
    State(state): State<AppState>,
    Json(body): Json<ForestChangeRequestDto>,
) -> HandlerResult<ChangeResult> {
    let (boundary, window) = body.parts()?;
    let change = state
        .pipeline
        .change_detector()
        .detect(&boundary, &window)
        .await?;
    Ok(Json(change))
}

/// POST /v1/candidates
pub async fn date_candidates(
    State(state): State<AppState>,
    Json(body): Json<CandidatesRequestDto>,
) -> HandlerResult<CandidatesResponse> {
    let boundary = body.boundary()?;
    let exact = state.candidates.find_exact_match(&boundary, body.date).await;
    let candidates = if exact.is_some() {
        Vec::new()
    } else {
        state.candidates.find_candidates(&boundary, body.date).await
    };
    Ok(Json(CandidatesResponse { exact, candidates }))
}

// =============================================================================
// Maintenance and auxiliary data
// =============================================================================

/// DELETE /v1/cache?days=N
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<CacheClearQuery>,
) -> HandlerResult<CacheClearResponse> {
    let days = query.days.unwrap_or(state.cache_prune_days);
    if days < 0 {
        return Err(AppError::BadRequest("days must not be negative".to_string()));
    }
    let removed = state.cache().clear_old(days).await;
    Ok(Json(CacheClearResponse { removed, days }))
}

/// GET /v1/weather
pub async fn weather(
    State(state): State<AppState>,
    Query(query): Query<WeatherQuery>,
) -> Json<WeatherResponse> {
    let response = match state
        .weather
        .fetch_weather(query.lat, query.lon, query.start, query.end)
        .await
    {
        Ok(report) => WeatherResponse::Report(report),
        Err(e) => {
            log::warn!("Weather lookup failed: {}", e);
            WeatherResponse::Error {
                error: e.to_string(),
            }
        }
    };
    Json(response)
}

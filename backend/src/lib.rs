//! # Agroneo
//!
//! Agronomic analytics over Sentinel-1/2 imagery for a user-drawn field or
//! region: band and index statistics with an optical → radar fallback, a
//! 13-class rule-based crop/land-cover classification, per-class index time
//! series and year-over-year woody cover change.
//!
//! All pixel work runs on a remote geospatial query service behind the
//! [`geo::GeoService`] trait; this crate builds the expression trees, batches
//! the reductions and turns the answers into typed results.
//!
//! ## Architecture
//!
//! - [`models`]: boundaries, requests, class table, statistics records
//! - [`imagery`]: spectral indices, cloud masking, collection filters and the
//!   band-math expression tree
//! - [`geo`]: the remote service seam (HTTP client and in-memory emulator)
//! - [`db`]: result cache repositories (in-memory, SQLite)
//! - [`services`]: analysis components, licensing, weather, jobs, pipeline
//! - [`http`]: Axum REST surface (feature `http-server`)
//! - [`config`], [`error`]: configuration loading and the error taxonomy

// RepositoryError carries rich context for debugging
#![allow(clippy::result_large_err)]

pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod imagery;
pub mod models;
pub mod services;

#[cfg(feature = "http-server")]
pub mod http;

pub use config::AppConfig;
pub use error::{AnalysisError, AnalysisResult};

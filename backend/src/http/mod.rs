//! REST surface over the analysis services (feature `http-server`).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  HTTP Layer (axum handlers)                               │
//! │  - request parsing, GeoJSON boundaries, date windows      │
//! │  - background analysis jobs with SSE progress             │
//! └───────────────────┬──────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────────────┐
//! │  Service Layer (crate::services)                          │
//! │  - pipeline, classification, trends, change detection     │
//! └───────────────────┬──────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────────────────┐
//! │  GeoService / CacheRepository / LicenseGate seams         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The parent module is only compiled with `http-server`.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use router::create_router;
pub use state::AppState;

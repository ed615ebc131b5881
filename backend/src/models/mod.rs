//! Domain models shared across services, the cache and the HTTP layer.

pub mod boundary;
pub mod classes;
pub mod request;
pub mod stats;

pub use boundary::{Boundary, BoundaryError, BoundingBox};
pub use classes::{LandClass, PALETTE};
pub use request::{
    shift_days, AnalysisKind, AnalysisMode, AnalysisRequest, DateWindow, DateWindowError,
};
pub use stats::{CandidateSide, DataSource, DateCandidate, StatsResult};

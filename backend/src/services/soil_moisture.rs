//! Radar soil-moisture proxy.
//!
//! `VV + 0.53·VH` over a ±6 day Sentinel-1 median, smoothed with a 30 m
//! focal median and rescaled from [-25, -10] dB onto [0, 1]. This is a
//! heuristic wetness indicator, not calibrated volumetric soil moisture.

use chrono::NaiveDate;

use crate::imagery::{CompositeBuilder, ImageExpr};
use crate::models::{shift_days, Boundary, DateWindowError};

pub const SMI_BAND: &str = "SMI";
pub const VH_WEIGHT: f64 = 0.53;
pub const DRY_DB: f64 = -25.0;
pub const WET_DB: f64 = -10.0;
const HALF_WINDOW_DAYS: i64 = 6;
const SMOOTHING_RADIUS_M: f64 = 30.0;

/// Proxy of one backscatter pair, clamped to [0, 1].
pub fn soil_moisture_index(vv_db: f64, vh_db: f64) -> f64 {
    ((vv_db + VH_WEIGHT * vh_db - DRY_DB) / (WET_DB - DRY_DB)).clamp(0.0, 1.0)
}

/// Per-pixel proxy raster around `center`.
pub fn soil_moisture_image(boundary: &Boundary, center: NaiveDate) -> Result<ImageExpr, DateWindowError> {
    let radar = CompositeBuilder::new(boundary)
        .radar(
            shift_days(center, -HALF_WINDOW_DAYS)?,
            shift_days(center, HALF_WINDOW_DAYS)?,
            &["VV", "VH"],
        )
        .focal_median(SMOOTHING_RADIUS_M);
    Ok(radar
        .select(&["VV"])
        .add(radar.select(&["VH"]).multiply(VH_WEIGHT))
        .subtract(DRY_DB)
        .divide(WET_DB - DRY_DB)
        .clamp(0.0, 1.0)
        .rename(&[SMI_BAND]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_index_range() {
        assert_eq!(soil_moisture_index(-40.0, -40.0), 0.0);
        assert_eq!(soil_moisture_index(0.0, 0.0), 1.0);
        // -12 + 0.53 * -20 = -22.6
        assert_relative_eq!(soil_moisture_index(-12.0, -20.0), 2.4 / 15.0, epsilon = 1e-12);
    }

    #[test]
    fn test_window_at_calendar_edge_is_rejected() {
        let field = Boundary::point(33.0, 39.0);
        assert!(soil_moisture_image(&field, NaiveDate::MIN).is_err());
        assert!(soil_moisture_image(&field, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()).is_ok());
    }
}

//! Sentinel-2 QA60 cloud and cirrus masking.

use super::expr::Pixel;

pub const QA_BAND: &str = "QA60";
pub const CLOUD_BIT: u32 = 1 << 10;
pub const CIRRUS_BIT: u32 = 1 << 11;

/// Whether a QA60 value has neither the opaque-cloud nor the cirrus bit set.
pub fn is_clear(qa: f64) -> bool {
    if !qa.is_finite() || qa < 0.0 {
        return false;
    }
    (qa as u32) & (CLOUD_BIT | CIRRUS_BIT) == 0
}

/// Drop a pixel flagged as cloud or cirrus. Pixels without a QA band pass.
pub fn mask_pixel(pixel: Pixel) -> Option<Pixel> {
    match pixel.get(QA_BAND) {
        Some(qa) if !is_clear(qa) => None,
        _ => Some(pixel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits() {
        assert!(is_clear(0.0));
        assert!(is_clear((1 << 9) as f64));
        assert!(!is_clear(CLOUD_BIT as f64));
        assert!(!is_clear(CIRRUS_BIT as f64));
        assert!(!is_clear((CLOUD_BIT | CIRRUS_BIT) as f64));
    }

    #[test]
    fn test_mask_pixel() {
        let cloudy = Pixel::from_pairs(&[("B4", 900.0), (QA_BAND, 1024.0)]);
        let clear = Pixel::from_pairs(&[("B4", 900.0), (QA_BAND, 0.0)]);
        let no_qa = Pixel::from_pairs(&[("VV", -12.0)]);
        assert!(mask_pixel(cloudy).is_none());
        assert_eq!(mask_pixel(clear).unwrap().get("B4"), Some(900.0));
        assert!(mask_pixel(no_qa).is_some());
    }
}

//! Spectral indices over Sentinel-2 band values.
//!
//! Every index has a scalar form (used on regional band means) and an
//! [`ImageExpr`] form (used for per-pixel rasters evaluated remotely). Both
//! return 0 on a zero denominator rather than NaN or an error.

use std::collections::BTreeMap;

use super::expr::ImageExpr;

/// Indices the system derives from multispectral imagery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectralIndex {
    /// Normalized Difference Vegetation Index, `(B8 - B4) / (B8 + B4)`.
    Ndvi,
    /// McFeeters water index, `(B3 - B8) / (B3 + B8)`.
    Ndwi,
    /// Built-up index, `(B11 - B8) / (B11 + B8)`.
    Ndbi,
    /// Moisture index, `(B8 - B11) / (B8 + B11)`.
    Ndmi,
    /// Gao water-content index, `(B8 - B11) / (B8 + B11)`. Reported as NDWI
    /// in trend series.
    NdwiGao,
    /// Bare Soil Index, `((B11 + B4) - (B8 + B2)) / ((B11 + B4) + (B8 + B2))`.
    Bsi,
    Gndvi,
    Ndre,
    Rendvi,
    /// Enhanced Vegetation Index on reflectance in [0, 1].
    Evi,
    /// Soil Adjusted Vegetation Index, `L = 0.5`.
    Savi,
}

impl SpectralIndex {
    /// Indices reported on a statistics record.
    pub const DERIVED: [SpectralIndex; 5] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Ndwi,
        SpectralIndex::Ndbi,
        SpectralIndex::Ndmi,
        SpectralIndex::Bsi,
    ];

    /// Indices sampled per class in a trend series, in band order.
    pub const TREND: [SpectralIndex; 7] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Gndvi,
        SpectralIndex::NdwiGao,
        SpectralIndex::Ndre,
        SpectralIndex::Rendvi,
        SpectralIndex::Evi,
        SpectralIndex::Savi,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndwi | SpectralIndex::NdwiGao => "NDWI",
            SpectralIndex::Ndbi => "NDBI",
            SpectralIndex::Ndmi => "NDMI",
            SpectralIndex::Bsi => "BSI",
            SpectralIndex::Gndvi => "GNDVI",
            SpectralIndex::Ndre => "NDRE",
            SpectralIndex::Rendvi => "RENDVI",
            SpectralIndex::Evi => "EVI",
            SpectralIndex::Savi => "SAVI",
        }
    }

    /// Bands the index reads.
    pub fn bands(self) -> &'static [&'static str] {
        match self {
            SpectralIndex::Ndvi => &["B8", "B4"],
            SpectralIndex::Ndwi => &["B3", "B8"],
            SpectralIndex::Ndbi | SpectralIndex::Ndmi | SpectralIndex::NdwiGao => &["B8", "B11"],
            SpectralIndex::Bsi => &["B11", "B4", "B8", "B2"],
            SpectralIndex::Gndvi => &["B8", "B3"],
            SpectralIndex::Ndre => &["B8", "B5"],
            SpectralIndex::Rendvi => &["B6", "B5"],
            SpectralIndex::Evi => &["B8", "B4", "B2"],
            SpectralIndex::Savi => &["B8", "B4"],
        }
    }

    /// Scalar value from band means, or `None` if a band is missing.
    pub fn compute(self, bands: &BTreeMap<String, f64>) -> Option<f64> {
        let b = |name: &str| bands.get(name).copied();
        let value = match self {
            SpectralIndex::Ndvi => ndvi(b("B8")?, b("B4")?),
            SpectralIndex::Ndwi => ndwi(b("B3")?, b("B8")?),
            SpectralIndex::Ndbi => ndbi(b("B11")?, b("B8")?),
            SpectralIndex::Ndmi | SpectralIndex::NdwiGao => ndmi(b("B8")?, b("B11")?),
            SpectralIndex::Bsi => bsi(b("B11")?, b("B4")?, b("B8")?, b("B2")?),
            SpectralIndex::Gndvi => normalized_difference(b("B8")?, b("B3")?),
            SpectralIndex::Ndre => normalized_difference(b("B8")?, b("B5")?),
            SpectralIndex::Rendvi => normalized_difference(b("B6")?, b("B5")?),
            SpectralIndex::Evi => evi(b("B8")?, b("B4")?, b("B2")?),
            SpectralIndex::Savi => savi(b("B8")?, b("B4")?),
        };
        Some(value)
    }

    /// Per-pixel expression over `image`, renamed to the index name.
    ///
    /// EVI and SAVI expect reflectance scaled to [0, 1].
    pub fn expr(self, image: &ImageExpr) -> ImageExpr {
        let band = |name: &str| image.select(&[name]);
        let raw = match self {
            SpectralIndex::Ndvi => image.normalized_difference("B8", "B4"),
            SpectralIndex::Ndwi => image.normalized_difference("B3", "B8"),
            SpectralIndex::Ndbi => image.normalized_difference("B11", "B8"),
            SpectralIndex::Ndmi | SpectralIndex::NdwiGao => {
                image.normalized_difference("B8", "B11")
            }
            SpectralIndex::Gndvi => image.normalized_difference("B8", "B3"),
            SpectralIndex::Ndre => image.normalized_difference("B8", "B5"),
            SpectralIndex::Rendvi => image.normalized_difference("B6", "B5"),
            SpectralIndex::Bsi => {
                let a = band("B11").add(band("B4"));
                let b = band("B8").add(band("B2"));
                a.subtract(b.clone()).divide(a.add(b))
            }
            SpectralIndex::Evi => {
                let (nir, red, blue) = (band("B8"), band("B4"), band("B2"));
                let denom = nir
                    .add(red.multiply(6.0))
                    .subtract(blue.multiply(7.5))
                    .add(1.0);
                nir.subtract(red).divide(denom).multiply(2.5)
            }
            SpectralIndex::Savi => {
                let (nir, red) = (band("B8"), band("B4"));
                nir.subtract(red.clone())
                    .divide(nir.add(red).add(0.5))
                    .multiply(1.5)
            }
        };
        raw.rename(&[self.name()])
    }
}

/// `(a - b) / (a + b)`, 0 when the denominator is zero.
pub fn normalized_difference(a: f64, b: f64) -> f64 {
    ratio(a - b, a + b)
}

/// `n / d`, 0 when `d` is zero.
pub fn ratio(n: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else {
        n / d
    }
}

pub fn ndvi(nir: f64, red: f64) -> f64 {
    normalized_difference(nir, red)
}

pub fn ndwi(green: f64, nir: f64) -> f64 {
    normalized_difference(green, nir)
}

pub fn ndbi(swir: f64, nir: f64) -> f64 {
    normalized_difference(swir, nir)
}

pub fn ndmi(nir: f64, swir: f64) -> f64 {
    normalized_difference(nir, swir)
}

pub fn bsi(swir: f64, red: f64, nir: f64, blue: f64) -> f64 {
    normalized_difference(swir + red, nir + blue)
}

pub fn evi(nir: f64, red: f64, blue: f64) -> f64 {
    2.5 * ratio(nir - red, nir + 6.0 * red - 7.5 * blue + 1.0)
}

pub fn savi(nir: f64, red: f64) -> f64 {
    1.5 * ratio(nir - red, nir + red + 0.5)
}

/// All [`SpectralIndex::DERIVED`] indices computable from `bands`.
pub fn derive_indices(bands: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    SpectralIndex::DERIVED
        .iter()
        .filter_map(|index| index.compute(bands).map(|v| (index.name().to_string(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bands(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_zero_denominator_is_zero_for_every_index() {
        assert_eq!(normalized_difference(0.0, 0.0), 0.0);
        assert_eq!(ratio(0.0, 0.0), 0.0);
        assert_eq!(ndvi(0.0, 0.0), 0.0);
        assert_eq!(ndwi(0.0, 0.0), 0.0);
        assert_eq!(ndbi(0.0, 0.0), 0.0);
        assert_eq!(ndmi(0.0, 0.0), 0.0);
        assert_eq!(bsi(0.0, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(savi(-0.25, -0.25), 0.0);
        assert_eq!(evi(-1.0, 0.0, 0.0), 0.0);

        let zeros = bands(&[
            ("B2", 0.0),
            ("B3", 0.0),
            ("B4", 0.0),
            ("B5", 0.0),
            ("B6", 0.0),
            ("B8", 0.0),
            ("B11", 0.0),
        ]);
        for index in SpectralIndex::DERIVED.iter().chain(SpectralIndex::TREND.iter()) {
            let value = index.compute(&zeros).unwrap();
            assert!(value.is_finite(), "{} produced {}", index.name(), value);
        }
    }

    #[test]
    fn test_ndvi_value() {
        assert_relative_eq!(ndvi(3000.0, 1000.0), 0.5);
        assert_relative_eq!(ndwi(1000.0, 3000.0), -0.5);
    }

    #[test]
    fn test_derive_skips_indices_with_missing_bands() {
        let derived = derive_indices(&bands(&[("B4", 1000.0), ("B8", 3000.0)]));
        assert_eq!(derived.len(), 1);
        assert_relative_eq!(derived["NDVI"], 0.5);

        let derived = derive_indices(&bands(&[
            ("B2", 500.0),
            ("B3", 800.0),
            ("B4", 1000.0),
            ("B8", 3000.0),
            ("B11", 2000.0),
        ]));
        assert_eq!(derived.len(), 5);
        assert_relative_eq!(derived["NDBI"], -derived["NDMI"]);
        assert_relative_eq!(derived["BSI"], (3000.0 - 3500.0) / 6500.0);
    }
}

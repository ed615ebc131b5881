//! Geographic boundary of a field or area of interest.
//!
//! A [`Boundary`] is the GeoJSON geometry drawn by the user. It is immutable
//! and passed by value to every component; its canonical JSON text is part of
//! the cache fingerprint.

use serde::{Deserialize, Serialize};

/// A GeoJSON point or polygon in WGS84 longitude/latitude order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Boundary {
    Point([f64; 2]),
    Polygon(Vec<Vec<[f64; 2]>>),
}

/// Axis-aligned bounding box `(min_lon, min_lat, max_lon, max_lat)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BoundaryError {
    #[error("boundary is not valid GeoJSON: {0}")]
    Malformed(String),
    #[error("polygon has no exterior ring")]
    EmptyPolygon,
    #[error("polygon ring needs at least 4 positions, got {0}")]
    RingTooShort(usize),
    #[error("coordinate ({lon}, {lat}) is outside WGS84 bounds")]
    OutOfRange { lon: f64, lat: f64 },
}

impl Boundary {
    pub fn point(lon: f64, lat: f64) -> Self {
        Boundary::Point([lon, lat])
    }

    /// Build a polygon from an exterior ring, closing it if needed.
    pub fn polygon(mut exterior: Vec<[f64; 2]>) -> Self {
        if let (Some(first), Some(last)) = (exterior.first().copied(), exterior.last().copied()) {
            if first != last {
                exterior.push(first);
            }
        }
        Boundary::Polygon(vec![exterior])
    }

    /// Parse a boundary from a GeoJSON geometry or a Feature wrapping one.
    pub fn from_geojson(value: &serde_json::Value) -> Result<Self, BoundaryError> {
        let geometry = value.get("geometry").unwrap_or(value);
        let boundary: Boundary = serde_json::from_value(geometry.clone())
            .map_err(|e| BoundaryError::Malformed(e.to_string()))?;
        boundary.validate()?;
        Ok(boundary)
    }

    pub fn validate(&self) -> Result<(), BoundaryError> {
        match self {
            Boundary::Point(p) => check_position(p),
            Boundary::Polygon(rings) => {
                let exterior = rings.first().ok_or(BoundaryError::EmptyPolygon)?;
                for ring in rings {
                    if ring.len() < 4 {
                        return Err(BoundaryError::RingTooShort(ring.len()));
                    }
                    ring.iter().try_for_each(check_position)?;
                }
                if exterior.is_empty() {
                    return Err(BoundaryError::EmptyPolygon);
                }
                Ok(())
            }
        }
    }

    /// Canonical JSON text used when fingerprinting requests.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let positions: Vec<[f64; 2]> = match self {
            Boundary::Point(p) => vec![*p],
            Boundary::Polygon(rings) => rings.iter().flatten().copied().collect(),
        };
        positions.iter().fold(
            BoundingBox {
                min_lon: f64::INFINITY,
                min_lat: f64::INFINITY,
                max_lon: f64::NEG_INFINITY,
                max_lat: f64::NEG_INFINITY,
            },
            |bb, [lon, lat]| BoundingBox {
                min_lon: bb.min_lon.min(*lon),
                min_lat: bb.min_lat.min(*lat),
                max_lon: bb.max_lon.max(*lon),
                max_lat: bb.max_lat.max(*lat),
            },
        )
    }

    /// Representative `(lat, lon)` used for weather lookups.
    ///
    /// Vertex average of the exterior ring (closing vertex excluded).
    pub fn centroid(&self) -> (f64, f64) {
        match self {
            Boundary::Point([lon, lat]) => (*lat, *lon),
            Boundary::Polygon(rings) => {
                let ring = rings.first().map(Vec::as_slice).unwrap_or(&[]);
                let open = match ring {
                    [head @ .., last] if Some(last) == ring.first() && !head.is_empty() => head,
                    _ => ring,
                };
                if open.is_empty() {
                    return (0.0, 0.0);
                }
                let n = open.len() as f64;
                let (lon, lat) = open
                    .iter()
                    .fold((0.0, 0.0), |(x, y), [lon, lat]| (x + lon, y + lat));
                (lat / n, lon / n)
            }
        }
    }
}

fn check_position(p: &[f64; 2]) -> Result<(), BoundaryError> {
    let [lon, lat] = *p;
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(BoundaryError::OutOfRange { lon, lat });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Boundary {
        Boundary::polygon(vec![[32.0, 39.0], [32.1, 39.0], [32.1, 39.1], [32.0, 39.1]])
    }

    #[test]
    fn test_polygon_is_closed() {
        match square() {
            Boundary::Polygon(rings) => {
                assert_eq!(rings[0].len(), 5);
                assert_eq!(rings[0].first(), rings[0].last());
            }
            other => panic!("expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_from_feature_unwraps_geometry() {
        let feature = json!({
            "type": "Feature",
            "properties": {},
            "geometry": {"type": "Point", "coordinates": [35.0, 39.0]}
        });
        let boundary = Boundary::from_geojson(&feature).unwrap();
        assert_eq!(boundary, Boundary::point(35.0, 39.0));
    }

    #[test]
    fn test_rejects_short_ring() {
        let geometry = json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]]});
        assert_eq!(
            Boundary::from_geojson(&geometry),
            Err(BoundaryError::RingTooShort(3))
        );
    }

    #[test]
    fn test_rejects_out_of_range() {
        let geometry = json!({"type": "Point", "coordinates": [200.0, 0.0]});
        assert!(matches!(
            Boundary::from_geojson(&geometry),
            Err(BoundaryError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_canonical_json_is_stable() {
        assert_eq!(square().canonical_json(), square().canonical_json());
        assert!(square().canonical_json().starts_with("{\"type\":\"Polygon\""));
    }

    #[test]
    fn test_centroid_and_bbox() {
        let (lat, lon) = square().centroid();
        assert!((lat - 39.05).abs() < 1e-9);
        assert!((lon - 32.05).abs() < 1e-9);

        let bb = square().bounding_box();
        assert_eq!(bb.min_lon, 32.0);
        assert_eq!(bb.max_lat, 39.1);
    }
}

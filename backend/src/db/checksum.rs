//! Content fingerprints used as cache keys.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::models::{AnalysisKind, AnalysisMode, Boundary};

/// SHA-256 of `content` as lowercase hex.
pub fn fingerprint_text(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key of a statistics request.
///
/// Hashes `"{boundary}_{date1}_{date2}_{mode}_{kind}"` where a missing
/// `date2` renders as `None`. Requested bands and a pinned acquisition date
/// are not part of the key.
pub fn request_fingerprint(
    boundary: &Boundary,
    date1: NaiveDate,
    date2: Option<NaiveDate>,
    mode: AnalysisMode,
    kind: AnalysisKind,
) -> String {
    let date2 = date2
        .map(|d| d.to_string())
        .unwrap_or_else(|| "None".to_string());
    fingerprint_text(&format!(
        "{}_{}_{}_{}_{}",
        boundary.canonical_json(),
        date1,
        date2,
        mode,
        kind
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_fingerprint_consistency() {
        let content = r#"{"test": "data"}"#;
        assert_eq!(fingerprint_text(content), fingerprint_text(content));
        assert_eq!(fingerprint_text(content).len(), 64);
    }

    #[test]
    fn test_every_key_component_matters() {
        let field = Boundary::point(33.0, 39.0);
        let base = request_fingerprint(&field, d("2024-06-01"), None, AnalysisMode::Single, AnalysisKind::Area);

        assert_eq!(
            base,
            request_fingerprint(&field, d("2024-06-01"), None, AnalysisMode::Single, AnalysisKind::Area)
        );
        assert_ne!(
            base,
            request_fingerprint(&Boundary::point(33.0, 39.5), d("2024-06-01"), None, AnalysisMode::Single, AnalysisKind::Area)
        );
        assert_ne!(
            base,
            request_fingerprint(&field, d("2024-06-02"), None, AnalysisMode::Single, AnalysisKind::Area)
        );
        assert_ne!(
            base,
            request_fingerprint(&field, d("2024-06-01"), Some(d("2024-07-01")), AnalysisMode::Single, AnalysisKind::Area)
        );
        assert_ne!(
            base,
            request_fingerprint(&field, d("2024-06-01"), None, AnalysisMode::Range, AnalysisKind::Area)
        );
        assert_ne!(
            base,
            request_fingerprint(&field, d("2024-06-01"), None, AnalysisMode::Single, AnalysisKind::Product)
        );
    }
}

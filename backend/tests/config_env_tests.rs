//! Configuration file discovery and environment overrides.

mod support;

use std::fs;

use agroneo::db::RepositoryError;
use agroneo::AppConfig;
use support::with_scoped_env;

const OVERRIDES: [&str; 7] = [
    "CACHE_BACKEND",
    "CACHE_PATH",
    "GEO_ENDPOINT",
    "GEO_API_KEY",
    "LICENSE_ENDPOINT",
    "HOST",
    "PORT",
];

fn cleared<'a>(extra: &[(&'a str, Option<&'a str>)]) -> Vec<(&'a str, Option<&'a str>)> {
    let mut changes: Vec<(&'a str, Option<&'a str>)> = OVERRIDES.iter().map(|k| (*k, None)).collect();
    changes.extend_from_slice(extra);
    changes
}

#[test]
fn test_explicit_config_file_with_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("agroneo.toml");
    fs::write(
        &path,
        r#"
        [cache]
        backend = "sqlite"
        prune_after_days = 3

        [licensing]
        endpoint = "https://licenses.example.org"
        trial_credits = 5

        [server]
        port = 9000
        "#,
    )
    .unwrap();
    let path_str = path.to_string_lossy().to_string();

    let config = with_scoped_env(
        &cleared(&[("AGRONEO_CONFIG", Some(path_str.as_str())), ("PORT", Some("9100"))]),
        AppConfig::load,
    )
    .unwrap();

    assert_eq!(config.cache.backend, "sqlite");
    assert_eq!(config.cache.prune_after_days, 3);
    assert_eq!(
        config.licensing.endpoint.as_deref(),
        Some("https://licenses.example.org")
    );
    assert_eq!(config.licensing.trial_credits, 5);
    assert_eq!(config.server.port, 9100);
    assert_eq!(config.server.host, "0.0.0.0");
}

#[test]
fn test_env_overrides_apply_over_defaults() {
    let mut config = AppConfig::default();
    with_scoped_env(
        &cleared(&[
            ("CACHE_BACKEND", Some("sqlite")),
            ("GEO_API_KEY", Some("secret")),
            ("PORT", Some("not-a-port")),
        ]),
        || config.apply_env(),
    );

    assert_eq!(config.cache.backend, "sqlite");
    assert_eq!(config.geo.api_key.as_deref(), Some("secret"));
    // unparsable port keeps the default
    assert_eq!(config.server.port, 8080);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let err = with_scoped_env(
        &cleared(&[("AGRONEO_CONFIG", Some("/nonexistent/agroneo.toml"))]),
        AppConfig::load,
    )
    .unwrap_err();
    assert!(matches!(err, RepositoryError::ConfigurationError { .. }));
}

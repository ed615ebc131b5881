//! Credit-based access gate.
//!
//! Users are identified by a v4 UUID kept in a small JSON identity file. The
//! remote document store holds `{credits, role, last_access}` per user.
//! Decisions are cached in memory (admins 60 min, everyone else 5 min) and
//! any failure to reach the store fails open.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::LicensingSettings;

pub const OFFLINE_MESSAGE: &str = "Server unreachable. Offline mode active.";

const USER_TTL_MIN: i64 = 5;
const ADMIN_TTL_MIN: i64 = 60;
const ADMIN_CREDITS: i64 = 999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    pub message: String,
}

impl AccessDecision {
    pub fn allow(message: impl Into<String>) -> Self {
        Self {
            allowed: true,
            message: message.into(),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            message: message.into(),
        }
    }
}

/// Gate consulted before every statistics computation.
#[async_trait]
pub trait LicenseGate: Send + Sync {
    /// Never fails: an unreachable gate allows access.
    async fn check_access(&self) -> AccessDecision;

    /// Consume one credit. Failures are logged and dropped.
    async fn decrement_credit(&self);

    fn user_id(&self) -> &str;
}

/// Gate that always allows. Counts consumed credits for inspection.
#[derive(Debug, Default)]
pub struct UnlimitedLicense {
    consumed: AtomicUsize,
}

impl UnlimitedLicense {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumed(&self) -> usize {
        self.consumed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LicenseGate for UnlimitedLicense {
    async fn check_access(&self) -> AccessDecision {
        AccessDecision::allow("Unlimited local license.")
    }

    async fn decrement_credit(&self) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }

    fn user_id(&self) -> &str {
        "local"
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    user_id: String,
    #[serde(default)]
    created_at: Option<String>,
}

/// Read the persistent user id, creating the identity file when it is missing
/// or unreadable. A failed write still returns the fresh id.
pub fn load_or_create_user_id(path: &Path) -> String {
    if let Ok(text) = std::fs::read_to_string(path) {
        match serde_json::from_str::<IdentityFile>(&text) {
            Ok(identity) => return identity.user_id,
            Err(e) => log::warn!("Ignoring unreadable identity file {}: {}", path.display(), e),
        }
    }

    let identity = IdentityFile {
        user_id: uuid::Uuid::new_v4().to_string(),
        created_at: Some(Utc::now().to_rfc3339()),
    };
    let written = serde_json::to_string(&identity)
        .map_err(|e| e.to_string())
        .and_then(|json| std::fs::write(path, json).map_err(|e| e.to_string()));
    if let Err(e) = written {
        log::warn!("Could not save identity file {}: {}", path.display(), e);
    }
    identity.user_id
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserRecord {
    #[serde(default)]
    credits: i64,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_access: Option<String>,
}

/// Last remote answer, reused until `valid_until`.
#[derive(Debug, Clone, Default)]
struct CachedAccess {
    valid_until: Option<DateTime<Utc>>,
    credits: i64,
    admin: bool,
}

impl CachedAccess {
    fn decision(&self, now: DateTime<Utc>) -> Option<AccessDecision> {
        let valid_until = self.valid_until?;
        if now >= valid_until {
            return None;
        }
        Some(if self.credits > 0 {
            AccessDecision::allow(format!("Remaining credits: {} (Cached)", self.credits))
        } else {
            AccessDecision::deny("Trial period expired. (Cached)")
        })
    }

    fn refresh(&mut self, credits: i64, admin: bool, now: DateTime<Utc>) {
        let ttl = if admin { ADMIN_TTL_MIN } else { USER_TTL_MIN };
        self.credits = credits;
        self.admin = admin;
        self.valid_until = Some(now + Duration::minutes(ttl));
    }
}

/// Gate backed by a REST JSON document store (`{endpoint}/users/{id}.json`).
pub struct HttpLicenseGate {
    client: Client,
    endpoint: String,
    user_id: String,
    trial_credits: i64,
    cached: Mutex<CachedAccess>,
}

impl HttpLicenseGate {
    pub fn new(endpoint: impl Into<String>, user_id: impl Into<String>, trial_credits: i64) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            trial_credits,
            cached: Mutex::new(CachedAccess::default()),
        })
    }

    pub fn from_settings(endpoint: &str, settings: &LicensingSettings) -> reqwest::Result<Self> {
        let user_id = load_or_create_user_id(&settings.identity_path());
        Self::new(endpoint, user_id, settings.trial_credits)
    }

    fn user_url(&self) -> String {
        format!("{}/users/{}.json", self.endpoint, self.user_id)
    }

    async fn query_remote(&self) -> reqwest::Result<AccessDecision> {
        let record: Option<UserRecord> = self
            .client
            .get(self.user_url())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let now = Utc::now();

        let Some(record) = record else {
            let fresh = UserRecord {
                credits: self.trial_credits,
                role: Some("user".to_string()),
                last_access: Some(now.to_rfc3339()),
            };
            self.client
                .put(self.user_url())
                .json(&fresh)
                .send()
                .await?
                .error_for_status()?;
            self.cached.lock().refresh(self.trial_credits, false, now);
            return Ok(AccessDecision::allow(format!(
                "New User: {} trial credits assigned.",
                self.trial_credits
            )));
        };

        if record.role.as_deref() == Some("admin") {
            self.cached.lock().refresh(ADMIN_CREDITS, true, now);
            return Ok(AccessDecision::allow("Admin Access: Unlimited."));
        }

        self.cached.lock().refresh(record.credits, false, now);
        Ok(if record.credits > 0 {
            AccessDecision::allow(format!("Remaining credits: {}", record.credits))
        } else {
            AccessDecision::deny("Trial period expired. Please contact administrator.")
        })
    }
}

#[async_trait]
impl LicenseGate for HttpLicenseGate {
    async fn check_access(&self) -> AccessDecision {
        if let Some(decision) = self.cached.lock().decision(Utc::now()) {
            return decision;
        }
        match self.query_remote().await {
            Ok(decision) => decision,
            Err(e) => {
                log::warn!("License check failed, allowing offline: {}", e);
                AccessDecision::allow(OFFLINE_MESSAGE)
            }
        }
    }

    async fn decrement_credit(&self) {
        let credits = {
            let mut cached = self.cached.lock();
            if cached.admin {
                return;
            }
            if cached.credits > 0 {
                cached.credits -= 1;
            }
            cached.credits
        };

        let result = self
            .client
            .patch(self.user_url())
            .json(&serde_json::json!({ "credits": credits }))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            log::warn!("Credit decrement failed: {}", e);
        }
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_file_is_created_then_reused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id.json");

        let first = load_or_create_user_id(&path);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
        assert!(path.exists());
        assert_eq!(load_or_create_user_id(&path), first);
    }

    #[test]
    fn test_corrupt_identity_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("id.json");
        std::fs::write(&path, "not json").unwrap();

        let id = load_or_create_user_id(&path);
        assert_eq!(load_or_create_user_id(&path), id);
    }

    #[test]
    fn test_cached_decision_expires() {
        let now = Utc::now();
        let mut cached = CachedAccess::default();
        assert!(cached.decision(now).is_none());

        cached.refresh(3, false, now);
        let decision = cached.decision(now + Duration::minutes(4)).unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.message, "Remaining credits: 3 (Cached)");
        assert!(cached.decision(now + Duration::minutes(5)).is_none());

        cached.refresh(0, false, now);
        assert!(!cached.decision(now).unwrap().allowed);

        cached.refresh(ADMIN_CREDITS, true, now);
        assert!(cached.decision(now + Duration::minutes(59)).is_some());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_open() {
        let gate = HttpLicenseGate::new("http://127.0.0.1:9", "user-1", 15).unwrap();
        let decision = gate.check_access().await;
        assert!(decision.allowed);
        assert_eq!(decision.message, OFFLINE_MESSAGE);
        // must not panic or block
        gate.decrement_credit().await;
        assert_eq!(gate.user_id(), "user-1");
    }

    #[tokio::test]
    async fn test_unlimited_counts_credits() {
        let gate = UnlimitedLicense::new();
        assert!(gate.check_access().await.allowed);
        gate.decrement_credit().await;
        gate.decrement_credit().await;
        assert_eq!(gate.consumed(), 2);
    }
}

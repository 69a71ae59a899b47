//! Best-effort notifications to an external dashboard.
//!
//! After a successful write the store may tell a remote endpoint which item
//! changed. Each request runs on its own thread with a bounded timeout and is
//! never part of the consistency contract:
//! - `POST {endpoint}/sync-item` with `{"itemId", "team"}`
//! - `POST {endpoint}/team-register` with the team metadata
//!
//! Non-200/404 responses are logged as warnings. Timeouts and connection
//! failures are logged at debug level only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

const USER_AGENT: &str = concat!("backlog/", env!("CARGO_PKG_VERSION"));

/// How a notification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Delivered,
    /// Endpoint does not know the item or team; not worth a warning
    NotFound,
    Rejected(u16),
    Unreachable,
}

/// Handle to an in-flight notification.
#[derive(Debug)]
pub struct SyncHandle(Option<JoinHandle<SyncOutcome>>);

impl SyncHandle {
    /// Block until the request finishes or times out.
    pub fn wait(self) -> Option<SyncOutcome> {
        let handle = self.0?;
        handle.join().ok()
    }
}

/// Team metadata sent on registration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRegistration {
    pub team: String,
    pub id_prefix: String,
    pub version: String,
    pub registered_at: DateTime<Utc>,
}

impl TeamRegistration {
    pub fn new(team: &str, id_prefix: &str, now: DateTime<Utc>) -> Self {
        Self {
            team: team.to_string(),
            id_prefix: id_prefix.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            registered_at: now,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncNotifier {
    endpoint: String,
    team: String,
    timeout: Duration,
}

impl SyncNotifier {
    /// Build a notifier, or `None` when no endpoint is configured.
    pub fn new(endpoint: Option<&str>, team: &str, timeout_ms: u64) -> Option<Self> {
        let endpoint = endpoint?.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return None;
        }
        Some(Self {
            endpoint: endpoint.to_string(),
            team: team.to_string(),
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fire `POST /sync-item` in the background.
    pub fn notify_item(&self, item_id: &str) -> SyncHandle {
        let body = serde_json::json!({
            "itemId": item_id,
            "team": self.team,
        });
        self.spawn("sync-item", body)
    }

    /// Fire `POST /team-register` in the background.
    pub fn register_team(&self, registration: &TeamRegistration) -> SyncHandle {
        match serde_json::to_value(registration) {
            Ok(body) => self.spawn("team-register", body),
            Err(e) => {
                tracing::warn!(error = %e, "Could not encode team registration");
                SyncHandle(None)
            }
        }
    }

    fn spawn(&self, path: &'static str, body: serde_json::Value) -> SyncHandle {
        let url = format!("{}/{}", self.endpoint, path);
        let timeout = self.timeout;
        let spawned = thread::Builder::new()
            .name(format!("bl-sync-{}", path))
            .spawn(move || post(&url, body, timeout));
        match spawned {
            Ok(handle) => SyncHandle(Some(handle)),
            Err(e) => {
                tracing::warn!(error = %e, "Could not start sync thread");
                SyncHandle(None)
            }
        }
    }
}

fn post(url: &str, body: serde_json::Value, timeout: Duration) -> SyncOutcome {
    let agent = ureq::AgentBuilder::new()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build();

    match agent.post(url).send_json(body) {
        Ok(resp) if resp.status() == 200 => {
            tracing::debug!(url, "Sync delivered");
            SyncOutcome::Delivered
        }
        Ok(resp) => {
            tracing::warn!(url, status = resp.status(), "Sync endpoint returned unexpected status");
            SyncOutcome::Rejected(resp.status())
        }
        Err(ureq::Error::Status(404, _)) => SyncOutcome::NotFound,
        Err(ureq::Error::Status(code, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            tracing::warn!(url, status = code, %body, "Sync endpoint rejected request");
            SyncOutcome::Rejected(code)
        }
        Err(e) => {
            tracing::debug!(url, error = %e, "Sync endpoint unreachable");
            SyncOutcome::Unreachable
        }
    }
}

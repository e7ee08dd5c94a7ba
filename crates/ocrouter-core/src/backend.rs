use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A discovered OpenCode serve instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    /// Loopback TCP port the instance listens on.
    pub port: u16,
    /// Display name, derived from the last segment of `project_path`.
    pub project_name: String,
    /// Absolute filesystem path reported by the instance.
    pub project_path: String,
    /// Hostname-safe identifier derived from `project_path`.
    pub slug: String,
    /// Version string from the instance's health endpoint.
    pub version: String,
    /// When the instance last answered a probe.
    pub last_seen: DateTime<Utc>,
}

impl Backend {
    /// Whether the backend was probed recently enough to be considered live.
    #[must_use]
    pub fn healthy(&self, stale_after: Duration) -> bool {
        Utc::now()
            .signed_duration_since(self.last_seen)
            .to_std()
            .map_or(true, |age| age < stale_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(last_seen: DateTime<Utc>) -> Backend {
        Backend {
            port: 4096,
            project_name: "proj".to_string(),
            project_path: "/home/alice/proj".to_string(),
            slug: "proj".to_string(),
            version: "1.0.0".to_string(),
            last_seen,
        }
    }

    #[test]
    fn fresh_backend_is_healthy() {
        assert!(backend(Utc::now()).healthy(Duration::from_secs(30)));
    }

    #[test]
    fn old_backend_is_stale() {
        let seen = Utc::now() - chrono::Duration::seconds(60);
        assert!(!backend(seen).healthy(Duration::from_secs(30)));
    }
}

use std::time::Duration;

use anyhow::bail;

/// Router configuration.
///
/// Produced by the CLI layer, consumed everywhere else. `Default` yields
/// the production defaults; callers overlay flag values and then
/// [`validate`](Config::validate) before wiring anything up.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the router listens on.
    pub listen_port: u16,
    /// Full bind address, e.g. `0.0.0.0:8080`.
    pub listen_addr: String,
    /// Username embedded in mDNS hostnames and matched during host-based
    /// routing.
    pub username: String,
    /// First port of the scan range (inclusive).
    pub scan_port_start: u16,
    /// Last port of the scan range (inclusive).
    pub scan_port_end: u16,
    /// Period between scan passes.
    pub scan_interval: Duration,
    /// Maximum concurrent port probes per pass.
    pub scan_concurrency: usize,
    /// HTTP timeout for each probe request.
    pub probe_timeout: Duration,
    /// How long a backend may go unseen before removal.
    pub stale_after: Duration,
    /// Whether to advertise backends over mDNS.
    pub enable_mdns: bool,
    /// DNS-SD service type to advertise.
    pub mdns_service_type: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            listen_addr: "0.0.0.0:8080".to_string(),
            username: default_username(),
            scan_port_start: 30000,
            scan_port_end: 31000,
            scan_interval: Duration::from_secs(5),
            scan_concurrency: 20,
            probe_timeout: Duration::from_millis(800),
            stale_after: Duration::from_secs(30),
            enable_mdns: true,
            mdns_service_type: "_opencode._tcp".to_string(),
        }
    }
}

impl Config {
    /// Checks the configuration for obvious errors.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen_port == 0 {
            bail!("listen port must be 1-65535, got 0");
        }
        if self.scan_port_start == 0 {
            bail!("scan port start must be 1-65535, got 0");
        }
        if self.scan_port_end < self.scan_port_start {
            bail!(
                "scan port end ({}) must be >= start ({})",
                self.scan_port_end,
                self.scan_port_start
            );
        }
        if self.username.is_empty() {
            bail!("username must not be empty");
        }
        if self.scan_interval < Duration::from_secs(1) {
            bail!("scan interval must be >= 1s, got {:?}", self.scan_interval);
        }
        if self.scan_concurrency == 0 {
            bail!("scan concurrency must be >= 1");
        }
        Ok(())
    }

    /// The mDNS hostname for a project slug: `{slug}-{username}.local`.
    #[must_use]
    pub fn domain_for(&self, slug: &str) -> String {
        format!("{slug}-{}.local", self.username)
    }
}

fn default_username() -> String {
    let name = whoami::username();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            username: "alice".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_scan_range() {
        let config = Config {
            scan_port_start: 31000,
            scan_port_end: 30000,
            ..valid()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("must be >= start"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_empty_username() {
        let config = Config {
            username: String::new(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_subsecond_scan_interval() {
        let config = Config {
            scan_interval: Duration::from_millis(500),
            ..valid()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains(">= 1s"), "unexpected error: {err}");
    }

    #[test]
    fn rejects_zero_ports() {
        let config = Config {
            listen_port: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = Config {
            scan_port_start: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn domain_embeds_username() {
        assert_eq!(valid().domain_for("myapp"), "myapp-alice.local");
    }
}

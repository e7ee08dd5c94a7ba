use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use ocrouter_core::{base_name, Config, Registry};

/// Shape of `GET /global/health` on a probed instance.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    healthy: bool,
    #[serde(default)]
    version: String,
}

/// Shape of `GET /project/current` on a probed instance. The reported name
/// is ignored: the display name is always derived from the path so it
/// matches the slug.
#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    path: String,
}

/// Periodically probes a loopback port range for OpenCode serve instances
/// and keeps the registry in sync with what it finds.
#[derive(Clone)]
pub struct Scanner {
    registry: Arc<Registry>,
    port_start: u16,
    port_end: u16,
    interval: Duration,
    concurrency: usize,
    client: reqwest::Client,
}

impl Scanner {
    pub fn new(registry: Arc<Registry>, config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()?;

        Ok(Self {
            registry,
            port_start: config.scan_port_start,
            port_end: config.scan_port_end,
            interval: config.scan_interval,
            concurrency: config.scan_concurrency,
            client,
        })
    }

    /// Runs the scan loop until the token is cancelled. Scans once
    /// immediately, then on every interval tick.
    pub async fn run(&self, token: CancellationToken) {
        info!(
            port_start = self.port_start,
            port_end = self.port_end,
            interval = ?self.interval,
            concurrency = self.concurrency,
            "scanner started"
        );

        self.scan(&token).await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick resolves immediately

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("scanner stopped");
                    return;
                }
                _ = ticker.tick() => self.scan(&token).await,
            }
        }
    }

    /// One pass: probe every port in the range with bounded concurrency,
    /// wait for all probes, then prune backends that went unseen too long.
    pub(crate) async fn scan(&self, token: &CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut probes = JoinSet::new();

        for port in self.port_start..=self.port_end {
            if token.is_cancelled() {
                return;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                return;
            };

            let scanner = self.clone();
            let token = token.clone();
            probes.spawn(async move {
                let _permit = permit;
                scanner.probe_port(&token, port).await;
            });
        }

        while probes.join_next().await.is_some() {}

        let removed = self.registry.prune();
        if !removed.is_empty() {
            info!(count = removed.len(), slugs = ?removed, "pruned stale backends");
        }
    }

    /// Checks whether an OpenCode instance answers on the given port.
    ///
    /// Failures are silent: most ports in the range are simply not
    /// OpenCode, and logging every miss would drown out everything else.
    async fn probe_port(&self, token: &CancellationToken, port: u16) {
        let base = format!("http://127.0.0.1:{port}");

        let health = tokio::select! {
            _ = token.cancelled() => return,
            health = self.fetch_health(&base) => match health {
                Some(health) if health.healthy => health,
                _ => return,
            },
        };

        let project = tokio::select! {
            _ = token.cancelled() => return,
            project = self.fetch_project(&base) => project,
        };

        let Some(project) = project else {
            // Healthy but no project info: keep the instance under a
            // synthetic identity rather than losing it.
            self.registry.upsert(
                port,
                &format!("port-{port}"),
                &format!("/unknown/port-{port}"),
                &health.version,
            );
            return;
        };

        let path = if project.path.is_empty() {
            format!("/unknown/{}", project.id)
        } else {
            project.path
        };
        let name = base_name(&path);

        self.registry.upsert(port, name, &path, &health.version);
    }

    async fn fetch_health(&self, base: &str) -> Option<HealthResponse> {
        let response = self.client.get(format!("{base}/global/health")).send().await.ok()?;
        if response.status() != reqwest::StatusCode::OK {
            return None;
        }
        response.json().await.ok()
    }

    async fn fetch_project(&self, base: &str) -> Option<ProjectResponse> {
        let response = self
            .client
            .get(format!("{base}/project/current"))
            .send()
            .await
            .ok()?;
        if response.status() != reqwest::StatusCode::OK {
            return None;
        }
        response.json().await.ok()
    }
}

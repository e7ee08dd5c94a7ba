//! # ocrouter-server
//!
//! Daemon wiring for the OpenCode router. Three drivers share one registry
//! and one shutdown signal:
//!
//! 1. the **scanner** sweeps a loopback port range and upserts discovered
//!    OpenCode instances;
//! 2. the **advertiser** reconciles mDNS registrations against registry
//!    snapshots, ticking slightly after the scanner;
//! 3. the **HTTP server** routes incoming traffic to backends by host or
//!    path prefix, answers the control API, and falls back to a dashboard.
//!
//! [`run`] blocks until Ctrl-C, then tears down mDNS registrations and
//! drains the HTTP server within a bounded window.

#![warn(clippy::await_holding_lock)]
#![warn(unreachable_pub)]

pub mod advertiser;
pub mod proxy;
pub mod scanner;

mod api;
mod dashboard;

#[cfg(test)]
mod advertiser_test;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ocrouter_core::{Config, Registry};

use crate::advertiser::{Advertiser, MdnsRegistrar};
use crate::scanner::Scanner;

/// Runs the router until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let registry = Arc::new(Registry::new(config.stale_after));
    let token = CancellationToken::new();

    let scanner = Scanner::new(Arc::clone(&registry), &config)?;
    let scan_task = tokio::spawn({
        let token = token.clone();
        async move { scanner.run(token).await }
    });

    let advertiser = if config.enable_mdns {
        match MdnsRegistrar::new() {
            Ok(registrar) => Some(Arc::new(Advertiser::new(
                Box::new(registrar),
                Arc::clone(&config),
            ))),
            Err(e) => {
                warn!("mDNS unavailable: {e}; continuing without advertisement");
                None
            }
        }
    } else {
        None
    };

    let advertise_task = advertiser.as_ref().map(|advertiser| {
        let advertiser = Arc::clone(advertiser);
        let registry = Arc::clone(&registry);
        let token = token.clone();
        // Tick one second after the scanner so each sync usually sees the
        // freshest scan results.
        let period = config.scan_interval + Duration::from_secs(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick resolves immediately
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => advertiser.sync(&registry.all()),
                }
            }
        })
    });

    let app = proxy::make_app(Arc::clone(&registry), Arc::clone(&config));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    let shutdown_token = token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received shutdown signal"),
        result = &mut server => {
            match result {
                Ok(Ok(())) => info!("HTTP server exited"),
                Ok(Err(e)) => error!("HTTP server error: {e}"),
                Err(e) => error!("HTTP server task panicked: {e}"),
            }
        }
    }

    token.cancel();

    if let Some(advertiser) = &advertiser {
        advertiser.shutdown();
    }

    if !server.is_finished() {
        // Bounded drain: in-flight requests get five seconds, then abort.
        if tokio::time::timeout(Duration::from_secs(5), &mut server)
            .await
            .is_err()
        {
            debug!("graceful shutdown timed out; aborting in-flight requests");
            server.abort();
        }
    }

    let _ = scan_task.await;
    if let Some(task) = advertise_task {
        let _ = task.await;
    }

    info!("OpenCode router stopped");
    Ok(())
}

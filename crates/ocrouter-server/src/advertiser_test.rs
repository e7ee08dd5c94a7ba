use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use chrono::Utc;

use ocrouter_core::{Backend, Config};

use crate::advertiser::{Advertiser, Registrar, ServiceAd};

/// Registrar that records calls instead of touching the network.
#[derive(Clone, Default)]
struct RecordingRegistrar {
    inner: Arc<RecorderInner>,
}

#[derive(Default)]
struct RecorderInner {
    registered: Mutex<Vec<ServiceAd>>,
    unregistered: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingRegistrar {
    fn registered(&self) -> Vec<ServiceAd> {
        self.inner.registered.lock().unwrap().clone()
    }

    fn unregistered(&self) -> Vec<String> {
        self.inner.unregistered.lock().unwrap().clone()
    }

    fn set_failing(&self, failing: bool) {
        self.inner.fail.store(failing, Ordering::SeqCst);
    }
}

impl Registrar for RecordingRegistrar {
    fn register(&self, ad: &ServiceAd) -> anyhow::Result<String> {
        if self.inner.fail.load(Ordering::SeqCst) {
            bail!("registration refused");
        }
        self.inner.registered.lock().unwrap().push(ad.clone());
        Ok(format!("{}.{}.local.", ad.instance, ad.service_type))
    }

    fn unregister(&self, handle: &str) {
        self.inner.unregistered.lock().unwrap().push(handle.to_string());
    }
}

fn backend(slug: &str, port: u16, version: &str) -> Backend {
    Backend {
        port,
        project_name: slug.to_string(),
        project_path: format!("/home/alice/{slug}"),
        slug: slug.to_string(),
        version: version.to_string(),
        last_seen: Utc::now(),
    }
}

fn advertiser_with(recorder: &RecordingRegistrar) -> Advertiser {
    let config = Config {
        username: "alice".to_string(),
        listen_port: 9999,
        ..Config::default()
    };
    Advertiser::new(Box::new(recorder.clone()), Arc::new(config))
}

#[test]
fn sync_registers_each_backend_once() {
    let recorder = RecordingRegistrar::default();
    let advertiser = advertiser_with(&recorder);
    let snapshot = vec![backend("a", 4096, "1"), backend("b", 4097, "1")];

    advertiser.sync(&snapshot);
    assert_eq!(recorder.registered().len(), 2);

    // Re-syncing the same snapshot reuses the live handles.
    advertiser.sync(&snapshot);
    assert_eq!(recorder.registered().len(), 2);
    assert!(recorder.unregistered().is_empty());
}

#[test]
fn sync_tears_down_vanished_backends() {
    let recorder = RecordingRegistrar::default();
    let advertiser = advertiser_with(&recorder);

    advertiser.sync(&[backend("a", 4096, "1"), backend("b", 4097, "1")]);
    advertiser.sync(&[backend("a", 4096, "1")]);

    assert_eq!(recorder.registered().len(), 2);
    let unregistered = recorder.unregistered();
    assert_eq!(unregistered.len(), 1);
    assert!(unregistered[0].starts_with("b."), "wrong handle: {}", unregistered[0]);
}

#[test]
fn failed_registrations_are_retried_on_the_next_sync() {
    let recorder = RecordingRegistrar::default();
    let advertiser = advertiser_with(&recorder);
    let snapshot = vec![backend("a", 4096, "1")];

    recorder.set_failing(true);
    advertiser.sync(&snapshot);
    assert!(recorder.registered().is_empty());

    recorder.set_failing(false);
    advertiser.sync(&snapshot);
    assert_eq!(recorder.registered().len(), 1);
}

#[test]
fn advertisement_points_at_the_router_not_the_backend() {
    let recorder = RecordingRegistrar::default();
    let advertiser = advertiser_with(&recorder);

    advertiser.sync(&[backend("my-app", 4096, "1.2.3")]);

    let ads = recorder.registered();
    let ad = &ads[0];
    assert_eq!(ad.instance, "my-app");
    assert_eq!(ad.service_type, "_opencode._tcp");
    assert_eq!(ad.hostname, "my-app-alice.local");
    assert_eq!(ad.port, 9999, "must advertise the router's listen port");

    let txt = |key: &str| {
        ad.txt
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(txt("project").as_deref(), Some("my-app"));
    assert_eq!(txt("path").as_deref(), Some("/home/alice/my-app"));
    assert_eq!(txt("backend").as_deref(), Some("127.0.0.1:4096"));
    assert_eq!(txt("owner").as_deref(), Some("alice"));
    assert_eq!(txt("version").as_deref(), Some("1.2.3"));
}

#[test]
fn version_txt_record_is_omitted_when_empty() {
    let recorder = RecordingRegistrar::default();
    let advertiser = advertiser_with(&recorder);

    advertiser.sync(&[backend("a", 4096, "")]);

    let ads = recorder.registered();
    assert!(ads[0].txt.iter().all(|(k, _)| k != "version"));
}

#[test]
fn shutdown_tears_down_everything_and_is_idempotent() {
    let recorder = RecordingRegistrar::default();
    let advertiser = advertiser_with(&recorder);

    advertiser.sync(&[backend("a", 4096, "1"), backend("b", 4097, "1")]);
    advertiser.shutdown();
    assert_eq!(recorder.unregistered().len(), 2);

    advertiser.shutdown();
    assert_eq!(recorder.unregistered().len(), 2);

    // A later sync can re-register from scratch.
    advertiser.sync(&[backend("a", 4096, "1")]);
    assert_eq!(recorder.registered().len(), 3);
}

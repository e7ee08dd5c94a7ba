use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, error, info};

use ocrouter_core::{Backend, Config};

/// A single DNS-SD registration request: one per live backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAd {
    /// Instance name (the backend's slug).
    pub instance: String,
    /// Service type, e.g. `_opencode._tcp`.
    pub service_type: String,
    /// Hostname for the A record: `{slug}-{username}.local`.
    pub hostname: String,
    /// Address the A record points at.
    pub ip: IpAddr,
    /// Advertised port. This is the *router's* listen port, not the
    /// backend's: clients connect to the router, which then routes by host
    /// or path.
    pub port: u16,
    /// TXT metadata.
    pub txt: Vec<(String, String)>,
}

/// Seam between reconciliation and the mDNS stack.
///
/// Production goes through [`MdnsRegistrar`]; tests substitute a recorder
/// so sync behavior is observable without touching the network.
pub trait Registrar: Send + Sync {
    /// Registers a service, returning an opaque handle for later teardown.
    fn register(&self, ad: &ServiceAd) -> Result<String>;
    /// Tears down a previously registered service.
    fn unregister(&self, handle: &str);
}

/// Registrar backed by a real mDNS responder daemon.
pub struct MdnsRegistrar {
    daemon: ServiceDaemon,
}

impl MdnsRegistrar {
    pub fn new() -> Result<Self> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
        })
    }
}

impl Registrar for MdnsRegistrar {
    fn register(&self, ad: &ServiceAd) -> Result<String> {
        let service_type = format!("{}.local.", ad.service_type);
        let hostname = format!("{}.", ad.hostname);
        let txt: HashMap<String, String> = ad.txt.iter().cloned().collect();

        let service = ServiceInfo::new(
            &service_type,
            &ad.instance,
            &hostname,
            ad.ip,
            ad.port,
            txt,
        )?;
        let fullname = service.get_fullname().to_string();
        self.daemon.register(service)?;
        Ok(fullname)
    }

    fn unregister(&self, handle: &str) {
        if let Err(e) = self.daemon.unregister(handle) {
            debug!(handle, error = %e, "mDNS unregister failed");
        }
    }
}

/// Keeps one mDNS service registration alive per discovered backend.
///
/// Driven by a ticker slightly offset from the scanner so each sync
/// usually sees the freshest scan results.
pub struct Advertiser {
    registrar: Box<dyn Registrar>,
    config: Arc<Config>,
    outbound_ip: IpAddr,
    /// slug → registration handle for everything currently advertised.
    services: Mutex<HashMap<String, String>>,
}

impl Advertiser {
    pub fn new(registrar: Box<dyn Registrar>, config: Arc<Config>) -> Self {
        Self {
            registrar,
            config,
            outbound_ip: outbound_ip(),
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Reconciles live registrations against a registry snapshot:
    /// vanished slugs are torn down, new slugs are registered, and
    /// unchanged ones keep their existing handle untouched.
    pub fn sync(&self, backends: &[Backend]) {
        let mut services = self.services.lock().expect("advertiser lock poisoned");

        let current: HashSet<&str> = backends.iter().map(|b| b.slug.as_str()).collect();

        let vanished: Vec<String> = services
            .keys()
            .filter(|slug| !current.contains(slug.as_str()))
            .cloned()
            .collect();
        for slug in vanished {
            if let Some(handle) = services.remove(&slug) {
                self.registrar.unregister(&handle);
                info!(slug = %slug, "mDNS service removed");
            }
        }

        for backend in backends {
            if services.contains_key(&backend.slug) {
                continue;
            }
            let ad = self.ad_for(backend);
            match self.registrar.register(&ad) {
                Ok(handle) => {
                    info!(
                        slug = %backend.slug,
                        host = %ad.hostname,
                        ip = %ad.ip,
                        port = ad.port,
                        "mDNS service registered"
                    );
                    services.insert(backend.slug.clone(), handle);
                }
                // Leave the slug absent so the next sync retries it.
                Err(e) => error!(slug = %backend.slug, error = %e, "mDNS registration failed"),
            }
        }
    }

    fn ad_for(&self, backend: &Backend) -> ServiceAd {
        let mut txt = vec![
            ("project".to_string(), backend.project_name.clone()),
            ("path".to_string(), backend.project_path.clone()),
            ("backend".to_string(), format!("127.0.0.1:{}", backend.port)),
            ("owner".to_string(), self.config.username.clone()),
        ];
        if !backend.version.is_empty() {
            txt.push(("version".to_string(), backend.version.clone()));
        }

        ServiceAd {
            instance: backend.slug.clone(),
            service_type: self.config.mdns_service_type.clone(),
            hostname: self.config.domain_for(&backend.slug),
            ip: self.outbound_ip,
            port: self.config.listen_port,
            txt,
        }
    }

    /// Tears down every live registration. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut services = self.services.lock().expect("advertiser lock poisoned");
        for (slug, handle) in services.drain() {
            self.registrar.unregister(&handle);
            debug!(slug = %slug, "mDNS service shut down");
        }
        info!("all mDNS services shut down");
    }
}

/// Preferred outbound IP of this machine, `127.0.0.1` when detection
/// fails. Connecting a UDP socket selects a route without sending any
/// packets.
#[must_use]
pub fn outbound_ip() -> IpAddr {
    let fallback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let Ok(socket) = UdpSocket::bind("0.0.0.0:0") else {
        return fallback;
    };
    if socket.connect("8.8.8.8:80").is_err() {
        return fallback;
    }
    socket.local_addr().map_or(fallback, |addr| addr.ip())
}

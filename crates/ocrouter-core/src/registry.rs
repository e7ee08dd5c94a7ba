use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tracing::info;

use crate::backend::Backend;
use crate::slug::slugify;

/// Thread-safe store of discovered OpenCode backends.
///
/// Keyed primarily by slug, with a port index for detecting instances that
/// changed projects or moved ports between scans. Every read path returns
/// owned copies, so callers never hold references into registry state and
/// the lock is released before they look at the data.
pub struct Registry {
    inner: RwLock<Inner>,
    stale_after: Duration,
}

#[derive(Default)]
struct Inner {
    by_slug: HashMap<String, Backend>,
    by_port: HashMap<u16, String>,
}

impl Registry {
    #[must_use]
    pub fn new(stale_after: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            stale_after,
        }
    }

    /// Adds or updates a backend. Returns `true` for a new entry.
    ///
    /// Three situations are told apart:
    /// * the port now serves a different project: the old slug is dropped
    ///   and the new project is inserted fresh;
    /// * the slug is already known for the same path or the same port: the
    ///   entry is updated in place (following the backend to a new port if
    ///   it moved);
    /// * a different project produces the same slug: the newcomer is
    ///   disambiguated by appending its port.
    pub fn upsert(&self, port: u16, project_name: &str, project_path: &str, version: &str) -> bool {
        let mut slug = slugify(project_path);

        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Inner { by_slug, by_port } = &mut *inner;

        if let Some(old_slug) = by_port.get(&port) {
            if *old_slug != slug {
                let old_slug = old_slug.clone();
                by_slug.remove(&old_slug);
                info!(port, old_slug = %old_slug, new_slug = %slug, "backend project changed");
            }
        }

        if let Some(existing) = by_slug.get_mut(&slug) {
            if existing.project_path == project_path || existing.port == port {
                if existing.port != port {
                    by_port.remove(&existing.port);
                }
                existing.port = port;
                existing.project_name = project_name.to_string();
                existing.project_path = project_path.to_string();
                existing.version = version.to_string();
                existing.last_seen = Utc::now();
                by_port.insert(port, slug);
                return false;
            }
            // Different project, same slug: disambiguate with the port.
            slug = format!("{slug}-{port}");
        }

        by_slug.insert(
            slug.clone(),
            Backend {
                port,
                project_name: project_name.to_string(),
                project_path: project_path.to_string(),
                slug: slug.clone(),
                version: version.to_string(),
                last_seen: Utc::now(),
            },
        );
        by_port.insert(port, slug.clone());
        info!(slug = %slug, port, project = project_name, "backend registered");
        true
    }

    /// Removes backends that have not been seen within `stale_after`.
    /// Returns the slugs that were dropped.
    pub fn prune(&self) -> Vec<String> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let Inner { by_slug, by_port } = &mut *inner;

        let stale: Vec<String> = by_slug
            .iter()
            .filter(|(_, backend)| !backend.healthy(self.stale_after))
            .map(|(slug, _)| slug.clone())
            .collect();

        for slug in &stale {
            if let Some(backend) = by_slug.remove(slug) {
                by_port.remove(&backend.port);
                info!(slug = %slug, port = backend.port, "backend removed (stale)");
            }
        }
        stale
    }

    /// Finds a backend by slug.
    #[must_use]
    pub fn lookup(&self, slug: &str) -> Option<Backend> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_slug.get(slug).cloned()
    }

    /// Finds a backend by the port it listens on.
    #[must_use]
    pub fn lookup_by_port(&self, port: u16) -> Option<Backend> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let slug = inner.by_port.get(&port)?;
        inner.by_slug.get(slug).cloned()
    }

    /// Finds a backend by project path: exact match first, then a fallback
    /// through slug derivation. External agents get both resolution
    /// strategies without needing to know how slugs are formed.
    #[must_use]
    pub fn lookup_by_path(&self, project_path: &str) -> Option<Backend> {
        let inner = self.inner.read().expect("registry lock poisoned");

        if let Some(backend) = inner
            .by_slug
            .values()
            .find(|backend| backend.project_path == project_path)
        {
            return Some(backend.clone());
        }

        inner.by_slug.get(&slugify(project_path)).cloned()
    }

    /// Snapshot of all backends.
    #[must_use]
    pub fn all(&self) -> Vec<Backend> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_slug.values().cloned().collect()
    }

    /// All registered slugs.
    #[must_use]
    pub fn slugs(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.by_slug.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").by_slug.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

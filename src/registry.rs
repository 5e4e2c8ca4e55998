//! Service registry
//!
//! Maps (HTTP method, URI pattern) to a service definition. Lookups run
//! against an immutable [`RegistrySnapshot`] held in an `ArcSwap`, so
//! readers never take a lock and never see a half-applied reload. Writers
//! are serialized by a mutex, build a new snapshot and swap it in whole.

use crate::service::ServiceDefinition;
use crate::uri_pattern::{find_best_match, UriPattern, Variables};
use arc_swap::ArcSwap;
use http::Method;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Result of a successful lookup
#[derive(Debug, Clone)]
pub struct MatchingService {
    pub service: Arc<ServiceDefinition>,
    pub pattern: UriPattern,
    pub variables: Variables,
}

impl MatchingService {
    pub fn service(&self) -> &Arc<ServiceDefinition> {
        &self.service
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    pattern: UriPattern,
    service: Arc<ServiceDefinition>,
}

#[derive(Debug, Clone)]
struct MethodTable {
    method: Method,
    /// Declaration order
    entries: Vec<RegistryEntry>,
    /// Literal pattern string -> index into `entries`
    exact: HashMap<String, usize>,
}

impl MethodTable {
    fn new(method: Method) -> Self {
        MethodTable {
            method,
            entries: Vec::new(),
            exact: HashMap::new(),
        }
    }

    fn lookup(&self, path: &str) -> Option<MatchingService> {
        if let Some(&index) = self.exact.get(path) {
            let entry = &self.entries[index];
            return Some(MatchingService {
                service: Arc::clone(&entry.service),
                pattern: entry.pattern.clone(),
                variables: Variables::new(),
            });
        }

        let (index, variables) =
            find_best_match(self.entries.iter().map(|e| &e.pattern), path)?;
        let entry = &self.entries[index];
        Some(MatchingService {
            service: Arc::clone(&entry.service),
            pattern: entry.pattern.clone(),
            variables,
        })
    }

    fn matches_path(&self, path: &str) -> bool {
        self.exact.contains_key(path) || self.entries.iter().any(|e| e.pattern.matches(path))
    }
}

/// An immutable view of every registration
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    tables: BTreeMap<String, MethodTable>,
    version: u64,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under (`pattern`, `method`)
    ///
    /// An existing registration for the same pattern and method is
    /// replaced with a warning. Returns true when something was replaced.
    pub fn register(
        &mut self,
        service: Arc<ServiceDefinition>,
        pattern: UriPattern,
        method: Method,
    ) -> bool {
        let table = self
            .tables
            .entry(method.as_str().to_string())
            .or_insert_with(|| MethodTable::new(method.clone()));

        if let Some(existing) = table.entries.iter_mut().find(|e| e.pattern == pattern) {
            warn!(
                method = %method,
                pattern = %pattern,
                previous = existing.service.id(),
                service = service.id(),
                "Duplicate service registration, replacing previous service"
            );
            existing.service = service;
            return true;
        }

        if pattern.is_literal() {
            table
                .exact
                .insert(pattern.as_str().to_string(), table.entries.len());
        }
        debug!(method = %method, pattern = %pattern, service = service.id(), "Registered service");
        table.entries.push(RegistryEntry { pattern, service });
        false
    }

    /// Look up the service for `path` and `method`
    ///
    /// HEAD falls back to the GET mapping. A literal registration equal to
    /// the path is preferred over pattern matching.
    pub fn get(&self, path: &str, method: &Method) -> Option<MatchingService> {
        if let Some(found) = self
            .tables
            .get(method.as_str())
            .and_then(|t| t.lookup(path))
        {
            return Some(found);
        }
        if method == Method::HEAD {
            return self
                .tables
                .get(Method::GET.as_str())
                .and_then(|t| t.lookup(path));
        }
        None
    }

    /// Names of every method with a registration matching `path`
    ///
    /// GET implies HEAD.
    pub fn allows(&self, path: &str) -> BTreeSet<String> {
        let mut allowed = BTreeSet::new();
        for table in self.tables.values() {
            if table.matches_path(path) {
                allowed.insert(table.method.as_str().to_string());
                if table.method == Method::GET {
                    allowed.insert(Method::HEAD.as_str().to_string());
                }
            }
        }
        allowed
    }

    /// Pattern strings registered for the service with `service_id`
    pub fn matches(&self, service_id: &str) -> Vec<String> {
        self.tables
            .values()
            .flat_map(|t| t.entries.iter())
            .filter(|e| e.service.id() == service_id)
            .map(|e| e.pattern.as_str().to_string())
            .collect()
    }

    /// Method the service with `service_id` is registered under
    pub fn get_method(&self, service_id: &str) -> Option<Method> {
        self.tables
            .values()
            .find(|t| t.entries.iter().any(|e| e.service.id() == service_id))
            .map(|t| t.method.clone())
    }

    /// Every registration as (method, pattern, service)
    pub fn services(&self) -> Vec<(Method, String, Arc<ServiceDefinition>)> {
        self.tables
            .values()
            .flat_map(|t| {
                t.entries.iter().map(move |e| {
                    (
                        t.method.clone(),
                        e.pattern.as_str().to_string(),
                        Arc::clone(&e.service),
                    )
                })
            })
            .collect()
    }

    /// Number of (method, pattern) registrations
    pub fn len(&self) -> usize {
        self.tables.values().map(|t| t.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Shared, concurrently readable service registry
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; holding it pins that view of the registry
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Register a single service, see [`RegistrySnapshot::register`]
    pub fn register(
        &self,
        service: Arc<ServiceDefinition>,
        pattern: UriPattern,
        method: Method,
    ) -> bool {
        self.update(|snapshot| snapshot.register(service, pattern, method))
    }

    pub fn get(&self, path: &str, method: &Method) -> Option<MatchingService> {
        self.snapshot.load().get(path, method)
    }

    pub fn allows(&self, path: &str) -> BTreeSet<String> {
        self.snapshot.load().allows(path)
    }

    pub fn matches(&self, service_id: &str) -> Vec<String> {
        self.snapshot.load().matches(service_id)
    }

    pub fn get_method(&self, service_id: &str) -> Option<Method> {
        self.snapshot.load().get_method(service_id)
    }

    pub fn services(&self) -> Vec<(Method, String, Arc<ServiceDefinition>)> {
        self.snapshot.load().services()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic version, bumped by `clear`, `touch` and `replace`
    pub fn version(&self) -> u64 {
        self.snapshot.load().version
    }

    /// Remove every registration
    pub fn clear(&self) {
        let _guard = self.lock_writer();
        let version = next_version(self.snapshot.load().version);
        self.snapshot.store(Arc::new(RegistrySnapshot {
            tables: BTreeMap::new(),
            version,
        }));
        info!(version, "Service registry cleared");
    }

    /// Bump the version without changing registrations
    pub fn touch(&self) -> u64 {
        let _guard = self.lock_writer();
        let current = self.snapshot.load_full();
        let mut next = RegistrySnapshot::clone(&current);
        next.version = next_version(current.version);
        let version = next.version;
        self.snapshot.store(Arc::new(next));
        version
    }

    /// Swap in a fully built snapshot and bump the version
    pub fn replace(&self, mut snapshot: RegistrySnapshot) -> u64 {
        let _guard = self.lock_writer();
        snapshot.version = next_version(self.snapshot.load().version);
        let version = snapshot.version;
        let registrations = snapshot.len();
        self.snapshot.store(Arc::new(snapshot));
        info!(version, registrations, "Service registry replaced");
        version
    }

    fn update<R>(&self, f: impl FnOnce(&mut RegistrySnapshot) -> R) -> R {
        let _guard = self.lock_writer();
        let mut next = RegistrySnapshot::clone(&self.snapshot.load_full());
        let result = f(&mut next);
        self.snapshot.store(Arc::new(next));
        result
    }

    fn lock_writer(&self) -> std::sync::MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn next_version(previous: u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    now.max(previous + 1)
}

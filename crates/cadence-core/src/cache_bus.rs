//! Process-wide cache invalidation signal with monotonic versioning.
//!
//! Consumers that keep derived caches (spatial indices, zone lookups,
//! aggregate counters) remember the version they were built at and
//! compare it against [`CacheBus::scope_version`] before reuse. Producers
//! call [`CacheBus::invalidate`] after changing something a cache depends
//! on.
//!
//! # Versioning
//!
//! There is a single global counter. Each `invalidate` call increments it
//! exactly once and stamps the new value onto the named scope; `all`
//! stamps it onto every scope. Scope versions are therefore comparable
//! with each other and with [`CacheBus::version`].
//!
//! # Listeners vs. subscribers
//!
//! Event delivery goes through the typed observer lists
//! ([`CacheBus::subscribe`]). The subscriber registry
//! ([`CacheBus::register_subscriber`]) is a diagnostic list of interested
//! system names only. Registering a name there does **not** deliver any
//! event to anyone.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};

use cadence_types::CacheScope;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::sync::{lock, read, write};

/// Payload delivered with every invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInvalidationEvent {
    /// Scope that was invalidated.
    pub scope: CacheScope,
    /// Global version assigned by this invalidation.
    pub version: u64,
    /// Wall-clock time of the invalidation.
    pub timestamp: DateTime<Utc>,
    /// Optional human-readable cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Event key a listener attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheBusEvent {
    /// Fired for every invalidation, whatever the scope.
    Invalidated,
    /// Fired only for invalidations of the given scope.
    ScopeInvalidated(CacheScope),
}

/// Handle returned by [`CacheBus::subscribe`], used to detach a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

/// Listener callback.
pub type CacheListener = Arc<dyn Fn(&CacheInvalidationEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct Versions {
    global: u64,
    scopes: BTreeMap<CacheScope, u64>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_event: BTreeMap<CacheBusEvent, Vec<(SubscriptionId, CacheListener)>>,
}

/// Global invalidation signal. See the module documentation.
pub struct CacheBus {
    versions: Mutex<Versions>,
    listeners: RwLock<Listeners>,
    subscribers: Mutex<BTreeSet<String>>,
}

impl CacheBus {
    /// Create a bus with every version at zero.
    pub fn new() -> Self {
        Self {
            versions: Mutex::new(Versions::default()),
            listeners: RwLock::new(Listeners::default()),
            subscribers: Mutex::new(BTreeSet::new()),
        }
    }

    /// Invalidate `scope` and notify listeners.
    ///
    /// Listeners of [`CacheBusEvent::Invalidated`] are called first, then
    /// listeners of [`CacheBusEvent::ScopeInvalidated`] for `scope`. They
    /// run on the caller's thread after the version lock is released, so a
    /// listener may read versions or invalidate again.
    pub fn invalidate(&self, scope: CacheScope, reason: Option<&str>) -> CacheInvalidationEvent {
        let event = {
            let mut versions = lock(&self.versions);
            versions.global = versions.global.saturating_add(1);
            let version = versions.global;
            if scope == CacheScope::All {
                for each in CacheScope::ALL {
                    versions.scopes.insert(each, version);
                }
            } else {
                versions.scopes.insert(scope, version);
            }
            CacheInvalidationEvent {
                scope,
                version,
                timestamp: Utc::now(),
                reason: reason.map(str::to_owned),
            }
        };

        debug!(
            scope = %event.scope,
            version = event.version,
            reason = event.reason.as_deref().unwrap_or(""),
            "Cache invalidated"
        );

        self.emit(CacheBusEvent::Invalidated, &event);
        self.emit(CacheBusEvent::ScopeInvalidated(scope), &event);
        event
    }

    /// Current global version.
    pub fn version(&self) -> u64 {
        lock(&self.versions).global
    }

    /// Version last assigned to `scope` (0 if never invalidated).
    pub fn scope_version(&self, scope: CacheScope) -> u64 {
        lock(&self.versions)
            .scopes
            .get(&scope)
            .copied()
            .unwrap_or(0)
    }

    /// Attach a listener to `event`.
    pub fn subscribe<F>(&self, event: CacheBusEvent, listener: F) -> SubscriptionId
    where
        F: Fn(&CacheInvalidationEvent) + Send + Sync + 'static,
    {
        let mut listeners = write(&self.listeners);
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id = listeners.next_id.saturating_add(1);
        listeners
            .by_event
            .entry(event)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Detach a listener. Returns `false` if the ID was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = write(&self.listeners);
        let mut removed = false;
        for entries in listeners.by_event.values_mut() {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
        }
        listeners.by_event.retain(|_, entries| !entries.is_empty());
        removed
    }

    /// Number of listeners attached to `event`.
    pub fn listener_count(&self, event: CacheBusEvent) -> usize {
        read(&self.listeners)
            .by_event
            .get(&event)
            .map_or(0, Vec::len)
    }

    /// Record `name` in the diagnostic subscriber registry.
    ///
    /// This does not attach a listener; see the module documentation.
    pub fn register_subscriber(&self, name: &str) {
        lock(&self.subscribers).insert(name.to_owned());
    }

    /// Remove `name` from the diagnostic registry.
    pub fn unregister_subscriber(&self, name: &str) {
        lock(&self.subscribers).remove(name);
    }

    /// Names currently in the diagnostic registry, sorted.
    pub fn subscribers(&self) -> Vec<String> {
        lock(&self.subscribers).iter().cloned().collect()
    }

    /// Every scope with its current version.
    pub fn versions(&self) -> BTreeMap<CacheScope, u64> {
        let versions = lock(&self.versions);
        CacheScope::ALL
            .into_iter()
            .map(|scope| (scope, versions.scopes.get(&scope).copied().unwrap_or(0)))
            .collect()
    }

    /// Zero the global and every scope version. Intended for test isolation.
    pub fn reset(&self) {
        let mut versions = lock(&self.versions);
        versions.global = 0;
        versions.scopes.clear();
    }

    fn emit(&self, key: CacheBusEvent, event: &CacheInvalidationEvent) {
        let targets: Vec<CacheListener> = read(&self.listeners)
            .by_event
            .get(&key)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        for listener in targets {
            listener(event);
        }
    }
}

impl Default for CacheBus {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CacheBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CacheBus")
            .field("version", &self.version())
            .field("subscribers", &self.subscribers())
            .finish_non_exhaustive()
    }
}

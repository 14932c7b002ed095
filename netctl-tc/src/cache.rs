use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::{
    namespace::NamespaceIdentity,
    tc::{Param, ShapingKind, ShapingState},
};

/// A change to one dimension of a [`ShapingState`]. The other dimension is left untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: ShapingKind,
    pub value: Param,
}

impl Mutation {
    pub fn new(kind: ShapingKind, value: impl Into<String>) -> Self {
        Self { kind, value: Param::new(value) }
    }

    pub fn latency(value: impl Into<String>) -> Self {
        Self::new(ShapingKind::Latency, value)
    }

    pub fn packet_loss(value: impl Into<String>) -> Self {
        Self::new(ShapingKind::PacketLoss, value)
    }

    fn apply_to(self, state: &mut ShapingState) {
        state.set(self.kind, self.value);
    }
}

/// The last shaping parameters successfully applied to each network namespace.
///
/// A missing entry reads as [`ShapingState::default`]. Entries are only written after the
/// corresponding commands succeeded, and removed when the namespace is cleared.
///
/// Besides the entries, the cache hands out one lock per namespace (see
/// [`StatusCache::namespace_lock`]) which serializes whole read-execute-write sequences on the
/// same namespace while leaving the entry map free for readers.
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: Mutex<FxHashMap<NamespaceIdentity, ShapingState>>,
    locks: Mutex<FxHashMap<NamespaceIdentity, Arc<Mutex<()>>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `mutation` to the entry of `identity`, creating it from the unset state if
    /// missing. Returns the updated state.
    pub fn apply(&self, identity: &NamespaceIdentity, mutation: Mutation) -> ShapingState {
        let mut entries = self.entries.lock();
        let state = entries.entry(identity.clone()).or_default();
        mutation.apply_to(state);
        state.clone()
    }

    /// Removes the entry of `identity`, returning it if present.
    pub fn clear(&self, identity: &NamespaceIdentity) -> Option<ShapingState> {
        self.entries.lock().remove(identity)
    }

    /// Returns the entry of `identity`, or the unset state. Never fails.
    pub fn read(&self, identity: &NamespaceIdentity) -> ShapingState {
        self.get(identity).unwrap_or_default()
    }

    /// Like [`Self::read`], but tells a missing entry apart.
    pub fn get(&self, identity: &NamespaceIdentity) -> Option<ShapingState> {
        self.entries.lock().get(identity).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The lock serializing shaping operations on `identity`.
    ///
    /// Holders should call [`Self::release_namespace_lock`] once they dropped their handle.
    pub fn namespace_lock(&self, identity: &NamespaceIdentity) -> Arc<Mutex<()>> {
        self.locks.lock().entry(identity.clone()).or_default().clone()
    }

    /// Forgets the lock of `identity` if nobody else is holding a handle to it.
    pub fn release_namespace_lock(&self, identity: &NamespaceIdentity) {
        let mut locks = self.locks.lock();
        if locks.get(identity).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(identity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(inode: &str) -> NamespaceIdentity {
        NamespaceIdentity::from_link_target(&format!("net:[{inode}]")).unwrap()
    }

    #[test]
    fn read_of_missing_entry_is_unset() {
        let cache = StatusCache::new();
        assert_eq!(cache.read(&ns("1")), ShapingState::default());
        assert_eq!(cache.get(&ns("1")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn apply_preserves_other_dimension() {
        let cache = StatusCache::new();
        let n = ns("4026532001");

        cache.apply(&n, Mutation::packet_loss("10%"));
        let state = cache.apply(&n, Mutation::latency("500ms"));

        assert_eq!(state.latency, Param::new("500ms"));
        assert_eq!(state.packet_loss, Param::new("10%"));
        assert_eq!(cache.read(&n), state);
    }

    #[test]
    fn clear_removes_entry_and_resets_next_apply() {
        let cache = StatusCache::new();
        let n = ns("4026532001");

        cache.apply(&n, Mutation::latency("500ms"));
        cache.apply(&n, Mutation::packet_loss("10%"));
        assert!(cache.clear(&n).is_some());

        assert_eq!(cache.read(&n), ShapingState::default());
        let state = cache.apply(&n, Mutation::packet_loss("10%"));
        assert_eq!(state.latency, Param::Unset);
        assert!(cache.clear(&ns("unknown")).is_none());
    }

    #[test]
    fn apply_is_idempotent() {
        let once = StatusCache::new();
        let twice = StatusCache::new();
        let n = ns("7");

        once.apply(&n, Mutation::latency("1000ms"));
        twice.apply(&n, Mutation::latency("1000ms"));
        twice.apply(&n, Mutation::latency("1000ms"));

        assert_eq!(twice.len(), 1);
        assert_eq!(once.read(&n), twice.read(&n));
    }

    #[test]
    fn entries_are_independent_per_namespace() {
        let cache = StatusCache::new();
        cache.apply(&ns("1"), Mutation::latency("500ms"));
        cache.apply(&ns("2"), Mutation::packet_loss("10%"));

        assert_eq!(cache.read(&ns("1")).packet_loss, Param::Unset);
        assert_eq!(cache.read(&ns("2")).latency, Param::Unset);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn namespace_lock_is_shared_until_released() {
        let cache = StatusCache::new();
        let n = ns("9");

        let a = cache.namespace_lock(&n);
        let b = cache.namespace_lock(&n);
        assert!(Arc::ptr_eq(&a, &b));

        drop(b);
        cache.release_namespace_lock(&n);
        assert!(Arc::ptr_eq(&a, &cache.namespace_lock(&n)), "held lock must not be forgotten");

        drop(a);
        cache.release_namespace_lock(&n);
        assert!(cache.locks.lock().is_empty());
    }
}

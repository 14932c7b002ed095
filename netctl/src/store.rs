//! Containers known to the plugin and their lifecycle.

use netctl_tc::Pid;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// Created but never started: it has no process, hence no namespace, yet.
    Created,
    Running,
    /// Exited, paused or killed. Still reported, with every control dead.
    Stopped,
    /// Removed. Never reported, and evicted from the [`Store`].
    Destroyed,
}

impl ContainerState {
    /// Whether a container in this state appears in reports.
    pub const fn is_reported(self) -> bool {
        matches!(self, Self::Running | Self::Stopped)
    }

    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    /// Runtime name, e.g. `/k8s_user_user-468431046-ktrt4_default_...`.
    pub name: Option<String>,
    /// Init process of the container. Only meaningful while running.
    pub pid: Pid,
    pub state: ContainerState,
}

impl ContainerRecord {
    pub fn new(id: impl Into<String>, pid: Pid, state: ContainerState) -> Self {
        Self { id: id.into(), name: None, pid, state }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The Kubernetes pod this container belongs to, if its name follows the kubelet naming
    /// scheme.
    pub fn pod_name(&self) -> Option<&str> {
        self.name.as_deref().and_then(parse_pod_name)
    }
}

/// Extracts the pod name out of a kubelet-managed container name,
/// `k8s_<container>_<pod>_<namespace>_<uid>_<attempt>`.
pub fn parse_pod_name(name: &str) -> Option<&str> {
    let name = name.trim_start_matches('/');
    let parts: Vec<&str> = name.split('_').collect();
    if parts.first() != Some(&"k8s") {
        return None;
    }
    if parts.len() < 6 {
        tracing::debug!(name, fields = parts.len(), "container name has the k8s prefix but too few fields");
        return None;
    }
    Some(parts[2]).filter(|pod| !pod.is_empty())
}

/// Read access to the containers known to the plugin.
pub trait ContainerStore: Send + Sync {
    /// Calls `f` with every container.
    fn for_each(&self, f: &mut dyn FnMut(&str, &ContainerRecord));

    fn lookup(&self, id: &str) -> Option<ContainerRecord>;

    /// A copy of every container, sorted by id.
    fn snapshot(&self) -> Vec<ContainerRecord> {
        let mut records = Vec::new();
        self.for_each(&mut |_, record| records.push(record.clone()));
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

/// A lifecycle event of a container as observed from the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Created { id: String, name: Option<String> },
    Started { id: String, name: Option<String>, pid: Pid },
    Stopped { id: String },
    Destroyed { id: String },
}

/// In-memory [`ContainerStore`] fed with [`ContainerEvent`]s.
#[derive(Debug, Default)]
pub struct Store {
    containers: Mutex<FxHashMap<String, ContainerRecord>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a container.
    pub fn upsert(&self, record: ContainerRecord) {
        self.containers.lock().insert(record.id.clone(), record);
    }

    /// Applies a lifecycle event, returning the resulting state of the container.
    ///
    /// Events about containers that were never seen create them, so that a container started
    /// before the plugin still shows up once its first event arrives. Destroyed containers are
    /// removed.
    pub fn apply(&self, event: ContainerEvent) -> ContainerState {
        let (id, name, pid, state) = match event {
            ContainerEvent::Created { id, name } => (id, name, 0, ContainerState::Created),
            ContainerEvent::Started { id, name, pid } => (id, name, pid, ContainerState::Running),
            ContainerEvent::Stopped { id } => (id, None, 0, ContainerState::Stopped),
            ContainerEvent::Destroyed { id } => {
                if let Some(record) = self.containers.lock().remove(&id) {
                    tracing::info!(%id, previous = ?record.state, "container destroyed");
                }
                return ContainerState::Destroyed;
            }
        };

        let mut containers = self.containers.lock();
        let record = containers
            .entry(id)
            .or_insert_with_key(|id| ContainerRecord::new(id.clone(), 0, ContainerState::Created));

        let previous = record.state;
        record.state = state;
        record.pid = pid;
        if name.is_some() {
            record.name = name;
        }

        if previous != state {
            tracing::info!(id = %record.id, ?previous, ?state, pid, "container state changed");
        }
        state
    }

    /// Keeps only the containers for which `keep` returns true. Returns how many were removed.
    pub fn retain(&self, mut keep: impl FnMut(&ContainerRecord) -> bool) -> usize {
        let mut containers = self.containers.lock();
        let before = containers.len();
        containers.retain(|_, record| keep(record));
        before - containers.len()
    }

    pub fn len(&self) -> usize {
        self.containers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.lock().is_empty()
    }
}

impl ContainerStore for Store {
    fn for_each(&self, f: &mut dyn FnMut(&str, &ContainerRecord)) {
        // Callers must not reach back into the store from `f`.
        for (id, record) in self.containers.lock().iter() {
            f(id, record);
        }
    }

    fn lookup(&self, id: &str) -> Option<ContainerRecord> {
        self.containers.lock().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashSet;

    use super::*;

    #[test]
    fn lifecycle_transitions() {
        let store = Store::new();

        let state = store.apply(ContainerEvent::Created { id: "abc".into(), name: Some("/web".into()) });
        assert_eq!(state, ContainerState::Created);

        store.apply(ContainerEvent::Started { id: "abc".into(), name: None, pid: 4242 });
        let record = store.lookup("abc").unwrap();
        assert_eq!(record.state, ContainerState::Running);
        assert_eq!(record.pid, 4242);
        assert_eq!(record.name.as_deref(), Some("/web"));

        store.apply(ContainerEvent::Stopped { id: "abc".into() });
        assert_eq!(store.lookup("abc").unwrap(), ContainerRecord::new("abc", 0, ContainerState::Stopped).with_name("/web"));

        let state = store.apply(ContainerEvent::Destroyed { id: "abc".into() });
        assert_eq!(state, ContainerState::Destroyed);
        assert!(store.lookup("abc").is_none());
        assert!(store.is_empty());

        store.apply(ContainerEvent::Destroyed { id: "never-seen".into() });
        assert!(store.is_empty());
    }

    #[test]
    fn resync_drops_vanished_containers() {
        let store = Store::new();
        store.upsert(ContainerRecord::new("kept", 10, ContainerState::Running));
        store.upsert(ContainerRecord::new("vanished", 11, ContainerState::Running));

        let listed: FxHashSet<_> = ["kept".to_string()].into_iter().collect();
        let removed = store.retain(|record| listed.contains(&record.id));

        assert_eq!(removed, 1);
        assert!(store.lookup("vanished").is_none());
        assert_eq!(store.lookup("kept").unwrap().pid, 10);
    }

    #[test]
    fn first_event_of_unknown_container_creates_it() {
        let store = Store::new();
        store.apply(ContainerEvent::Started { id: "late".into(), name: None, pid: 7 });
        assert_eq!(store.lookup("late").unwrap().state, ContainerState::Running);
        assert!(store.lookup("missing").is_none());
    }

    #[test]
    fn snapshot_is_sorted() {
        let store = Store::new();
        store.upsert(ContainerRecord::new("b", 2, ContainerState::Running));
        store.upsert(ContainerRecord::new("a", 1, ContainerState::Stopped));

        let ids: Vec<_> = store.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn reported_states() {
        assert!(ContainerState::Running.is_reported());
        assert!(ContainerState::Stopped.is_reported());
        assert!(!ContainerState::Created.is_reported());
        assert!(!ContainerState::Destroyed.is_reported());
    }

    #[test]
    fn pod_names() {
        assert_eq!(parse_pod_name("/k8s_user_user-468431046-ktrt4_default_0b1c_3"), Some("user-468431046-ktrt4"));
        assert_eq!(parse_pod_name("k8s_POD_redis-sfhcz_default_uid_0"), Some("redis-sfhcz"));
        assert_eq!(parse_pod_name("/k8s_user_pod"), None);
        assert_eq!(parse_pod_name("/web"), None);

        let record = ContainerRecord::new("x", 1, ContainerState::Running).with_name("/k8s_a_b_c_d_0");
        assert_eq!(record.pod_name(), Some("b"));
    }
}

use std::{path::PathBuf, sync::Arc};

use crate::{
    Error, Pid, Result,
    cache::{Mutation, StatusCache},
    namespace::{Executor, NamespaceExecutor, NamespaceIdentity, PROC_ROOT, ProcResolver, Resolve},
    tc::{CommandBuilder, ShapingKind, ShapingState},
};

/// Options of a [`TrafficShaper`] backed by the host's procfs and `tc`.
#[derive(Debug, Clone)]
pub struct ShaperOptions {
    /// The device inside the target namespace carrying the root qdisc.
    interface: String,
    /// The `tc` program.
    tc_binary: String,
    /// Where procfs is mounted.
    proc_root: PathBuf,
}

impl Default for ShaperOptions {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            tc_binary: "tc".to_string(),
            proc_root: PathBuf::from(PROC_ROOT),
        }
    }
}

impl ShaperOptions {
    /// Sets the device the qdisc is attached to.
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Sets the `tc` program to invoke.
    pub fn tc_binary(mut self, tc_binary: impl Into<String>) -> Self {
        self.tc_binary = tc_binary.into();
        self
    }

    /// Sets the procfs mount point.
    pub fn proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }
}

/// Applies and clears latency and packet loss on the network namespace of a process, keeping
/// the [`StatusCache`] in sync with what actually got applied.
///
/// Every operation resolves the namespace afresh. Operations on the same namespace are
/// serialized; the cache is written only after the commands succeeded.
pub struct TrafficShaper {
    builder: CommandBuilder,
    resolver: Arc<dyn Resolve>,
    executor: Arc<dyn Executor>,
    cache: Arc<StatusCache>,
}

impl std::fmt::Debug for TrafficShaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficShaper")
            .field("builder", &self.builder)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TrafficShaper {
    /// Creates a shaper operating on the host.
    pub fn new(options: ShaperOptions, cache: Arc<StatusCache>) -> Self {
        let builder = CommandBuilder::new(options.interface).with_tc_binary(options.tc_binary);
        Self::with_parts(
            builder,
            Arc::new(ProcResolver::new(options.proc_root.clone())),
            Arc::new(NamespaceExecutor::new(options.proc_root)),
            cache,
        )
    }

    /// Creates a shaper from its individual parts.
    pub fn with_parts(
        builder: CommandBuilder,
        resolver: Arc<dyn Resolve>,
        executor: Arc<dyn Executor>,
        cache: Arc<StatusCache>,
    ) -> Self {
        Self { builder, resolver, executor, cache }
    }

    pub fn cache(&self) -> &StatusCache {
        &self.cache
    }

    pub fn resolver(&self) -> &dyn Resolve {
        self.resolver.as_ref()
    }

    /// The shaping state currently applied to the namespace of `pid`.
    pub fn status(&self, pid: Pid) -> Result<ShapingState> {
        let identity = self.resolver.resolve(pid)?;
        Ok(self.cache.read(&identity))
    }

    /// Sets the latency of the namespace of `pid`, preserving its packet loss.
    pub fn apply_latency(&self, pid: Pid, latency: &str) -> Result<()> {
        self.apply(pid, ShapingKind::Latency, latency)
    }

    /// Sets the packet loss of the namespace of `pid`, preserving its latency.
    pub fn apply_packet_loss(&self, pid: Pid, packet_loss: &str) -> Result<()> {
        self.apply(pid, ShapingKind::PacketLoss, packet_loss)
    }

    /// Resets the namespace of `pid` to a parameterless `netem` and forgets its state.
    pub fn clear(&self, pid: Pid) -> Result<()> {
        let identity = self.resolver.resolve(pid)?;
        let _span = tracing::debug_span!("clear", pid, namespace = %identity).entered();

        self.serialized(&identity, || {
            self.executor.run(pid, &self.builder.clear())?;
            self.ensure_namespace(pid, &identity)?;

            if let Some(previous) = self.cache.clear(&identity) {
                tracing::info!(pid, namespace = %identity, %previous, "cleared shaping");
            }
            Ok(())
        })
    }

    fn apply(&self, pid: Pid, kind: ShapingKind, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Ok(());
        }

        let identity = self.resolver.resolve(pid)?;
        let _span = tracing::debug_span!("apply", pid, namespace = %identity, ?kind, value).entered();

        self.serialized(&identity, || {
            let current = self.cache.read(&identity);
            let commands = self.builder.build(kind, value, current.get(kind.counterpart()));

            self.executor.run(pid, &commands)?;
            self.ensure_namespace(pid, &identity)?;

            let state = self.cache.apply(&identity, Mutation::new(kind, value));
            tracing::info!(
                pid,
                namespace = %identity,
                latency = %state.latency,
                packet_loss = %state.packet_loss,
                "applied shaping"
            );
            Ok(())
        })
    }

    /// Runs `f` while holding the lock of `identity`.
    fn serialized<T>(&self, identity: &NamespaceIdentity, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.cache.namespace_lock(identity);
        let res = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.cache.release_namespace_lock(identity);
        res
    }

    /// Fails if `pid` exited or moved to another namespace while commands were running, in
    /// which case the cache must not be written.
    fn ensure_namespace(&self, pid: Pid, expected: &NamespaceIdentity) -> Result<()> {
        match self.resolver.resolve(pid) {
            Ok(identity) if &identity == expected => Ok(()),
            Ok(_) => Err(Error::NamespaceChanged { pid, expected: expected.clone() }),
            Err(e) => Err(e),
        }
    }
}

use std::{
    fmt,
    fs::File,
    io,
    os::fd::AsFd,
    path::{Path, PathBuf},
};

use nix::sched::CloneFlags;

use crate::{Error, Pid, Result, command::Runner, tc::TcCommand};

/// Default mount point of procfs.
pub const PROC_ROOT: &str = "/proc";

/// Canonical token of a kernel network namespace, i.e. the inode number found in the
/// `net:[<inode>]` target of `/proc/<pid>/ns/net`.
///
/// Two processes sharing a namespace resolve to the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceIdentity(String);

impl NamespaceIdentity {
    const LINK_PREFIX: &'static str = "net:[";
    const LINK_SUFFIX: char = ']';

    /// Parses the target of a `/proc/<pid>/ns/net` symbolic link.
    pub fn from_link_target(target: &str) -> Option<Self> {
        target
            .strip_prefix(Self::LINK_PREFIX)?
            .strip_suffix(Self::LINK_SUFFIX)
            .filter(|inode| !inode.is_empty())
            .map(|inode| Self(inode.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of the network namespace file of `pid`.
pub fn netns_path(proc_root: &Path, pid: Pid) -> PathBuf {
    proc_root.join(pid.to_string()).join("ns").join("net")
}

/// Maps a process to the identity of its network namespace.
///
/// Implementations must not cache: a pid can exit and be reused by a process living in a
/// different namespace.
pub trait Resolve: Send + Sync {
    fn resolve(&self, pid: Pid) -> Result<NamespaceIdentity>;
}

/// Resolves namespaces by reading `<proc>/<pid>/ns/net`.
#[derive(Debug, Clone)]
pub struct ProcResolver {
    proc_root: PathBuf,
}

impl Default for ProcResolver {
    fn default() -> Self {
        Self::new(PROC_ROOT)
    }
}

impl ProcResolver {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self { proc_root: proc_root.into() }
    }
}

impl Resolve for ProcResolver {
    fn resolve(&self, pid: Pid) -> Result<NamespaceIdentity> {
        let path = netns_path(&self.proc_root, pid);
        let target = std::fs::read_link(&path)
            .map_err(|source| Error::NamespaceUnresolvable { pid, source })?;
        let target = target.to_string_lossy();

        let identity = NamespaceIdentity::from_link_target(&target).ok_or_else(|| {
            let source = io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected namespace link target {target:?}"),
            );
            Error::NamespaceUnresolvable { pid, source }
        })?;

        tracing::trace!(pid, path = %path.display(), %identity, "resolved network namespace");
        Ok(identity)
    }
}

/// Runs shaping commands in the network namespace of a process.
pub trait Executor: Send + Sync {
    /// Executes `commands` in order, stopping at the first failure.
    fn run(&self, pid: Pid, commands: &[TcCommand]) -> Result<()>;
}

/// An [`Executor`] which enters the target namespace with `setns(2)`.
///
/// A namespace switch applies to the calling thread, so every call spawns a short-lived OS
/// thread that enters the namespace, runs the commands (whose child processes inherit it) and
/// exits. The caller's thread never changes namespace.
#[derive(Debug, Clone)]
pub struct NamespaceExecutor {
    proc_root: PathBuf,
}

impl Default for NamespaceExecutor {
    fn default() -> Self {
        Self::new(PROC_ROOT)
    }
}

impl NamespaceExecutor {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self { proc_root: proc_root.into() }
    }
}

impl Executor for NamespaceExecutor {
    fn run(&self, pid: Pid, commands: &[TcCommand]) -> Result<()> {
        let file = File::open(netns_path(&self.proc_root, pid))
            .map_err(|source| Error::NamespaceUnresolvable { pid, source })?;
        let commands = commands.to_vec();

        let handle = std::thread::Builder::new()
            .name(format!("netns-{pid}"))
            .spawn(move || -> Result<()> {
                let fd = file.as_fd();

                tracing::debug!(?fd, pid, "entering network namespace");

                nix::sched::setns(fd, CloneFlags::CLONE_NEWNET)?;

                for command in &commands {
                    Runner::run(command.args())?;
                }

                Ok(())
            })
            .map_err(Error::Spawn)?;

        handle.join().map_err(|_| Error::ThreadPanicked)?
    }
}

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Synthetic latency and packet loss for processes living in their own network namespace.
//!
//! The crate is split in small pieces which are glued together by [`TrafficShaper`]:
//!
//! - [`namespace`] resolves the network namespace of a process and runs commands inside it.
//! - [`tc`] builds the `tc qdisc` invocations for a root `netem` queueing discipline.
//! - [`cache`] remembers, per namespace, what was last applied successfully.
//! - [`command`] wraps [`std::process::Command`] and captures its output.

use std::io;

pub mod cache;
pub mod command;
pub mod namespace;
pub mod shaper;
pub mod tc;

pub use cache::{Mutation, StatusCache};
pub use namespace::{Executor, NamespaceExecutor, NamespaceIdentity, ProcResolver, Resolve};
pub use shaper::{ShaperOptions, TrafficShaper};
pub use tc::{CommandBuilder, Param, ShapingKind, ShapingState, TcCommand};

/// A process identifier, as found under `/proc`.
pub type Pid = u32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to resolve network namespace of pid {pid}: {source}")]
    NamespaceUnresolvable { pid: Pid, source: io::Error },
    #[error("network namespace of pid {pid} changed from {expected} while shaping")]
    NamespaceChanged { pid: Pid, expected: NamespaceIdentity },
    #[error("failed to enter network namespace: {0}")]
    Enter(#[from] nix::Error),
    #[error("failed to spawn namespace thread: {0}")]
    Spawn(io::Error),
    #[error("namespace thread panicked")]
    ThreadPanicked,
    #[error(transparent)]
    Command(#[from] command::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

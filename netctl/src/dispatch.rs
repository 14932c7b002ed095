//! Turns a `(node id, control id)` pair from the host into a shaping operation.
//!
//! A request is first resolved (node id, container, control) and then executed. Nothing is
//! retried and no state is kept between requests.

use std::sync::Arc;

use netctl_tc::{Pid, TrafficShaper};
use netctl_wire::{node_id_to_container_id, MalformedNodeId};

use crate::{
    controls::{self, Control, Handler},
    store::ContainerStore,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    MalformedNodeId(#[from] MalformedNodeId),
    #[error("container {0} not found")]
    ContainerNotFound(String),
    #[error("container {0} is not running")]
    ContainerNotRunning(String),
    #[error("unknown control ID {control:?} for node ID {node_id:?}")]
    UnknownControl { control: String, node_id: String },
    #[error(transparent)]
    HandlerFailed(#[from] netctl_tc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A request which passed resolution and is ready to execute.
#[derive(Clone, Copy)]
pub struct Resolved<'a> {
    pub container_id: &'a str,
    pub pid: Pid,
    pub control: Control,
    handler: Handler,
}

impl std::fmt::Debug for Resolved<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("container_id", &self.container_id)
            .field("pid", &self.pid)
            .field("control", &self.control)
            .finish_non_exhaustive()
    }
}

pub struct Dispatcher {
    store: Arc<dyn ContainerStore>,
    shaper: Arc<TrafficShaper>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("shaper", &self.shaper).finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ContainerStore>, shaper: Arc<TrafficShaper>) -> Self {
        Self { store, shaper }
    }

    /// Resolves `node_id` to a running container and `control_id` to its handler.
    pub fn resolve<'a>(&self, node_id: &'a str, control_id: &str) -> Result<Resolved<'a>> {
        let container_id = node_id_to_container_id(node_id)?;
        let container = self
            .store
            .lookup(container_id)
            .ok_or_else(|| Error::ContainerNotFound(container_id.to_string()))?;
        let (control, handler) = controls::lookup(control_id).ok_or_else(|| Error::UnknownControl {
            control: control_id.to_string(),
            node_id: node_id.to_string(),
        })?;

        if !container.state.is_running() || container.pid == 0 {
            return Err(Error::ContainerNotRunning(container_id.to_string()));
        }

        Ok(Resolved { container_id, pid: container.pid, control, handler })
    }

    /// Resolves and executes a control. Blocks until the shaping commands completed.
    pub fn dispatch(&self, node_id: &str, control_id: &str) -> Result<Control> {
        let _span = tracing::debug_span!("dispatch", node_id, control = control_id).entered();

        let resolved = self.resolve(node_id, control_id)?;
        (resolved.handler)(&self.shaper, resolved.pid)?;

        tracing::info!(container = resolved.container_id, pid = resolved.pid, control = ?resolved.control, "control performed");
        Ok(resolved.control)
    }
}

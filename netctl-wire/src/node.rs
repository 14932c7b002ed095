//! Node identifiers of the container topology.
//!
//! The host identifies a container node as `<container id>;<container>`. Every node id put in a
//! report must map back to its container id when the host sends a control for it.

/// Suffix of container node ids.
pub const CONTAINER_NODE_SUFFIX: &str = ";<container>";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no suffix {:?} in node ID {:?}", CONTAINER_NODE_SUFFIX, .0)]
pub struct MalformedNodeId(pub String);

/// Returns the node id of the container `container_id`.
pub fn container_id_to_node_id(container_id: &str) -> String {
    format!("{container_id}{CONTAINER_NODE_SUFFIX}")
}

/// Returns the container id of the node `node_id`.
pub fn node_id_to_container_id(node_id: &str) -> Result<&str, MalformedNodeId> {
    node_id.strip_suffix(CONTAINER_NODE_SUFFIX).ok_or_else(|| MalformedNodeId(node_id.to_string()))
}

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Wire formats spoken with the visualization host: the topology report it polls and the
//! control requests it sends back.

pub mod control;
pub mod node;
pub mod report;

pub use control::{ControlRequest, ControlResponse};
pub use node::{container_id_to_node_id, node_id_to_container_id, MalformedNodeId};

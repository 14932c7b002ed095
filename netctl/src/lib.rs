#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Topology reporter plugin adding latency and packet loss controls to running containers.
//!
//! Containers are tracked in a [`store::Store`] fed by the Docker event stream. The host polls
//! [`server`] for a report assembled by [`report::Assembler`] and sends controls back, which
//! [`dispatch::Dispatcher`] turns into shaping operations on the container's network namespace.

pub mod config;
pub mod controls;
pub mod dispatch;
pub mod docker;
pub mod metrics;
pub mod report;
pub mod server;
pub mod store;

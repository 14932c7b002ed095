//! Assembly of the report polled by the host.

use chrono::{DateTime, Utc};
use netctl_tc::{Param, Resolve, ShapingState, StatusCache};
use netctl_wire::{
    container_id_to_node_id,
    report::{
        ControlData, ControlEntry, MetadataTemplate, Node, PluginSpec, Report, StringEntry,
        TableTemplate, Topology,
    },
};
use rustc_hash::FxHashMap;

use crate::{
    controls::{Control, TABLE_PREFIX},
    metrics::Sample,
    store::{ContainerRecord, ContainerState},
};

pub const PLUGIN_ID: &str = "network-control";

const LATENCY_KEY: &str = "latency";
const PACKET_LOSS_KEY: &str = "pktloss";
const DST_POD_KEY: &str = "dst-pod";

pub fn plugin_spec() -> PluginSpec {
    PluginSpec {
        id: PLUGIN_ID.to_string(),
        label: "Network control".to_string(),
        description: "Adds Network controls to the running Docker containers".to_string(),
        interfaces: vec!["reporter".to_string(), "controller".to_string()],
        api_version: "1".to_string(),
    }
}

fn metadata_template(key: &str, label: &str, priority: f64) -> (String, MetadataTemplate) {
    let id = format!("{PLUGIN_ID}-{key}");
    let template = MetadataTemplate {
        id: id.clone(),
        label: label.to_string(),
        priority,
        from: "latest".to_string(),
        ..Default::default()
    };
    (id, template)
}

/// Builds a [`Report`] out of a snapshot of the containers and the shaping cache.
pub struct Assembler<'a> {
    cache: &'a StatusCache,
    resolver: &'a dyn Resolve,
    enrichment: Option<&'a FxHashMap<String, Sample>>,
}

impl<'a> Assembler<'a> {
    pub fn new(cache: &'a StatusCache, resolver: &'a dyn Resolve) -> Self {
        Self { cache, resolver, enrichment: None }
    }

    /// Samples from the metrics source, by container id.
    pub fn with_enrichment(mut self, enrichment: &'a FxHashMap<String, Sample>) -> Self {
        self.enrichment = Some(enrichment);
        self
    }

    /// Every entry of the resulting report is stamped with `timestamp`.
    pub fn assemble(&self, records: &[ContainerRecord], timestamp: DateTime<Utc>) -> Report {
        let mut topology = Topology {
            controls: Control::ALL.into_iter().map(|c| (c.id(), c.to_wire())).collect(),
            metadata_templates: [
                metadata_template(LATENCY_KEY, "Latency", 13.5),
                metadata_template(PACKET_LOSS_KEY, "Packet Loss", 13.6),
            ]
            .into(),
            table_templates: [(
                "network-control-table".to_string(),
                TableTemplate {
                    id: "network-control-table".to_string(),
                    label: "Network Control".to_string(),
                    prefix: TABLE_PREFIX.to_string(),
                },
            )]
            .into(),
            ..Default::default()
        };

        for record in records.iter().filter(|r| r.state.is_reported()) {
            topology.nodes.insert(container_id_to_node_id(&record.id), self.node(record, timestamp));
        }

        Report { container: topology, plugins: vec![plugin_spec()] }
    }

    fn node(&self, record: &ContainerRecord, timestamp: DateTime<Utc>) -> Node {
        let dead = record.state != ContainerState::Running;
        let sample = self.enrichment.and_then(|samples| samples.get(&record.id));
        let state = if dead { ShapingState::default() } else { self.shaping_state(record, sample) };

        let entry = |value: &Param| StringEntry { timestamp, value: value.to_string() };
        let mut latest = vec![
            (format!("{TABLE_PREFIX}{LATENCY_KEY}"), entry(&state.latency)),
            (format!("{TABLE_PREFIX}{PACKET_LOSS_KEY}"), entry(&state.packet_loss)),
        ];
        if let Some(label) = sample.filter(|_| !dead).map(|s| &s.label).filter(|l| l.is_set()) {
            latest.push((format!("{TABLE_PREFIX}{DST_POD_KEY}"), entry(label)));
        }

        Node {
            latest_controls: Control::ALL
                .into_iter()
                .map(|c| (c.id(), ControlEntry { timestamp, value: ControlData { dead } }))
                .collect(),
            latest: latest.into_iter().collect(),
        }
    }

    /// The cached state of the container's namespace, falling back to the metrics sample for
    /// parameters the cache has no entry for.
    fn shaping_state(&self, record: &ContainerRecord, sample: Option<&Sample>) -> ShapingState {
        let cached = match self.resolver.resolve(record.pid) {
            Ok(identity) => self.cache.get(&identity),
            Err(e) => {
                tracing::debug!(id = %record.id, pid = record.pid, ?e, "reporting container without namespace");
                None
            }
        };

        match (cached, sample) {
            (Some(state), _) => state,
            (None, Some(sample)) => {
                ShapingState { latency: sample.latency.clone(), packet_loss: sample.packet_loss.clone() }
            }
            (None, None) => ShapingState::default(),
        }
    }
}

//! The report document polled by the host.
//!
//! Maps are ordered so that identical state always serializes identically.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top-level report: the container topology and the plugins producing it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "Container")]
    pub container: Topology,
    #[serde(rename = "Plugins")]
    pub plugins: Vec<PluginSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: BTreeMap<String, Node>,
    pub controls: BTreeMap<String, Control>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata_templates: BTreeMap<String, MetadataTemplate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub table_templates: BTreeMap<String, TableTemplate>,
}

/// Groups every `latest` entry whose key starts with `prefix` into one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTemplate {
    pub id: String,
    pub label: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataTemplate {
    pub id: String,
    /// Human-readable descriptor for this row.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// If > 0, truncate the value to this length.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub truncate: u32,
    #[serde(rename = "dataType", default, skip_serializing_if = "String::is_empty")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "is_zero_f64")]
    pub priority: f64,
    /// Where the value is read from on a node, e.g. `latest`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "latestControls", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub latest_controls: BTreeMap<String, ControlEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub latest: BTreeMap<String, StringEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEntry {
    pub timestamp: DateTime<Utc>,
    pub value: ControlData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlData {
    pub dead: bool,
}

/// A control as advertised to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
    pub human: String,
    pub icon: String,
    pub rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringEntry {
    pub timestamp: DateTime<Utc>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub interfaces: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
}

const fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_zero_f64(value: &f64) -> bool {
    *value == 0.0
}

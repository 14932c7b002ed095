//! Best-effort enrichment of reports with measurements from an external time-series database.
//!
//! A source never fails a report: errors and timeouts degrade to an unset [`Sample`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use netctl_tc::Param;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::store::ContainerRecord;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected response: {0}")]
    Schema(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Measurements about one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    /// Name of the peer the measurements refer to.
    pub label: Param,
    pub latency: Param,
    pub packet_loss: Param,
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn query(&self, record: &ContainerRecord) -> Result<Sample>;
}

/// A source which knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

#[async_trait]
impl MetricsSource for Disabled {
    async fn query(&self, _record: &ContainerRecord) -> Result<Sample> {
        Ok(Sample::default())
    }
}

/// Queries every container in `records` concurrently, giving each query at most `timeout`.
/// Containers whose query failed are left out.
pub async fn enrich(
    source: &Arc<dyn MetricsSource>,
    records: &[ContainerRecord],
    timeout: Duration,
) -> FxHashMap<String, Sample> {
    let queries = records.iter().map(|record| async move {
        match tokio::time::timeout(timeout, source.query(record)).await {
            Ok(Ok(sample)) => Some((record.id.clone(), sample)),
            Ok(Err(e)) => {
                tracing::warn!(id = %record.id, ?e, "failed to query metrics");
                None
            }
            Err(_) => {
                tracing::warn!(id = %record.id, ?timeout, "metrics query timed out");
                None
            }
        }
    });

    join_all(queries).await.into_iter().flatten().collect()
}

/// Options of an [`InfluxSource`].
#[derive(Debug, Clone)]
pub struct InfluxOptions {
    /// Base URL, e.g. `http://localhost:8086`.
    url: String,
    database: String,
    /// Measurement holding the latency-like value.
    latency_measurement: String,
    /// Measurement holding the packet loss-like value.
    packet_loss_measurement: String,
}

impl InfluxOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: "ican".to_string(),
            latency_measurement: "p2ptxbyte".to_string(),
            packet_loss_measurement: "p2ptxpkt".to_string(),
        }
    }

    /// Sets the database to query.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the measurements read for latency and packet loss respectively.
    pub fn measurements(mut self, latency: impl Into<String>, packet_loss: impl Into<String>) -> Self {
        self.latency_measurement = latency.into();
        self.packet_loss_measurement = packet_loss.into();
        self
    }
}

/// Reads the latest point of each measurement whose source pod is the container's pod, through
/// the InfluxDB 1.x `/query` endpoint.
#[derive(Debug, Clone)]
pub struct InfluxSource {
    client: reqwest::Client,
    options: InfluxOptions,
}

impl InfluxSource {
    pub fn new(options: InfluxOptions) -> Self {
        Self { client: reqwest::Client::new(), options }
    }

    fn statement(&self, source: &str) -> String {
        let escaped = source.replace('\\', "\\\\").replace('\'', "\\'");
        format!(
            "SELECT * FROM \"{}\", \"{}\" WHERE \"spod_name\" = '{escaped}' ORDER BY time DESC LIMIT 1",
            self.options.latency_measurement, self.options.packet_loss_measurement
        )
    }
}

#[async_trait]
impl MetricsSource for InfluxSource {
    async fn query(&self, record: &ContainerRecord) -> Result<Sample> {
        let source = record
            .pod_name()
            .or_else(|| record.name.as_deref().map(|name| name.trim_start_matches('/')))
            .unwrap_or(&record.id);
        let url = format!("{}/query", self.options.url.trim_end_matches('/'));

        let response: QueryResponse = self
            .client
            .get(url)
            .query(&[("db", self.options.database.as_str()), ("q", self.statement(source).as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_sample(&response, &self.options.latency_measurement, &self.options.packet_loss_measurement)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub series: Vec<Series>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

impl Series {
    /// The value of `column` in the first row.
    fn first(&self, column: &str) -> Option<&serde_json::Value> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.values.first()?.get(index)
    }
}

fn to_param(value: Option<&serde_json::Value>) -> Param {
    match value {
        Some(serde_json::Value::String(s)) => Param::new(s.as_str()),
        Some(serde_json::Value::Number(n)) => Param::new(n.to_string()),
        _ => Param::Unset,
    }
}

/// Builds a [`Sample`] out of a query response, matching series and columns by name.
pub fn parse_sample(response: &QueryResponse, latency: &str, packet_loss: &str) -> Result<Sample> {
    if let Some(error) = &response.error {
        return Err(Error::Unavailable(error.clone()));
    }
    let result = response
        .results
        .first()
        .ok_or_else(|| Error::Schema("no statement result".to_string()))?;
    if let Some(error) = &result.error {
        return Err(Error::Unavailable(error.clone()));
    }

    let series = |name: &str| result.series.iter().find(|s| s.name == name);
    let latency = series(latency);
    let packet_loss = series(packet_loss);

    let label = latency.or(packet_loss).and_then(|s| s.first("dpod_name"));

    Ok(Sample {
        label: to_param(label),
        latency: to_param(latency.and_then(|s| s.first("value"))),
        packet_loss: to_param(packet_loss.and_then(|s| s.first("value"))),
    })
}

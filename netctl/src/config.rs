use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use netctl_tc::ShaperOptions;

use crate::metrics::InfluxOptions;

/// Latency and packet loss controls for running containers.
#[derive(Debug, Clone, Parser)]
#[command(name = "netctl", version, about)]
pub struct Args {
    /// Unix socket polled by the visualization host.
    #[arg(
        long,
        env = "NETCTL_SOCKET",
        default_value = "/var/run/scope/plugins/network-control/network-control.sock"
    )]
    pub socket_path: PathBuf,

    /// Serve over TCP on this address instead of the Unix socket.
    #[arg(long, env = "NETCTL_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Device inside the container namespaces carrying the netem qdisc.
    #[arg(long, env = "NETCTL_INTERFACE", default_value = "eth0")]
    pub interface: String,

    #[arg(long, env = "NETCTL_TC_BINARY", default_value = "tc")]
    pub tc_binary: String,

    /// Base URL of an InfluxDB instance to enrich reports from. Disabled if absent.
    #[arg(long, env = "NETCTL_INFLUX_URL")]
    pub influx_url: Option<String>,

    #[arg(long, env = "NETCTL_INFLUX_DB", default_value = "ican")]
    pub influx_db: String,

    /// Upper bound on each enrichment query.
    #[arg(long, env = "NETCTL_METRICS_TIMEOUT_MS", default_value_t = 500)]
    pub metrics_timeout_ms: u64,

    /// Default log filter, overridden by `RUST_LOG`.
    #[arg(long, env = "NETCTL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    pub fn shaper_options(&self) -> ShaperOptions {
        ShaperOptions::default().interface(&self.interface).tc_binary(&self.tc_binary)
    }

    pub fn influx_options(&self) -> Option<InfluxOptions> {
        self.influx_url.as_ref().map(|url| InfluxOptions::new(url).database(&self.influx_db))
    }

    pub const fn metrics_timeout(&self) -> Duration {
        Duration::from_millis(self.metrics_timeout_ms)
    }
}

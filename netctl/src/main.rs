use std::{sync::Arc, time::Duration};

use clap::Parser;
use netctl::{
    config::Args,
    docker::DockerWatcher,
    metrics::{Disabled, InfluxSource, MetricsSource},
    server::{self, AppState},
    store::Store,
};
use netctl_tc::{StatusCache, TrafficShaper};
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

const DOCKER_RETRY_DELAY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = Arc::new(Store::new());
    let shaper = Arc::new(TrafficShaper::new(args.shaper_options(), Arc::new(StatusCache::new())));
    let metrics: Arc<dyn MetricsSource> = match args.influx_options() {
        Some(options) => {
            tracing::info!(?options, "enriching reports from influxdb");
            Arc::new(InfluxSource::new(options))
        }
        None => Arc::new(Disabled),
    };

    let watcher = DockerWatcher::connect(Arc::clone(&store))?;
    tokio::spawn(async move {
        loop {
            if let Err(e) = watcher.run().await {
                tracing::error!(%e, "docker event loop failed, retrying");
            }
            tokio::time::sleep(DOCKER_RETRY_DELAY).await;
        }
    });

    let state = AppState::new(store, shaper).with_metrics(metrics, args.metrics_timeout());
    let router = server::create_router(Arc::new(state));

    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutting down");
    };

    match args.listen {
        Some(addr) => server::serve_tcp(addr, router, shutdown).await?,
        None => server::serve_unix(&args.socket_path, router, shutdown).await?,
    }

    Ok(())
}

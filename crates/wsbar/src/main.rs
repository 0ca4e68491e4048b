mod client;
mod config;
mod events;
mod logging;
mod metrics;
mod poll;
mod publisher;
mod shutdown;
#[cfg(test)]
mod testing;

use anyhow::Context;
use config::{load_config, Config, OutputFormat};
use events::{EventPathHealth, EventReconciler};
use metrics::{Metric, MetricRoots};
use poll::PollReconciler;
use publisher::{Presenter, Publisher, Segment, Surface, SwaybarSurface, TextSurface};
use shutdown::ShutdownRx;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wsbar_core::SharedStore;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("invalid configuration")?;
    let _log_guard = logging::init_logging(&config);
    info!(
        event = "wsbar_start",
        format = ?config.format,
        metrics = config.metrics_enabled,
        poll_interval_ms = config.poll_interval.as_millis() as u64
    );

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    let signals = tokio::spawn(async move {
        wait_for_signal().await;
        info!(event = "shutdown_requested");
        let _ = shutdown_tx.send(true);
    });

    let (publisher, queue) = publisher::channel();
    let (producers, layout) = spawn_producers(&config, &publisher, &shutdown_rx);
    drop(publisher);

    let stdout = io::stdout();
    match config.format {
        OutputFormat::Text => {
            present(layout, TextSurface::new(stdout), queue, shutdown_rx).await;
        }
        OutputFormat::Swaybar => {
            present(layout, SwaybarSurface::new(stdout), queue, shutdown_rx).await;
        }
    }

    // Dropping the sender releases any producer still waiting on shutdown.
    signals.abort();
    let drain = async {
        for handle in producers {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!(event = "producer_panicked", error = %err);
                }
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(event = "shutdown_grace_expired");
    }
    info!(event = "wsbar_stop");
    Ok(())
}

async fn present<S: Surface>(
    layout: Vec<Segment>,
    surface: S,
    queue: publisher::JobQueue,
    shutdown: ShutdownRx,
) {
    Presenter::new(layout, surface).run(queue, shutdown).await;
    debug!(event = "presenter_stop");
}

fn spawn_producers(
    config: &Config,
    publisher: &Publisher,
    shutdown: &ShutdownRx,
) -> (Vec<JoinHandle<()>>, Vec<Segment>) {
    let mut producers = vec![metrics::spawn_clock(publisher.clone(), shutdown.clone())];

    let roots = Arc::new(MetricRoots::new(&config.proc_root, &config.sys_root));
    let battery = config.metrics_enabled && roots.has_battery();
    if config.metrics_enabled {
        let mut enabled = vec![Metric::Cpu, Metric::Temperature, Metric::Memory];
        if battery {
            enabled.push(Metric::Battery);
        }
        for metric in enabled {
            producers.push(metrics::spawn_metric(
                metric,
                roots.clone(),
                publisher.clone(),
                shutdown.clone(),
            ));
        }
    }

    match config.socket_path() {
        Ok(path) => producers.push(tokio::spawn(sync_compositor(
            path.to_path_buf(),
            config.poll_interval,
            publisher.clone(),
            shutdown.clone(),
        ))),
        Err(err) => error!(event = "compositor_unavailable", error = %err),
    }

    (producers, publisher::layout(config.metrics_enabled, battery))
}

/// Seeds the store, then runs the event and poll reconcilers side by side.
async fn sync_compositor(
    socket_path: PathBuf,
    poll_interval: Duration,
    publisher: Publisher,
    mut shutdown: ShutdownRx,
) {
    let store = SharedStore::new();
    let health = EventPathHealth::new();
    let mut poller = PollReconciler::new(
        socket_path.clone(),
        poll_interval,
        store.clone(),
        publisher.clone(),
        health.clone(),
    );
    if !poller.seed(&mut shutdown).await {
        return;
    }

    let events = tokio::spawn(
        EventReconciler::new(socket_path, store, publisher, health).run(shutdown.clone()),
    );
    poller.run(shutdown).await;
    if let Err(err) = events.await {
        if !err.is_cancelled() {
            warn!(event = "producer_panicked", task = "event_reconciler", error = %err);
        }
    }
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!(event = "sigterm_unavailable", error = %err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

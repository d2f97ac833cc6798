// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use prometheus::Registry;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use log_sentry::alerts::{Sink, WebhookSink};
use log_sentry::analyzer::Analyzer;
use log_sentry::anomaly::{AnomalyConfig, AnomalyDetector};
use log_sentry::collector::MetricsCollector;
use log_sentry::config::{load_rules, load_services, AppConfig};
use log_sentry::enricher::Enricher;
use log_sentry::monitor::{Fim, ProcessSentinel};
use log_sentry::observability::serve_metrics;
use log_sentry::parser::ParserRegistry;
use log_sentry::pipeline::{
    journald, start_ssh_monitoring, start_web_monitoring, syslog::SyslogServer, PipelineContext,
    WorkerPool,
};
use log_sentry::recorder::{ProcfsProbe, RecorderConfig, ResourceRecorder};
use log_sentry::storage::RedbStore;

#[derive(Parser)]
#[command(name = "log-sentry")]
#[command(about = "Host security monitoring and crash-forensics agent", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Enable pretty debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };
    if args.debug {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(log_level)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(log_level)
            .init();
    }

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;
    info!(metrics_port = config.metrics_port, "starting log-sentry");

    let registry = Registry::new();

    // A store we cannot open is one of the two fatal startup errors.
    let store =
        Arc::new(RedbStore::open(&config.storage.path).context("failed to open store")?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    // GeoIP is an external collaborator; deployments wire a GeoLookup
    // implementation here when an mmdb reader is available.
    let enricher = Arc::new(Enricher::new(None));
    let collector = Arc::new(MetricsCollector::new(&registry)?);
    let analyzer = Arc::new(Analyzer::new());
    let anomaly = Arc::new(AnomalyDetector::new(AnomalyConfig {
        rate_404: config.anomaly.rate_404,
        capacity_404: config.anomaly.capacity_404,
        rate_5xx: config.anomaly.rate_5xx,
        capacity_5xx: config.anomaly.capacity_5xx,
        window: Duration::from_secs(config.anomaly.window_secs),
    }));
    handles.push(Arc::clone(&anomaly).spawn_sweeper(shutdown_rx.clone()));

    let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();
    if !config.webhook_url.is_empty() {
        sinks.push(Arc::new(WebhookSink::new(config.webhook_url.clone())));
    }

    let ctx = Arc::new(PipelineContext {
        analyzer,
        anomaly: Arc::clone(&anomaly),
        enricher: Arc::clone(&enricher),
        collector: Arc::clone(&collector),
        store: Arc::clone(&store),
        sinks: sinks.clone(),
    });
    let pool = WorkerPool::start(config.workers, ctx);

    // One tailer per enabled service whose type resolves in the registry.
    let parsers = ParserRegistry::with_defaults();
    let services = match load_services(&config.services_path) {
        Ok(services) => services,
        Err(e) => {
            warn!("failed to load services config: {e}");
            Vec::new()
        }
    };
    for svc in services.into_iter().filter(|s| s.enabled) {
        if svc.kind == "ssh" {
            handles.extend(start_ssh_monitoring(
                svc.log_path,
                Arc::clone(&collector),
                shutdown_rx.clone(),
            ));
            continue;
        }
        match parsers.create(&svc.kind) {
            Some(parser) => handles.extend(start_web_monitoring(
                svc.name,
                svc.log_path,
                parser,
                pool.sender(),
                shutdown_rx.clone(),
            )),
            None => error!(
                service = %svc.name,
                kind = %svc.kind,
                available = ?parsers.available(),
                "unknown parser type, skipping service"
            ),
        }
    }

    handles.extend(SyslogServer::new(config.syslog_port, pool.sender()).start(shutdown_rx.clone()));
    if config.journald_enabled {
        handles.push(journald::spawn(pool.sender(), shutdown_rx.clone()));
    }

    let sentinel = Arc::new(ProcessSentinel::new(&registry)?);
    match load_rules(&config.rules_path) {
        Ok(rules) => sentinel.update_blacklist(rules.process_blacklist),
        Err(e) => info!("no rules file loaded, using default blacklist: {e}"),
    }
    handles.push(Arc::clone(&sentinel).spawn(
        Duration::from_secs(config.monitors.process_scan_secs),
        shutdown_rx.clone(),
    ));

    let fim = Arc::new(Fim::new(&registry)?);
    for path in &config.monitors.fim_paths {
        fim.add_path(path);
    }
    handles.push(Arc::clone(&fim).spawn(
        Duration::from_secs(config.monitors.fim_scan_secs),
        shutdown_rx.clone(),
    ));

    let probe = Arc::new(ProcfsProbe::new(Arc::clone(&enricher)));
    let recorder = Arc::new(ResourceRecorder::new(
        RecorderConfig {
            interval: Duration::from_secs(config.recorder.interval_secs),
            threshold: config.recorder.threshold,
        },
        probe,
        Arc::clone(&store),
        sinks,
        &registry,
    )?);
    handles.push(Arc::clone(&recorder).spawn(shutdown_rx.clone()));

    handles.push(spawn_retention(
        Arc::clone(&store),
        config.storage.retention_days,
        shutdown_rx.clone(),
    ));

    // The metrics endpoint is the other fatal startup surface.
    let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
    let mut metrics_task = tokio::spawn(serve_metrics(
        registry.clone(),
        metrics_addr,
        shutdown_rx.clone(),
    ));

    info!("log-sentry started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        _ = shutdown_signal() => info!("received shutdown signal"),
        res = &mut metrics_task => {
            fatal = Some(match res {
                Ok(Err(e)) => e.into(),
                Err(e) => e.into(),
                Ok(Ok(())) => anyhow!("metrics server exited unexpectedly"),
            });
        }
    }

    // Cooperative shutdown: signal every task, let tailers drop their
    // senders, then drain the worker pool before flipping the heartbeat.
    let _ = shutdown_tx.send(true);
    pool.shutdown().await;
    for handle in handles {
        let _ = handle.await;
    }
    if fatal.is_none() {
        let _ = metrics_task.await;
    }
    store.close();

    match fatal {
        Some(e) => Err(e),
        None => {
            info!("log-sentry shutdown complete");
            Ok(())
        }
    }
}

fn spawn_retention(
    store: Arc<RedbStore>,
    retention_days: i64,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let ttl = chrono::Duration::days(retention_days);
        let mut ticker = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.delete_old_crash_events(ttl) {
                        Ok(n) if n > 0 => info!(deleted = n, "retention pruned crash events"),
                        Ok(_) => {}
                        Err(e) => warn!("crash event retention failed: {e}"),
                    }
                    match store.delete_old_attacks(ttl) {
                        Ok(n) if n > 0 => info!(deleted = n, "retention pruned attacks"),
                        Ok(_) => {}
                        Err(e) => warn!("attack retention failed: {e}"),
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

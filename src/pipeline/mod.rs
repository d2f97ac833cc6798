// src/pipeline/mod.rs
pub mod journald;
pub mod syslog;
pub mod tailer;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::alerts::{Sink, SinkEvent};
use crate::analyzer::Analyzer;
use crate::anomaly::AnomalyDetector;
use crate::collector::MetricsCollector;
use crate::enricher::Enricher;
use crate::parser::{parse_ssh_line, LogParser};
use crate::storage::{AttackEntry, RedbStore};

/// The single bounded queue between tailers and workers is the sole
/// backpressure surface: sends block, lines are never dropped under load.
pub const QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_WORKERS: usize = 5;

/// One log line with enough context to process it standalone.
pub struct Job {
    pub service: String,
    pub log_path: String,
    pub line: String,
    pub parser: Arc<dyn LogParser>,
}

/// Shared components every worker needs. Workers themselves are
/// stateless beyond this handle.
pub struct PipelineContext {
    pub analyzer: Arc<Analyzer>,
    pub anomaly: Arc<AnomalyDetector>,
    pub enricher: Arc<Enricher>,
    pub collector: Arc<MetricsCollector>,
    pub store: Arc<RedbStore>,
    pub sinks: Vec<Arc<dyn Sink>>,
}

impl PipelineContext {
    /// Full per-line treatment: parse, analyze, anomaly-check, enrich,
    /// count, persist. Synchronous on purpose so the worker can wrap it
    /// in a panic boundary.
    fn handle_job(&self, job: &Job) {
        // Parse failures are expected for malformed input; drop silently.
        let mut rec = match job.parser.parse(&job.line) {
            Ok(rec) => rec,
            Err(_) => return,
        };
        // The job-provided tag is authoritative over the parser default.
        rec.service = job.service.clone();

        let mut attack = self.analyzer.detect_attack(&rec.path, &rec.user_agent);
        if !attack.detected {
            attack = self.analyzer.check_data_exfiltration(rec.body_bytes_sent);
        }

        let anomaly = self.anomaly.check(&rec.remote_ip, rec.status);
        let network_type = self.enricher.classify_ip(&rec.remote_ip);
        let (country, asn) = self.enricher.geo_enrich(&rec.remote_ip);

        self.collector
            .process_web(&rec, &attack, anomaly, network_type, &country, &asn);

        if attack.detected {
            let ua_family = self.enricher.classify_user_agent(&rec.user_agent);
            let entry = AttackEntry {
                service: rec.service.clone(),
                kind: attack.kind.as_str().to_string(),
                severity: attack.severity.as_str().to_string(),
                source_ip: rec.remote_ip.clone(),
                endpoint: rec.path.clone(),
                country: Some(country),
                asn: Some(asn),
                network: Some(network_type.to_string()),
                details: Some(format!("user_agent={} ({ua_family})", rec.user_agent)),
                ..AttackEntry::default()
            };
            match self.store.save_attack(entry) {
                Ok(saved) => {
                    for sink in &self.sinks {
                        sink.emit(SinkEvent::Attack(saved.clone()));
                    }
                }
                // Attack entries are lost on storage failure; log and move on.
                Err(e) => warn!(service = %rec.service, "attack persist failed: {e}"),
            }
        }
    }
}

/// Fixed-size worker pool over one bounded job queue.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(workers: usize, ctx: Arc<PipelineContext>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    loop {
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            debug!(worker = id, "job queue closed");
                            return;
                        };
                        // A worker panic must not kill the pool.
                        if catch_unwind(AssertUnwindSafe(|| ctx.handle_job(&job))).is_err() {
                            error!(worker = id, service = %job.service, "job panicked; continuing");
                        }
                    }
                })
            })
            .collect();

        info!(workers, "worker pool started");
        WorkerPool { tx, handles }
    }

    pub fn sender(&self) -> mpsc::Sender<Job> {
        self.tx.clone()
    }

    pub async fn submit(&self, job: Job) {
        if self.tx.send(job).await.is_err() {
            warn!("job queue closed, line dropped");
        }
    }

    /// Closes the queue and waits for workers to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Tails one web-log source and feeds it into the pool.
pub fn start_web_monitoring(
    service: String,
    log_path: String,
    parser: Arc<dyn LogParser>,
    jobs: mpsc::Sender<Job>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    info!(service = %service, path = %log_path, "monitoring web logs");
    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    let tail_handle = tailer::spawn(PathBuf::from(&log_path), line_tx, shutdown);

    let forward_handle = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            let job = Job {
                service: service.clone(),
                log_path: log_path.clone(),
                line,
                parser: Arc::clone(&parser),
            };
            if jobs.send(job).await.is_err() {
                return;
            }
        }
    });

    vec![tail_handle, forward_handle]
}

/// The SSH branch bypasses the worker pool: auth-log events only feed
/// session accounting.
pub fn start_ssh_monitoring(
    log_path: String,
    collector: Arc<MetricsCollector>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    info!(path = %log_path, "monitoring SSH logs");
    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    let tail_handle = tailer::spawn(PathBuf::from(&log_path), line_tx, shutdown);

    let handle = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            collector.process_ssh(&parse_ssh_line(&line));
        }
    });

    vec![tail_handle, handle]
}

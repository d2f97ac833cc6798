// src/recorder/mod.rs
pub mod forensic;
pub mod gpu;
pub mod procfs;

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::alerts::{Sink, SinkEvent};
use crate::error::Result;
use crate::storage::{rfc3339, CrashSummary, RedbStore};

pub use procfs::ProcfsProbe;

/// How many snapshots the in-memory recent window holds. Only this
/// window and stored crash events are queryable; there is no snapshot
/// history beyond it.
const RECENT_WINDOW: usize = 100;

/// A single process's resource state inside a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessSnapshot {
    pub pid: i32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub cpu_pct: f64,
    #[serde(default)]
    pub mem_pct: f64,
    #[serde(default)]
    pub rss_mb: f64,
    #[serde(default)]
    pub gpu_mem_mb: u64,
    #[serde(default)]
    pub oom_score: i32,
    #[serde(default)]
    pub read_bytes: u64,
    #[serde(default)]
    pub write_bytes: u64,
    #[serde(default)]
    pub net_rx: u64,
    #[serde(default)]
    pub net_tx: u64,
    #[serde(default)]
    pub net_ports: String,
    #[serde(default)]
    pub is_external: bool,
    #[serde(default)]
    pub fd_count: usize,
    #[serde(default)]
    pub thread_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GpuSnapshot {
    pub id: u32,
    pub util_pct: u32,
    pub mem_used_mb: u64,
    pub mem_total_mb: u64,
    pub temp_c: i32,
}

/// A single point-in-time full resource capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub total_cpu_pct: f64,
    pub total_mem_pct: f64,
    pub total_mem_gb: f64,
    pub disk_pct: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gpus: Vec<GpuSnapshot>,
    pub top_processes: Vec<ProcessSnapshot>,
    pub oom_leaders: Vec<ProcessSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProcessDetail {
    #[serde(default)]
    pub exe_path: String,
    #[serde(default)]
    pub logs: String,
}

/// A contiguous run of breached snapshots plus the post-hoc verdict.
/// Once `resolved` flips true the event is immutable and persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashEvent {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub trigger: String,
    pub verdict: String,
    pub severity: String,
    pub resolved: bool,
    pub snapshots: Vec<Snapshot>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub process_details: HashMap<i32, ProcessDetail>,
}

/// Host resource access, abstracted so tests can script the poll
/// sequence. The production implementation is [`ProcfsProbe`].
pub trait HostProbe: Send + Sync {
    /// Aggregate CPU percentage. May block briefly (sampling window).
    fn cpu_pct(&self) -> f64;
    /// (used percentage, total GB).
    fn mem(&self) -> (f64, f64);
    fn disk_pct(&self) -> f64;
    fn gpus(&self) -> Vec<GpuSnapshot>;
    /// Full process scan. Expensive; only called for full snapshots.
    fn processes(&self) -> Vec<ProcessSnapshot>;
    fn gpu_process_memory(&self) -> HashMap<i32, u64> {
        HashMap::new()
    }
}

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub interval: Duration,
    pub threshold: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            interval: Duration::from_secs(5),
            threshold: 90.0,
        }
    }
}

struct RecorderMetrics {
    last_cpu: Gauge,
    last_mem: Gauge,
    last_disk: Gauge,
    last_gpu: Gauge,
    critical_active: IntGauge,
    snapshots_total: IntCounter,
    events_opened_total: IntCounter,
    events_resolved: IntCounterVec,
    events_by_trigger: IntCounterVec,
    event_duration: Histogram,
}

impl RecorderMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let last_cpu = Gauge::new("resource_last_cpu_pct", "CPU percentage at last poll")?;
        let last_mem = Gauge::new("resource_last_mem_pct", "Memory percentage at last poll")?;
        let last_disk = Gauge::new("resource_last_disk_pct", "Disk usage percentage at last poll")?;
        let last_gpu = Gauge::new(
            "resource_last_gpu_pct",
            "Highest GPU memory percentage at last poll",
        )?;
        let critical_active = IntGauge::new(
            "resource_critical_active",
            "1 if a critical event is actively being recorded",
        )?;
        let snapshots_total =
            IntCounter::new("resource_snapshots_total", "Total critical snapshots taken")?;
        let events_opened_total =
            IntCounter::new("crash_events_total", "Total crash events detected")?;
        let events_resolved = IntCounterVec::new(
            Opts::new("crash_events_resolved_total", "Resolved crash events by severity"),
            &["severity"],
        )?;
        let events_by_trigger = IntCounterVec::new(
            Opts::new("crash_events_trigger_total", "Crash events by triggering metric"),
            &["metric"],
        )?;
        let event_duration = Histogram::with_opts(
            HistogramOpts::new("crash_event_duration_seconds", "Crash event duration")
                .buckets(vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )?;

        registry.register(Box::new(last_cpu.clone()))?;
        registry.register(Box::new(last_mem.clone()))?;
        registry.register(Box::new(last_disk.clone()))?;
        registry.register(Box::new(last_gpu.clone()))?;
        registry.register(Box::new(critical_active.clone()))?;
        registry.register(Box::new(snapshots_total.clone()))?;
        registry.register(Box::new(events_opened_total.clone()))?;
        registry.register(Box::new(events_resolved.clone()))?;
        registry.register(Box::new(events_by_trigger.clone()))?;
        registry.register(Box::new(event_duration.clone()))?;

        Ok(RecorderMetrics {
            last_cpu,
            last_mem,
            last_disk,
            last_gpu,
            critical_active,
            snapshots_total,
            events_opened_total,
            events_resolved,
            events_by_trigger,
            event_duration,
        })
    }
}

/// Threshold-gated crash recorder. Polls cheap aggregates every tick and
/// only pays for full process scans while some metric is breached (or for
/// the idle heartbeat written over the store's current-state slot).
pub struct ResourceRecorder {
    interval: Duration,
    threshold: f64,
    hysteresis: f64,
    probe: Arc<dyn HostProbe>,
    store: Arc<RedbStore>,
    sinks: Vec<Arc<dyn Sink>>,
    proc_root: PathBuf,
    active: Mutex<Option<CrashEvent>>,
    pending: Mutex<Vec<(Vec<u8>, CrashSummary)>>,
    recent: Mutex<VecDeque<Snapshot>>,
    metrics: RecorderMetrics,
}

impl ResourceRecorder {
    pub fn new(
        cfg: RecorderConfig,
        probe: Arc<dyn HostProbe>,
        store: Arc<RedbStore>,
        sinks: Vec<Arc<dyn Sink>>,
        registry: &Registry,
    ) -> Result<Self> {
        let proc_root = std::env::var("HOST_PROC").unwrap_or_else(|_| "/proc".to_string());
        Ok(ResourceRecorder {
            interval: cfg.interval,
            threshold: cfg.threshold,
            hysteresis: cfg.threshold - 5.0,
            probe,
            store,
            sinks,
            proc_root: PathBuf::from(proc_root),
            active: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_WINDOW)),
            metrics: RecorderMetrics::new(registry)?,
        })
    }

    /// Dedicated poller task. Runs on the blocking pool: CPU sampling
    /// holds the thread for ~100 ms per tick and must not starve the
    /// ingest runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        info!(
            threshold = self.threshold,
            hysteresis = self.hysteresis,
            interval_secs = self.interval.as_secs(),
            "resource recorder started"
        );
        tokio::task::spawn_blocking(move || loop {
            if *shutdown.borrow() {
                info!("resource recorder stopping");
                return;
            }
            // A panicking poll is contained to this tick.
            if catch_unwind(AssertUnwindSafe(|| self.poll_once())).is_err() {
                error!("resource poll panicked; continuing");
            }

            let mut slept = Duration::ZERO;
            while slept < self.interval {
                if *shutdown.borrow() {
                    return;
                }
                let step = std::cmp::min(Duration::from_millis(250), self.interval - slept);
                std::thread::sleep(step);
                slept += step;
            }
        })
    }

    /// One state-machine tick. Public so tests can drive the sequence
    /// without timing.
    pub fn poll_once(&self) {
        let cpu = self.probe.cpu_pct();
        let (mem_pct, mem_gb) = self.probe.mem();
        let disk = self.probe.disk_pct();
        let gpus = self.probe.gpus();
        let max_gpu = gpus
            .iter()
            .filter(|g| g.mem_total_mb > 0)
            .map(|g| g.mem_used_mb as f64 / g.mem_total_mb as f64 * 100.0)
            .fold(0.0f64, f64::max);

        self.metrics.last_cpu.set(cpu);
        self.metrics.last_mem.set(mem_pct);
        self.metrics.last_disk.set(disk);
        self.metrics.last_gpu.set(max_gpu);

        let trigger = if cpu >= self.threshold {
            Some(format!("cpu:{cpu:.1}%"))
        } else if mem_pct >= self.threshold {
            Some(format!("mem:{mem_pct:.1}%"))
        } else if disk >= self.threshold {
            Some(format!("disk:{disk:.1}%"))
        } else if max_gpu >= self.threshold {
            Some(format!("gpu:{max_gpu:.1}%"))
        } else {
            None
        };

        let is_active = self.active.lock().is_some();

        if !is_active {
            match trigger {
                Some(trigger) => self.open_event(trigger, cpu, mem_pct, mem_gb, disk, gpus),
                None => self.heartbeat(cpu, mem_pct, mem_gb, disk, gpus),
            }
        } else {
            let all_below = cpu < self.hysteresis
                && mem_pct < self.hysteresis
                && disk < self.hysteresis
                && max_gpu < self.hysteresis;
            if all_below {
                self.close_event();
            } else {
                self.record_tick(cpu, mem_pct, mem_gb, disk, gpus);
            }
        }
    }

    fn open_event(
        &self,
        trigger: String,
        cpu: f64,
        mem_pct: f64,
        mem_gb: f64,
        disk: f64,
        gpus: Vec<GpuSnapshot>,
    ) {
        let snap = self.take_full_snapshot(cpu, mem_pct, mem_gb, disk, gpus);
        let event = CrashEvent {
            id: generate_id(),
            started_at: snap.timestamp,
            ended_at: snap.timestamp,
            trigger: trigger.clone(),
            verdict: String::new(),
            severity: String::new(),
            resolved: false,
            snapshots: vec![snap.clone()],
            process_details: HashMap::new(),
        };

        warn!(trigger = %trigger, event = %event.id, "threshold breached, starting crash event");
        self.metrics.events_opened_total.inc();
        let metric = trigger.split(':').next().unwrap_or("unknown");
        self.metrics.events_by_trigger.with_label_values(&[metric]).inc();
        self.metrics.critical_active.set(1);
        self.metrics.snapshots_total.inc();

        *self.active.lock() = Some(event.clone());

        self.emit(SinkEvent::CrashStart(event));
        self.emit(SinkEvent::Snapshot {
            trigger,
            snapshot: snap,
        });
    }

    fn record_tick(&self, cpu: f64, mem_pct: f64, mem_gb: f64, disk: f64, gpus: Vec<GpuSnapshot>) {
        let snap = self.take_full_snapshot(cpu, mem_pct, mem_gb, disk, gpus);
        let trigger;
        {
            let mut guard = self.active.lock();
            let Some(event) = guard.as_mut() else { return };
            event.snapshots.push(snap.clone());
            event.ended_at = snap.timestamp;
            trigger = event.trigger.clone();
        }
        self.metrics.snapshots_total.inc();
        self.emit(SinkEvent::Snapshot {
            trigger,
            snapshot: snap,
        });
    }

    /// Hysteresis satisfied: everything is back under threshold - 5.
    /// Analysis and store writes run after the event lock is released.
    fn close_event(&self) {
        let Some(mut event) = self.active.lock().take() else { return };
        self.metrics.critical_active.set(0);

        let report = forensic::analyze(&event.snapshots);
        event.verdict = report.verdict;
        event.severity = report.severity.as_str().to_string();
        event.resolved = true;
        if let Some(last) = event.snapshots.last() {
            event.ended_at = last.timestamp;
        }
        self.fetch_process_details(&mut event);

        info!(
            event = %event.id,
            snapshots = event.snapshots.len(),
            severity = %event.severity,
            "crash event resolved"
        );

        let duration = (event.ended_at - event.started_at).num_milliseconds() as f64 / 1000.0;
        self.metrics.event_duration.observe(duration.max(0.0));
        self.metrics
            .events_resolved
            .with_label_values(&[&event.severity])
            .inc();

        self.persist(&event);
        self.emit(SinkEvent::CrashResolved(event));
    }

    fn heartbeat(&self, cpu: f64, mem_pct: f64, mem_gb: f64, disk: f64, gpus: Vec<GpuSnapshot>) {
        let snap = self.take_full_snapshot(cpu, mem_pct, mem_gb, disk, gpus);
        match serde_json::to_vec(&snap) {
            Ok(json) => {
                if let Err(e) = self.store.save_current_snapshot(&json) {
                    warn!("heartbeat snapshot write failed: {e}");
                }
            }
            Err(e) => warn!("heartbeat snapshot serialization failed: {e}"),
        }
    }

    fn take_full_snapshot(
        &self,
        cpu: f64,
        mem_pct: f64,
        mem_gb: f64,
        disk: f64,
        gpus: Vec<GpuSnapshot>,
    ) -> Snapshot {
        let mut procs = self.probe.processes();

        let gpu_mem = self.probe.gpu_process_memory();
        if !gpu_mem.is_empty() {
            for p in &mut procs {
                if let Some(mb) = gpu_mem.get(&p.pid) {
                    p.gpu_mem_mb = *mb;
                }
            }
        }

        procs.sort_by(|a, b| b.cpu_pct.partial_cmp(&a.cpu_pct).unwrap_or(std::cmp::Ordering::Equal));
        let top_cpu: Vec<ProcessSnapshot> = procs.iter().take(20).cloned().collect();

        procs.sort_by(|a, b| b.rss_mb.partial_cmp(&a.rss_mb).unwrap_or(std::cmp::Ordering::Equal));
        let top_mem: Vec<ProcessSnapshot> = procs.iter().take(20).cloned().collect();

        let mut seen = HashSet::new();
        let top_processes: Vec<ProcessSnapshot> = top_cpu
            .into_iter()
            .chain(top_mem)
            .filter(|p| seen.insert(p.pid))
            .collect();

        procs.sort_by(|a, b| b.oom_score.cmp(&a.oom_score));
        let oom_leaders: Vec<ProcessSnapshot> = procs.into_iter().take(10).collect();

        let snap = Snapshot {
            timestamp: Utc::now(),
            total_cpu_pct: cpu,
            total_mem_pct: mem_pct,
            total_mem_gb: mem_gb,
            disk_pct: disk,
            gpus,
            top_processes,
            oom_leaders,
        };

        let mut recent = self.recent.lock();
        if recent.len() == RECENT_WINDOW {
            recent.pop_front();
        }
        recent.push_back(snap.clone());

        snap
    }

    /// The tail of the recent-snapshot window, oldest first. `n = 0`
    /// returns the whole window.
    pub fn recent_snapshots(&self, n: usize) -> Vec<Snapshot> {
        let recent = self.recent.lock();
        let n = if n == 0 || n > recent.len() {
            recent.len()
        } else {
            n
        };
        recent.iter().skip(recent.len() - n).cloned().collect()
    }

    /// Enriches the closing event with the executable path and recent
    /// journal lines for every PID in the final snapshot's rankings.
    fn fetch_process_details(&self, event: &mut CrashEvent) {
        let Some(last) = event.snapshots.last() else { return };

        let pids: HashSet<i32> = last
            .top_processes
            .iter()
            .chain(last.oom_leaders.iter())
            .map(|p| p.pid)
            .collect();

        for pid in pids {
            let mut detail = ProcessDetail::default();

            let exe_link = self.proc_root.join(pid.to_string()).join("exe");
            if let Ok(path) = std::fs::read_link(&exe_link) {
                detail.exe_path = path.to_string_lossy().into_owned();
            }

            detail.logs = journal_lines(&format!("_PID={pid}"));
            if detail.logs.is_empty() && !detail.exe_path.is_empty() {
                detail.logs = journal_lines(&format!("_EXE={}", detail.exe_path));
            }

            event.process_details.insert(pid, detail);
        }
    }

    fn persist(&self, event: &CrashEvent) {
        let summary = CrashSummary {
            id: event.id.clone(),
            started_at: rfc3339(event.started_at),
            ended_at: rfc3339(event.ended_at),
            trigger: event.trigger.clone(),
            verdict: event.verdict.clone(),
            severity: event.severity.clone(),
            resolved: event.resolved,
            snapshot_count: event.snapshots.len(),
        };
        match serde_json::to_vec(event) {
            Ok(blob) => {
                self.pending.lock().push((blob, summary));
                self.flush_pending();
            }
            Err(e) => error!(event = %event.id, "crash event serialization failed: {e}"),
        }
    }

    /// Writes every queued event; failures stay queued and are retried at
    /// the next event close.
    fn flush_pending(&self) {
        let queued = std::mem::take(&mut *self.pending.lock());
        for (blob, summary) in queued {
            if let Err(e) = self.store.save_crash_event(&blob, &summary) {
                error!(event = %summary.id, "crash event write failed, will retry: {e}");
                self.pending.lock().push((blob, summary));
            }
        }
    }

    fn emit(&self, event: SinkEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }

    /// Copy of the in-flight event, if any.
    pub fn active_event(&self) -> Option<CrashEvent> {
        self.active.lock().clone()
    }
}

fn generate_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Most recent journal lines for a `_PID=` or `_EXE=` match. Empty when
/// the journal is unavailable or has nothing for the match.
fn journal_lines(match_expr: &str) -> String {
    match std::process::Command::new("journalctl")
        .args([match_expr, "-n", "50", "--no-pager"])
        .output()
    {
        Ok(out) if out.status.success() && !out.stdout.is_empty() => {
            String::from_utf8_lossy(&out.stdout).into_owned()
        }
        _ => String::new(),
    }
}

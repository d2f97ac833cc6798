// src/monitor/fim.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use prometheus::{IntCounterVec, Opts, Registry};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;

/// Modification-time-based file integrity monitor for a small set of
/// sensitive paths. Mtime beats hashing here: the sweep runs every few
/// seconds against files like /etc/passwd.
pub struct Fim {
    paths: Mutex<Vec<PathBuf>>,
    state: Mutex<HashMap<PathBuf, i64>>,
    change_metric: IntCounterVec,
}

impl Fim {
    pub fn new(registry: &Registry) -> Result<Self> {
        let change_metric = IntCounterVec::new(
            Opts::new(
                "sensitive_file_changed_total",
                "Total number of detected changes to sensitive files",
            ),
            &["path", "severity"],
        )?;
        registry.register(Box::new(change_metric.clone()))?;
        Ok(Fim {
            paths: Mutex::new(Vec::new()),
            state: Mutex::new(HashMap::new()),
            change_metric,
        })
    }

    /// Registers a path and seeds its baseline state.
    pub fn add_path(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        if let Some(mtime) = mtime_nanos(&path) {
            self.state.lock().insert(path.clone(), mtime);
        }
        self.paths.lock().push(path);
    }

    pub fn check_all(&self) {
        let paths = self.paths.lock().clone();
        for path in paths {
            let Some(current) = mtime_nanos(&path) else {
                // File gone; changes will register once it reappears.
                continue;
            };
            let mut state = self.state.lock();
            match state.get(&path) {
                Some(&last) if last != current => {
                    self.change_metric
                        .with_label_values(&[&path.to_string_lossy(), "critical"])
                        .inc();
                    warn!(path = %path.display(), "sensitive file changed");
                    state.insert(path, current);
                }
                Some(_) => {}
                None => {
                    state.insert(path, current);
                }
            }
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let fim = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => fim.check_all(),
                    _ = shutdown.changed() => {
                        info!("file integrity monitor stopping");
                        return;
                    }
                }
            }
        })
    }

    #[cfg(test)]
    fn change_count(&self, path: &str) -> u64 {
        self.change_metric
            .with_label_values(&[path, "critical"])
            .get()
    }
}

fn mtime_nanos(path: &PathBuf) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let nanos = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_nanos();
    Some(nanos as i64)
}

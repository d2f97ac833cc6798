// src/monitor/mod.rs
pub mod fim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use prometheus::{IntGaugeVec, Opts, Registry};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::Result;

pub use fim::Fim;

const DEFAULT_BLACKLIST: &[&str] = &["nc", "nmap", "hydra", "john", "xmrig"];
const CMDLINE_LABEL_MAX: usize = 50;

/// Periodically sweeps the process table against a name blacklist.
/// The blacklist is hot-reloadable through `update_blacklist`.
pub struct ProcessSentinel {
    blacklist: RwLock<Vec<String>>,
    alert_metric: IntGaugeVec,
    proc_root: PathBuf,
}

impl ProcessSentinel {
    pub fn new(registry: &Registry) -> Result<Self> {
        let alert_metric = IntGaugeVec::new(
            Opts::new(
                "security_unexpected_process_active",
                "Indicates if a blacklisted process is currently running (1=active)",
            ),
            &["name", "pid", "cmdline"],
        )?;
        registry.register(Box::new(alert_metric.clone()))?;

        let proc_root = std::env::var("HOST_PROC").unwrap_or_else(|_| "/proc".to_string());
        Ok(ProcessSentinel {
            blacklist: RwLock::new(DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect()),
            alert_metric,
            proc_root: PathBuf::from(proc_root),
        })
    }

    /// Replaces the blacklist (invoked by the external rules-reload
    /// collaborator). Applying the same list twice is a no-op.
    pub fn update_blacklist(&self, list: Vec<String>) {
        let normalized: Vec<String> = list.into_iter().map(|s| s.to_ascii_lowercase()).collect();
        let mut blacklist = self.blacklist.write();
        if *blacklist != normalized {
            info!(entries = normalized.len(), "process blacklist updated");
            *blacklist = normalized;
        }
    }

    pub fn blacklist(&self) -> Vec<String> {
        self.blacklist.read().clone()
    }

    /// Exact, case-insensitive name match. Substring matching would flag
    /// containerd-shim-runc-v2 for "nc"; that mistake lives in the tests
    /// now.
    fn is_blacklisted(&self, name: &str) -> Option<String> {
        let lowered = name.to_ascii_lowercase();
        self.blacklist
            .read()
            .iter()
            .find(|entry| **entry == lowered)
            .cloned()
    }

    pub fn scan(&self) {
        let entries = match std::fs::read_dir(&self.proc_root) {
            Ok(e) => e,
            Err(e) => {
                warn!("process sentinel scan failed: {e}");
                return;
            }
        };

        // Clear stale alerts so exited processes stop reporting.
        self.alert_metric.reset();

        for entry in entries.flatten() {
            let name_os = entry.file_name();
            let Ok(pid) = name_os.to_string_lossy().parse::<i32>() else {
                continue;
            };
            let dir = entry.path();
            let Ok(comm) = std::fs::read_to_string(dir.join("comm")) else {
                continue;
            };
            let name = comm.trim();

            if let Some(matched) = self.is_blacklisted(name) {
                let mut cmd = std::fs::read_to_string(dir.join("cmdline"))
                    .map(|c| c.replace('\0', " ").trim().to_string())
                    .unwrap_or_default();
                if cmd.len() > CMDLINE_LABEL_MAX {
                    let mut cut = CMDLINE_LABEL_MAX;
                    while !cmd.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    cmd.truncate(cut);
                    cmd.push_str("...");
                }
                self.alert_metric
                    .with_label_values(&[&matched, &pid.to_string(), &cmd])
                    .set(1);
                warn!(name = %name, pid, cmd = %cmd, "suspicious process detected");
            }
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let sentinel = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let s = Arc::clone(&sentinel);
                        // The scan is all filesystem reads; keep it off the
                        // async workers.
                        let _ = tokio::task::spawn_blocking(move || s.scan()).await;
                    }
                    _ = shutdown.changed() => {
                        info!("process sentinel stopping");
                        return;
                    }
                }
            }
        })
    }
}

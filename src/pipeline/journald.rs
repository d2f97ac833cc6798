// src/pipeline/journald.rs
use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::parser::journald::JournalShimParser;
use crate::parser::LogParser;
use crate::pipeline::Job;

/// The fields we care about from `journalctl -o json` output.
#[derive(Deserialize)]
struct JournalEntry {
    #[serde(rename = "_HOSTNAME", default)]
    host: String,
    #[serde(rename = "_COMM", default)]
    command: String,
    #[serde(rename = "MESSAGE", default)]
    message: serde_json::Value,
}

/// Streams the system journal by invoking the journal dumper in
/// follow-JSON mode and reconstructing syslog-like lines for the shim
/// parser. Needs access to the host journal (socket or mount).
pub fn spawn(
    jobs: mpsc::Sender<Job>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(jobs, shutdown))
}

async fn run(jobs: mpsc::Sender<Job>, mut shutdown: watch::Receiver<bool>) {
    let mut child = match tokio::process::Command::new("journalctl")
        .args(["-f", "-o", "json"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("failed to start journalctl (is it installed/accessible?): {e}");
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else {
        error!("journalctl started without a stdout pipe");
        return;
    };
    info!("journald monitoring started");

    let parser: Arc<dyn LogParser> = Arc::new(JournalShimParser);
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        warn!("journalctl stream ended");
                        break;
                    }
                    Err(e) => {
                        warn!("journalctl read error: {e}");
                        break;
                    }
                };

                let entry: JournalEntry = match serde_json::from_str(&line) {
                    Ok(entry) => entry,
                    Err(_) => continue,
                };
                // MESSAGE can be a byte array for non-UTF8 payloads; only
                // plain strings are worth forwarding.
                let Some(message) = entry.message.as_str() else { continue };

                let syslog_line = format!("{} {}: {}", entry.host, entry.command, message);
                let job = Job {
                    service: "journald".to_string(),
                    log_path: "journald".to_string(),
                    line: syslog_line,
                    parser: Arc::clone(&parser),
                };
                if jobs.send(job).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                info!("journald reader stopping");
                break;
            }
        }
    }

    let _ = child.kill().await;
}

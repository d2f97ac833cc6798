// src/alerts/mod.rs
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::recorder::{CrashEvent, Snapshot};
use crate::storage::AttackEntry;

/// Everything the core pushes outward. Sinks are fire-and-forget: the
/// core never waits for delivery and never sees sink failures.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Snapshot { trigger: String, snapshot: Snapshot },
    CrashStart(CrashEvent),
    CrashResolved(CrashEvent),
    Attack(AttackEntry),
}

pub trait Sink: Send + Sync {
    fn emit(&self, event: SinkEvent);
}

/// Posts crash lifecycle and attack alerts to a Discord-compatible
/// webhook. Snapshot events are intentionally ignored (one per poll tick
/// would flood any channel).
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
    handle: tokio::runtime::Handle,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        WebhookSink {
            url,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client"),
            handle: tokio::runtime::Handle::current(),
        }
    }

    fn post(&self, content: String) {
        if self.url.is_empty() {
            return;
        }
        let client = self.client.clone();
        let url = self.url.clone();
        self.handle.spawn(async move {
            match client.post(&url).json(&json!({ "content": content })).send().await {
                Ok(resp) if resp.status().as_u16() >= 400 => {
                    warn!(status = resp.status().as_u16(), "webhook returned error status");
                }
                Ok(_) => debug!("webhook delivered"),
                Err(e) => warn!("webhook post failed: {e}"),
            }
        });
    }
}

impl Sink for WebhookSink {
    fn emit(&self, event: SinkEvent) {
        match event {
            SinkEvent::CrashStart(ev) => {
                let snap = ev.snapshots.first();
                let (cpu, mem, disk) = snap
                    .map(|s| (s.total_cpu_pct, s.total_mem_pct, s.disk_pct))
                    .unwrap_or_default();
                self.post(format!(
                    "🚨 **CRITICAL ALERT** — {}\nCPU: {:.1}% | MEM: {:.1}% | DISK: {:.1}%",
                    ev.trigger, cpu, mem, disk
                ));
            }
            SinkEvent::CrashResolved(ev) => {
                self.post(format!(
                    "✅ **RESOLVED** — {} ({} snapshots)\n{}",
                    ev.trigger,
                    ev.snapshots.len(),
                    ev.verdict
                ));
            }
            SinkEvent::Attack(entry) => {
                if entry.severity == "critical" || entry.severity == "high" {
                    self.post(format!(
                        "[{}] **{}**\n{} from {}\nSource: {}",
                        entry.severity, entry.kind, entry.endpoint, entry.source_ip, entry.service
                    ));
                }
            }
            SinkEvent::Snapshot { .. } => {}
        }
    }
}

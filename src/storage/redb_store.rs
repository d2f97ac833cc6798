// src/storage/redb_store.rs
use std::collections::HashMap;
use std::path::Path;

use chrono::{Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{error, info, warn};

use crate::error::{Result, SentryError};
use crate::storage::{
    paginate, parse_rfc3339, rfc3339, AggregatedStats, AttackEntry, CrashSummary, ListOpts,
    PageResult,
};

const CRASH_EVENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("crash_events");
const CRASH_META: TableDefinition<&str, &[u8]> = TableDefinition::new("crash_meta");
const ATTACKS: TableDefinition<&str, &[u8]> = TableDefinition::new("attacks");
const APP_STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("app_state");

const STATUS_KEY: &str = "status";
const CURRENT_SNAPSHOT_KEY: &str = "current_snapshot";
const FORCEFUL_SHUTDOWN_TRIGGER: &str = "Forceful Shutdown / Power Loss";
const FORCEFUL_SHUTDOWN_VERDICT: &str = "The application was forcefully terminated \
     (e.g., SIGKILL, OOM Killer, or sudden power loss) without a clean exit.";

/// Embedded bucketed store for crash events, attacks, and the shutdown
/// heartbeat. All public operations are safe for concurrent invocation;
/// each groups its own transaction and redb serializes writers.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Opens (or creates) the database, creates missing tables, and runs
    /// unclean-shutdown detection before marking the session as running.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| SentryError::io(dir.display().to_string(), e))?;
            }
        }

        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            txn.open_table(CRASH_EVENTS)?;
            txn.open_table(CRASH_META)?;
            txn.open_table(ATTACKS)?;
            txn.open_table(APP_STATE)?;
        }
        txn.commit()?;

        info!(path = %path.display(), "store opened");
        let store = RedbStore { db };

        if let Err(e) = store.check_and_mark_running() {
            warn!("failed to process app state: {e}");
        }
        Ok(store)
    }

    /// Reads the heartbeat marker. A leftover "running" means the previous
    /// process never reached `close()`: synthesize one resolved critical
    /// crash event for the forensic record, then continue normally.
    fn check_and_mark_running(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut state = txn.open_table(APP_STATE)?;
            let was_running = state
                .get(STATUS_KEY)?
                .map(|v| v.value() == b"running")
                .unwrap_or(false);

            if was_running {
                error!("unclean shutdown detected: the previous run was terminated forcefully or lost power");

                let id = generate_store_id();
                let now = rfc3339(Utc::now());
                let summary = CrashSummary {
                    id: id.clone(),
                    started_at: now.clone(),
                    ended_at: now.clone(),
                    trigger: FORCEFUL_SHUTDOWN_TRIGGER.to_string(),
                    verdict: FORCEFUL_SHUTDOWN_VERDICT.to_string(),
                    severity: "critical".to_string(),
                    resolved: true,
                    snapshot_count: 0,
                };
                let blob = serde_json::to_vec(&serde_json::json!({
                    "id": id,
                    "started_at": now,
                    "ended_at": now,
                    "trigger": FORCEFUL_SHUTDOWN_TRIGGER,
                    "verdict": FORCEFUL_SHUTDOWN_VERDICT,
                    "severity": "critical",
                    "resolved": true,
                    "snapshots": [],
                }))?;
                let meta = serde_json::to_vec(&summary)?;

                txn.open_table(CRASH_EVENTS)?.insert(id.as_str(), blob.as_slice())?;
                txn.open_table(CRASH_META)?.insert(id.as_str(), meta.as_slice())?;
                info!(event = %id, "recorded synthetic crash event for forceful shutdown");
            }

            state.insert(STATUS_KEY, b"running".as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    fn mark_stopped(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut state = txn.open_table(APP_STATE)?;
            state.insert(STATUS_KEY, b"stopped".as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Flips the heartbeat to "stopped". Safe to call more than once.
    pub fn close(&self) {
        info!("store closing, marking state as stopped");
        if let Err(e) = self.mark_stopped() {
            error!("failed to mark store stopped: {e}");
        }
    }

    pub fn save_crash_event(&self, blob: &[u8], summary: &CrashSummary) -> Result<()> {
        let meta = serde_json::to_vec(summary)?;
        let txn = self.db.begin_write()?;
        {
            txn.open_table(CRASH_EVENTS)?
                .insert(summary.id.as_str(), blob)?;
            txn.open_table(CRASH_META)?
                .insert(summary.id.as_str(), meta.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_crash_event(&self, id: &str) -> Result<Vec<u8>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CRASH_EVENTS)?;
        match table.get(id)? {
            Some(v) => Ok(v.value().to_vec()),
            None => Err(SentryError::NotFound(id.to_string())),
        }
    }

    pub fn list_crash_events(&self, opts: ListOpts) -> Result<PageResult<CrashSummary>> {
        let opts = opts.normalized();
        let mut all: Vec<CrashSummary> = Vec::new();

        let txn = self.db.begin_read()?;
        let table = txn.open_table(CRASH_META)?;
        for row in table.iter()? {
            let (_, v) = row?;
            // Corrupt rows never abort a scan.
            let cs: CrashSummary = match serde_json::from_slice(v.value()) {
                Ok(cs) => cs,
                Err(_) => continue,
            };
            if let Some(sev) = &opts.severity {
                if !cs.severity.eq_ignore_ascii_case(sev) {
                    continue;
                }
            }
            if let Some(trigger) = &opts.trigger {
                if !cs.trigger.eq_ignore_ascii_case(trigger) {
                    continue;
                }
            }
            if let Some(since) = opts.since {
                match parse_rfc3339(&cs.started_at) {
                    Some(t) if t >= since => {}
                    _ => continue,
                }
            }
            if let Some(until) = opts.until {
                match parse_rfc3339(&cs.started_at) {
                    Some(t) if t <= until => {}
                    _ => continue,
                }
            }
            all.push(cs);
        }

        // Newest first. All timestamps share one format, so the string
        // sort is chronological.
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(paginate(all, &opts))
    }

    pub fn delete_old_crash_events(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut deleted = 0usize;

        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(CRASH_META)?;
            let mut events = txn.open_table(CRASH_EVENTS)?;

            let mut to_delete: Vec<String> = Vec::new();
            for row in meta.iter()? {
                let (k, v) = row?;
                let cs: CrashSummary = match serde_json::from_slice(v.value()) {
                    Ok(cs) => cs,
                    Err(_) => continue,
                };
                if let Some(t) = parse_rfc3339(&cs.started_at) {
                    if t < cutoff {
                        to_delete.push(k.value().to_string());
                    }
                }
            }
            for key in &to_delete {
                meta.remove(key.as_str())?;
                events.remove(key.as_str())?;
                deleted += 1;
            }
        }
        txn.commit()?;

        if deleted > 0 {
            info!(deleted, "pruned old crash events");
        }
        Ok(deleted)
    }

    /// Persists an attack. Assigns id and timestamp when absent; the key
    /// `<timestamp>_<id>` makes forward iteration chronological.
    pub fn save_attack(&self, mut entry: AttackEntry) -> Result<AttackEntry> {
        if entry.id.is_empty() {
            entry.id = generate_store_id();
        }
        if entry.timestamp.is_empty() {
            entry.timestamp = rfc3339(Utc::now());
        }
        let data = serde_json::to_vec(&entry)?;
        let key = format!("{}_{}", entry.timestamp, entry.id);

        let txn = self.db.begin_write()?;
        {
            txn.open_table(ATTACKS)?.insert(key.as_str(), data.as_slice())?;
        }
        txn.commit()?;
        Ok(entry)
    }

    pub fn list_attacks(&self, opts: ListOpts) -> Result<PageResult<AttackEntry>> {
        let opts = opts.normalized();
        let mut all: Vec<AttackEntry> = Vec::new();

        let txn = self.db.begin_read()?;
        let table = txn.open_table(ATTACKS)?;
        for row in table.iter()? {
            let (_, v) = row?;
            let ae: AttackEntry = match serde_json::from_slice(v.value()) {
                Ok(ae) => ae,
                Err(_) => continue,
            };
            if let Some(sev) = &opts.severity {
                if !ae.severity.eq_ignore_ascii_case(sev) {
                    continue;
                }
            }
            if let Some(service) = &opts.service {
                if !ae.service.eq_ignore_ascii_case(service) {
                    continue;
                }
            }
            if let Some(since) = opts.since {
                match parse_rfc3339(&ae.timestamp) {
                    Some(t) if t >= since => {}
                    _ => continue,
                }
            }
            if let Some(until) = opts.until {
                match parse_rfc3339(&ae.timestamp) {
                    Some(t) if t <= until => {}
                    _ => continue,
                }
            }
            all.push(ae);
        }

        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(paginate(all, &opts))
    }

    pub fn delete_old_attacks(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut deleted = 0usize;

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ATTACKS)?;
            let mut to_delete: Vec<String> = Vec::new();
            for row in table.iter()? {
                let (k, v) = row?;
                let ae: AttackEntry = match serde_json::from_slice(v.value()) {
                    Ok(ae) => ae,
                    Err(_) => continue,
                };
                if let Some(t) = parse_rfc3339(&ae.timestamp) {
                    if t < cutoff {
                        to_delete.push(k.value().to_string());
                    }
                }
            }
            for key in &to_delete {
                table.remove(key.as_str())?;
                deleted += 1;
            }
        }
        txn.commit()?;

        if deleted > 0 {
            info!(deleted, "pruned old attack entries");
        }
        Ok(deleted)
    }

    /// Single pass over crash_meta and attacks.
    pub fn get_stats(&self) -> Result<AggregatedStats> {
        let mut stats = AggregatedStats::default();
        let mut type_counts: HashMap<String, usize> = HashMap::new();
        let mut svc_counts: HashMap<String, usize> = HashMap::new();
        let mut total_duration = 0.0f64;

        let txn = self.db.begin_read()?;

        let meta = txn.open_table(CRASH_META)?;
        for row in meta.iter()? {
            let (_, v) = row?;
            let cs: CrashSummary = match serde_json::from_slice(v.value()) {
                Ok(cs) => cs,
                Err(_) => continue,
            };
            stats.total_crashes += 1;
            if !cs.resolved {
                stats.active_crashes += 1;
            }
            match cs.severity.to_ascii_lowercase().as_str() {
                "critical" => stats.critical_count += 1,
                "high" => stats.high_count += 1,
                "medium" => stats.medium_count += 1,
                _ => {}
            }
            if let (Some(start), Some(end)) =
                (parse_rfc3339(&cs.started_at), parse_rfc3339(&cs.ended_at))
            {
                total_duration += (end - start).num_milliseconds() as f64 / 1000.0;
            }
        }

        let attacks = txn.open_table(ATTACKS)?;
        for row in attacks.iter()? {
            let (_, v) = row?;
            let ae: AttackEntry = match serde_json::from_slice(v.value()) {
                Ok(ae) => ae,
                Err(_) => continue,
            };
            stats.total_attacks += 1;
            *type_counts.entry(ae.kind).or_default() += 1;
            if !ae.service.is_empty() {
                *svc_counts.entry(ae.service).or_default() += 1;
            }
        }

        if stats.total_crashes > 0 {
            stats.avg_duration_sec = total_duration / stats.total_crashes as f64;
        }
        if let Some((t, _)) = type_counts.into_iter().max_by_key(|(_, c)| *c) {
            stats.top_attack_type = t;
        }
        if let Some((s, _)) = svc_counts.into_iter().max_by_key(|(_, c)| *c) {
            stats.top_attacked_service = s;
        }
        Ok(stats)
    }

    /// Overwrites the single "current state" heartbeat snapshot. Taken on
    /// every idle poll, so this slot always holds the latest healthy view.
    pub fn save_current_snapshot(&self, snapshot_json: &[u8]) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            txn.open_table(APP_STATE)?
                .insert(CURRENT_SNAPSHOT_KEY, snapshot_json)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_current_snapshot(&self) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(APP_STATE)?;
        Ok(table.get(CURRENT_SNAPSHOT_KEY)?.map(|v| v.value().to_vec()))
    }
}

fn generate_store_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

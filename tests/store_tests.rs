// tests/store_tests.rs
use anyhow::Result;
use chrono::{Duration, Utc};

use log_sentry::recorder::{CrashEvent, Snapshot};
use log_sentry::storage::{rfc3339, AttackEntry, CrashSummary, ListOpts, RedbStore};

fn open_store(dir: &tempfile::TempDir) -> Result<RedbStore> {
    Ok(RedbStore::open(dir.path().join("sentry.db"))?)
}

fn attack(service: &str, severity: &str, ts: Option<String>) -> AttackEntry {
    AttackEntry {
        service: service.to_string(),
        kind: "SQL Injection".to_string(),
        severity: severity.to_string(),
        source_ip: "1.2.3.4".to_string(),
        endpoint: "/index.php?id=1".to_string(),
        timestamp: ts.unwrap_or_default(),
        ..AttackEntry::default()
    }
}

fn summary(id: &str, severity: &str, trigger: &str, started_at: String) -> CrashSummary {
    CrashSummary {
        id: id.to_string(),
        started_at: started_at.clone(),
        ended_at: started_at,
        trigger: trigger.to_string(),
        verdict: "test verdict".to_string(),
        severity: severity.to_string(),
        resolved: true,
        snapshot_count: 1,
    }
}

#[test]
fn save_attack_appears_first_in_listing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    // Two older entries, then the fresh one.
    for days in [2, 1] {
        store.save_attack(attack(
            "nginx",
            "critical",
            Some(rfc3339(Utc::now() - Duration::days(days))),
        ))?;
    }
    let saved = store.save_attack(attack("nginx", "critical", None))?;
    assert!(!saved.id.is_empty());
    assert!(!saved.timestamp.is_empty());

    let page = store.list_attacks(ListOpts {
        page: 1,
        page_size: 20,
        ..ListOpts::default()
    })?;
    assert_eq!(page.total, 3);
    assert_eq!(page.items[0].id, saved.id);
    Ok(())
}

#[test]
fn attack_filters_by_severity_service_and_time() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    store.save_attack(attack("nginx", "critical", None))?;
    store.save_attack(attack("nginx", "medium", None))?;
    store.save_attack(attack("caddy", "critical", None))?;
    store.save_attack(attack(
        "nginx",
        "critical",
        Some(rfc3339(Utc::now() - Duration::days(10))),
    ))?;

    let by_severity = store.list_attacks(ListOpts {
        severity: Some("critical".to_string()),
        ..ListOpts::default()
    })?;
    assert_eq!(by_severity.total, 3);

    let by_service = store.list_attacks(ListOpts {
        service: Some("caddy".to_string()),
        ..ListOpts::default()
    })?;
    assert_eq!(by_service.total, 1);

    let recent = store.list_attacks(ListOpts {
        since: Some(Utc::now() - Duration::days(1)),
        ..ListOpts::default()
    })?;
    assert_eq!(recent.total, 3);

    let old = store.list_attacks(ListOpts {
        until: Some(Utc::now() - Duration::days(1)),
        ..ListOpts::default()
    })?;
    assert_eq!(old.total, 1);
    Ok(())
}

#[test]
fn page_size_clamping() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    for _ in 0..5 {
        store.save_attack(attack("nginx", "high", None))?;
    }

    let defaulted = store.list_attacks(ListOpts {
        page: 0,
        page_size: 0,
        ..ListOpts::default()
    })?;
    assert_eq!(defaulted.page_size, 20);
    assert_eq!(defaulted.page, 1);

    let clamped = store.list_attacks(ListOpts {
        page: 1,
        page_size: 1000,
        ..ListOpts::default()
    })?;
    assert_eq!(clamped.page_size, 100);

    let paged = store.list_attacks(ListOpts {
        page: 2,
        page_size: 2,
        ..ListOpts::default()
    })?;
    assert_eq!(paged.items.len(), 2);
    assert_eq!(paged.total, 5);
    assert_eq!(paged.total_pages, 3);

    let past_end = store.list_attacks(ListOpts {
        page: 9,
        page_size: 2,
        ..ListOpts::default()
    })?;
    assert!(past_end.items.is_empty());
    assert_eq!(past_end.total, 5);
    Ok(())
}

#[test]
fn retention_prunes_only_expired_attacks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    for days in [31, 29, 1] {
        store.save_attack(attack(
            "nginx",
            "high",
            Some(rfc3339(Utc::now() - Duration::days(days))),
        ))?;
    }

    let deleted = store.delete_old_attacks(Duration::days(30))?;
    assert_eq!(deleted, 1);

    let page = store.list_attacks(ListOpts::default())?;
    assert_eq!(page.total, 2);
    Ok(())
}

#[test]
fn crash_event_roundtrip_and_listing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    let now = Utc::now();
    let event = CrashEvent {
        id: "deadbeefdeadbeef".to_string(),
        started_at: now,
        ended_at: now + Duration::seconds(15),
        trigger: "cpu:95.0%".to_string(),
        verdict: "CPU SATURATION: test".to_string(),
        severity: "high".to_string(),
        resolved: true,
        snapshots: vec![Snapshot {
            timestamp: now,
            total_cpu_pct: 95.0,
            total_mem_pct: 40.0,
            total_mem_gb: 64.0,
            disk_pct: 30.0,
            gpus: Vec::new(),
            top_processes: Vec::new(),
            oom_leaders: Vec::new(),
        }],
        process_details: Default::default(),
    };
    let blob = serde_json::to_vec(&event)?;
    let meta = summary(&event.id, "high", "cpu:95.0%", rfc3339(now));
    store.save_crash_event(&blob, &meta)?;

    // Blob round-trips exactly.
    let fetched = store.get_crash_event("deadbeefdeadbeef")?;
    let decoded: CrashEvent = serde_json::from_slice(&fetched)?;
    assert_eq!(decoded, event);

    // Unknown id is a NotFound error.
    assert!(store.get_crash_event("0000000000000000").is_err());

    let page = store.list_crash_events(ListOpts::default())?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, "deadbeefdeadbeef");
    assert_eq!(page.items[0].snapshot_count, 1);
    Ok(())
}

#[test]
fn crash_listing_sorts_and_filters() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    let now = Utc::now();
    for (i, (sev, trig)) in [("high", "cpu:95.0%"), ("critical", "mem:93.0%"), ("high", "cpu:99.0%")]
        .iter()
        .enumerate()
    {
        let started = rfc3339(now - Duration::hours(i as i64));
        let meta = summary(&format!("ev{i}"), sev, trig, started);
        store.save_crash_event(b"{}", &meta)?;
    }

    let all = store.list_crash_events(ListOpts::default())?;
    assert_eq!(all.total, 3);
    // Newest first: ev0 has the latest started_at.
    assert_eq!(all.items[0].id, "ev0");
    assert_eq!(all.items[2].id, "ev2");

    let critical = store.list_crash_events(ListOpts {
        severity: Some("critical".to_string()),
        ..ListOpts::default()
    })?;
    assert_eq!(critical.total, 1);
    assert_eq!(critical.items[0].id, "ev1");

    let by_trigger = store.list_crash_events(ListOpts {
        trigger: Some("cpu:99.0%".to_string()),
        ..ListOpts::default()
    })?;
    assert_eq!(by_trigger.total, 1);
    Ok(())
}

#[test]
fn unclean_shutdown_synthesizes_crash_event() -> Result<()> {
    let dir = tempfile::tempdir()?;

    // First run never calls close().
    {
        let store = open_store(&dir)?;
        let none = store.list_crash_events(ListOpts::default())?;
        assert_eq!(none.total, 0);
    }

    // Second open sees the leftover "running" marker.
    let store = open_store(&dir)?;
    let page = store.list_crash_events(ListOpts::default())?;
    assert_eq!(page.total, 1);
    let synthetic = &page.items[0];
    assert_eq!(synthetic.trigger, "Forceful Shutdown / Power Loss");
    assert_eq!(synthetic.severity, "critical");
    assert!(synthetic.resolved);
    assert_eq!(synthetic.snapshot_count, 0);

    // The stored blob is a well-formed, snapshotless crash event.
    let blob = store.get_crash_event(&synthetic.id)?;
    let event: CrashEvent = serde_json::from_slice(&blob)?;
    assert!(event.snapshots.is_empty());
    assert!(event.resolved);
    Ok(())
}

#[test]
fn clean_shutdown_leaves_no_trace() -> Result<()> {
    let dir = tempfile::tempdir()?;

    {
        let store = open_store(&dir)?;
        store.close();
        // Calling close twice is safe.
        store.close();
    }

    let store = open_store(&dir)?;
    let page = store.list_crash_events(ListOpts::default())?;
    assert_eq!(page.total, 0);
    Ok(())
}

#[test]
fn stats_aggregate_both_buckets() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    let now = Utc::now();
    let mut meta = summary("c1", "critical", "mem:92.0%", rfc3339(now - Duration::seconds(30)));
    meta.ended_at = rfc3339(now);
    store.save_crash_event(b"{}", &meta)?;
    let mut meta = summary("c2", "high", "cpu:95.0%", rfc3339(now - Duration::seconds(10)));
    meta.ended_at = rfc3339(now);
    store.save_crash_event(b"{}", &meta)?;

    store.save_attack(attack("nginx", "critical", None))?;
    store.save_attack(attack("nginx", "high", None))?;
    let mut scanner = attack("caddy", "medium", None);
    scanner.kind = "Scanner".to_string();
    store.save_attack(scanner)?;

    let stats = store.get_stats()?;
    assert_eq!(stats.total_crashes, 2);
    assert_eq!(stats.active_crashes, 0);
    assert_eq!(stats.critical_count, 1);
    assert_eq!(stats.high_count, 1);
    assert!(stats.avg_duration_sec >= 19.0 && stats.avg_duration_sec <= 21.0);
    assert_eq!(stats.total_attacks, 3);
    assert_eq!(stats.top_attack_type, "SQL Injection");
    assert_eq!(stats.top_attacked_service, "nginx");
    Ok(())
}

#[test]
fn attack_entry_json_roundtrip_is_exact() -> Result<()> {
    let entry = AttackEntry {
        id: "abc123".to_string(),
        timestamp: "2026-08-02T10:00:00Z".to_string(),
        service: "nginx".to_string(),
        kind: "XSS".to_string(),
        severity: "high".to_string(),
        source_ip: "9.9.9.9".to_string(),
        endpoint: "/q?s=<script>".to_string(),
        country: Some("US".to_string()),
        asn: Some("AS15169".to_string()),
        network: Some("external".to_string()),
        details: None,
    };
    let json = serde_json::to_string(&entry)?;
    // Optional empty fields are omitted, the kind field uses its wire name.
    assert!(json.contains("\"type\":\"XSS\""));
    assert!(!json.contains("details"));

    let back: AttackEntry = serde_json::from_str(&json)?;
    assert_eq!(back, entry);
    Ok(())
}

#[test]
fn current_snapshot_is_overwrite_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = open_store(&dir)?;

    assert!(store.get_current_snapshot()?.is_none());
    store.save_current_snapshot(br#"{"n":1}"#)?;
    store.save_current_snapshot(br#"{"n":2}"#)?;
    assert_eq!(store.get_current_snapshot()?.unwrap(), br#"{"n":2}"#);
    Ok(())
}

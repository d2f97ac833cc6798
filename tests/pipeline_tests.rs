// tests/pipeline_tests.rs
use std::sync::Arc;

use anyhow::Result;
use prometheus::Registry;

use log_sentry::analyzer::Analyzer;
use log_sentry::anomaly::{AnomalyConfig, AnomalyDetector};
use log_sentry::collector::MetricsCollector;
use log_sentry::enricher::Enricher;
use log_sentry::parser::ParserRegistry;
use log_sentry::pipeline::{Job, PipelineContext, WorkerPool};
use log_sentry::storage::{ListOpts, RedbStore};

struct Harness {
    registry: Registry,
    anomaly: Arc<AnomalyDetector>,
    store: Arc<RedbStore>,
    ctx: Arc<PipelineContext>,
    parsers: ParserRegistry,
    _dir: tempfile::TempDir,
}

fn harness() -> Result<Harness> {
    let dir = tempfile::tempdir()?;
    let registry = Registry::new();
    let store = Arc::new(RedbStore::open(dir.path().join("sentry.db"))?);
    let anomaly = Arc::new(AnomalyDetector::new(AnomalyConfig::default()));
    let ctx = Arc::new(PipelineContext {
        analyzer: Arc::new(Analyzer::new()),
        anomaly: Arc::clone(&anomaly),
        enricher: Arc::new(Enricher::new(None)),
        collector: Arc::new(MetricsCollector::new(&registry)?),
        store: Arc::clone(&store),
        sinks: Vec::new(),
    });
    Ok(Harness {
        registry,
        anomaly,
        store,
        ctx,
        parsers: ParserRegistry::with_defaults(),
        _dir: dir,
    })
}

fn nginx_job(h: &Harness, line: &str) -> Job {
    Job {
        service: "edge-nginx".to_string(),
        log_path: "/var/log/nginx/access.log".to_string(),
        line: line.to_string(),
        parser: h.parsers.create("nginx").expect("nginx parser"),
    }
}

fn counter_sum(registry: &Registry, family: &str) -> f64 {
    registry
        .gather()
        .iter()
        .filter(|mf| mf.get_name() == family)
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value())
        .sum()
}

#[tokio::test]
async fn sql_injection_line_persists_an_attack() -> Result<()> {
    let h = harness()?;
    let pool = WorkerPool::start(5, Arc::clone(&h.ctx));

    pool.submit(nginx_job(
        &h,
        r#"1.2.3.4 - - [10/Nov/2024:12:34:56 +0000] "GET /index.php?id=1+UNION+SELECT+1 HTTP/1.1" 200 512 "-" "Mozilla/5.0""#,
    ))
    .await;
    pool.shutdown().await;

    let page = h.store.list_attacks(ListOpts {
        page: 1,
        page_size: 20,
        ..ListOpts::default()
    })?;
    assert_eq!(page.total, 1);
    let entry = &page.items[0];
    assert_eq!(entry.kind, "SQL Injection");
    assert_eq!(entry.severity, "critical");
    assert_eq!(entry.source_ip, "1.2.3.4");
    assert!(entry.endpoint.contains("UNION+SELECT"));
    // The job tag overrides the parser's default service.
    assert_eq!(entry.service, "edge-nginx");
    assert_eq!(entry.network.as_deref(), Some("external"));

    assert_eq!(counter_sum(&h.registry, "web_attack_detected_total"), 1.0);
    assert_eq!(counter_sum(&h.registry, "http_requests_total"), 1.0);
    Ok(())
}

#[tokio::test]
async fn eleventh_404_reports_a_flood() -> Result<()> {
    let h = harness()?;
    let pool = WorkerPool::start(5, Arc::clone(&h.ctx));

    for i in 0..11 {
        pool.submit(nginx_job(
            &h,
            &format!(
                r#"9.9.9.9 - - [10/Nov/2024:12:34:56 +0000] "GET /missing-{i} HTTP/1.1" 404 0 "-" "Mozilla/5.0""#
            ),
        ))
        .await;
    }
    pool.shutdown().await;

    assert_eq!(counter_sum(&h.registry, "web_anomaly_detected_total"), 1.0);
    assert_eq!(counter_sum(&h.registry, "http_requests_total"), 11.0);
    // No attack rows for plain 404 noise.
    assert_eq!(h.store.list_attacks(ListOpts::default())?.total, 0);
    Ok(())
}

#[tokio::test]
async fn statuses_outside_the_anomaly_bands_are_ignored() -> Result<()> {
    let h = harness()?;
    let pool = WorkerPool::start(2, Arc::clone(&h.ctx));

    for status in [499, 600, 200, 301] {
        pool.submit(nginx_job(
            &h,
            &format!(
                r#"8.8.4.4 - - [10/Nov/2024:12:34:56 +0000] "GET /p HTTP/1.1" {status} 10 "-" "-""#
            ),
        ))
        .await;
    }
    pool.shutdown().await;

    assert_eq!(h.anomaly.tracked_ips(), 0);
    assert_eq!(counter_sum(&h.registry, "web_anomaly_detected_total"), 0.0);
    Ok(())
}

#[tokio::test]
async fn exfiltration_is_strictly_greater_than_100mib() -> Result<()> {
    let h = harness()?;
    let pool = WorkerPool::start(2, Arc::clone(&h.ctx));

    let exactly = 100u64 * 1024 * 1024;
    pool.submit(nginx_job(
        &h,
        &format!(
            r#"7.7.7.7 - - [10/Nov/2024:12:34:56 +0000] "GET /dump.sql HTTP/1.1" 200 {exactly} "-" "-""#
        ),
    ))
    .await;
    pool.submit(nginx_job(
        &h,
        &format!(
            r#"7.7.7.7 - - [10/Nov/2024:12:34:56 +0000] "GET /dump.sql HTTP/1.1" 200 {} "-" "-""#,
            exactly + 1
        ),
    ))
    .await;
    pool.shutdown().await;

    let page = h.store.list_attacks(ListOpts::default())?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].kind, "Data Exfiltration (Large Download)");
    assert_eq!(page.items[0].severity, "high");
    Ok(())
}

#[tokio::test]
async fn malformed_lines_are_dropped_without_killing_workers() -> Result<()> {
    let h = harness()?;
    let pool = WorkerPool::start(2, Arc::clone(&h.ctx));

    pool.submit(nginx_job(&h, "complete garbage with no structure")).await;
    pool.submit(nginx_job(&h, "")).await;
    // A valid line afterwards still gets processed by the same pool.
    pool.submit(nginx_job(
        &h,
        r#"2.3.4.5 - - [10/Nov/2024:12:34:56 +0000] "GET /fine HTTP/1.1" 200 10 "-" "Mozilla/5.0""#,
    ))
    .await;
    pool.shutdown().await;

    assert_eq!(counter_sum(&h.registry, "http_requests_total"), 1.0);
    Ok(())
}

#[tokio::test]
async fn scanner_user_agent_is_flagged_medium() -> Result<()> {
    let h = harness()?;
    let pool = WorkerPool::start(2, Arc::clone(&h.ctx));

    pool.submit(nginx_job(
        &h,
        r#"6.6.6.6 - - [10/Nov/2024:12:34:56 +0000] "GET / HTTP/1.1" 200 10 "-" "sqlmap/1.7""#,
    ))
    .await;
    pool.shutdown().await;

    let page = h.store.list_attacks(ListOpts::default())?;
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].kind, "Scanner");
    assert_eq!(page.items[0].severity, "medium");
    assert!(page.items[0]
        .details
        .as_deref()
        .unwrap_or_default()
        .contains("sqlmap"));
    Ok(())
}

// src/parser/mod.rs
pub mod apache;
pub mod caddy;
pub mod envoy;
pub mod haproxy;
pub mod journald;
pub mod lighttpd;
pub mod nginx;
pub mod ssh;
pub mod tomcat;
pub mod traefik;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::Result;

pub use ssh::{parse_ssh_line, SshRecord};

/// Normalized web-log record, common to every dialect. Parsers fill it
/// best-effort: a record is preferable to a drop, so timestamps fall back
/// to "now" and numeric fields to 0 on field-level parse failure.
#[derive(Debug, Clone)]
pub struct GenericLogRecord {
    pub remote_ip: String,
    pub remote_user: String,
    pub time_local: DateTime<Utc>,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: u16,
    pub body_bytes_sent: u64,
    pub referer: String,
    pub user_agent: String,
    pub service: String,
    /// Request duration in seconds, for formats that log timings
    /// (HAProxy, Envoy, Traefik).
    pub latency: Option<f64>,
}

impl GenericLogRecord {
    pub(crate) fn base(service: &str) -> Self {
        GenericLogRecord {
            remote_ip: String::new(),
            remote_user: "-".to_string(),
            time_local: Utc::now(),
            method: String::new(),
            path: String::new(),
            protocol: String::new(),
            status: 0,
            body_bytes_sent: 0,
            referer: String::new(),
            user_agent: String::new(),
            service: service.to_string(),
            latency: None,
        }
    }
}

pub trait LogParser: Send + Sync {
    fn parse(&self, line: &str) -> Result<GenericLogRecord>;
}

/// Maps service type tags to parser factories. Built once at startup and
/// passed around as a handle; the `ssh` tag is routed separately and is
/// not part of this registry.
pub struct ParserRegistry {
    factories: HashMap<&'static str, fn() -> Arc<dyn LogParser>>,
}

impl ParserRegistry {
    pub fn with_defaults() -> Self {
        let mut factories: HashMap<&'static str, fn() -> Arc<dyn LogParser>> = HashMap::new();
        factories.insert("nginx", || Arc::new(nginx::NginxParser));
        factories.insert("apache", || Arc::new(apache::ApacheParser));
        factories.insert("caddy", || Arc::new(caddy::CaddyParser));
        factories.insert("traefik", || Arc::new(traefik::TraefikParser));
        factories.insert("envoy", || Arc::new(envoy::EnvoyParser));
        factories.insert("haproxy", || Arc::new(haproxy::HaproxyParser));
        factories.insert("tomcat", || Arc::new(tomcat::TomcatParser));
        factories.insert("lighttpd", || Arc::new(lighttpd::LighttpdParser));
        factories.insert("journald", || Arc::new(journald::JournalShimParser));
        ParserRegistry { factories }
    }

    pub fn create(&self, kind: &str) -> Option<Arc<dyn LogParser>> {
        self.factories.get(kind).map(|f| f())
    }

    pub fn available(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Common/Combined log timestamp, e.g. `10/Nov/2024:12:34:56 +0000`.
/// Falls back to the current instant.
pub(crate) fn parse_clf_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_str(s, "%d/%b/%Y:%H:%M:%S %z")
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Timestamp without a zone (HAProxy), interpreted as UTC.
pub(crate) fn parse_naive_time(s: &str, fmt: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, fmt)
        .map(|t| t.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_u16(s: &str) -> u16 {
    s.parse().unwrap_or(0)
}

pub(crate) fn parse_u64(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}

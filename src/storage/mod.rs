// src/storage/mod.rs
pub mod redb_store;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub use redb_store::RedbStore;

/// Severity scale shared by attack detection and crash forensics.
/// `Unknown` only ever comes out of forensic analysis with no process data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Unknown,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lightweight view of a crash event (no snapshots), kept in the meta
/// bucket so listings never deserialize full snapshot payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashSummary {
    pub id: String,
    pub started_at: String,
    pub ended_at: String,
    pub trigger: String,
    pub verdict: String,
    pub severity: String,
    pub resolved: bool,
    pub snapshot_count: usize,
}

/// A single detected attack, as persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AttackEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    pub service: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub source_ip: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    #[serde(rename = "network_type", skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Computed statistics over the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub total_crashes: usize,
    pub active_crashes: usize,
    pub avg_duration_sec: f64,
    pub total_attacks: usize,
    pub top_attack_type: String,
    pub top_attacked_service: String,
    pub critical_count: usize,
    pub high_count: usize,
    pub medium_count: usize,
}

/// Pagination and filtering for list queries.
#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    /// 1-indexed page number; values below 1 are clamped up.
    pub page: usize,
    /// 0 means "use the default of 20"; otherwise clamped to [1, 100].
    pub page_size: usize,
    pub severity: Option<String>,
    pub trigger: Option<String>,
    pub service: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ListOpts {
    pub(crate) fn normalized(mut self) -> Self {
        if self.page < 1 {
            self.page = 1;
        }
        if self.page_size == 0 {
            self.page_size = 20;
        }
        self.page_size = self.page_size.clamp(1, 100);
        self
    }
}

/// One page of a filtered result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

pub(crate) fn paginate<T>(all: Vec<T>, opts: &ListOpts) -> PageResult<T> {
    let total = all.len();
    let total_pages = std::cmp::max(1, (total + opts.page_size - 1) / opts.page_size);

    let start = (opts.page - 1) * opts.page_size;
    if start >= total {
        return PageResult {
            items: Vec::new(),
            total,
            page: opts.page,
            page_size: opts.page_size,
            total_pages,
        };
    }
    let end = std::cmp::min(start + opts.page_size, total);
    let items = all.into_iter().skip(start).take(end - start).collect();

    PageResult {
        items,
        total,
        page: opts.page,
        page_size: opts.page_size,
        total_pages,
    }
}

/// Uniform timestamp format for everything the store keys or sorts on.
/// Fixed offset (Z) and fixed precision keep lexicographic order equal to
/// chronological order.
pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn opts_normalization_clamps() {
        let n = ListOpts::default().normalized();
        assert_eq!(n.page, 1);
        assert_eq!(n.page_size, 20);

        let n = ListOpts {
            page: 3,
            page_size: 1000,
            ..ListOpts::default()
        }
        .normalized();
        assert_eq!(n.page, 3);
        assert_eq!(n.page_size, 100);
    }

    #[test]
    fn paginate_edges() {
        let opts = ListOpts {
            page: 2,
            page_size: 3,
            ..ListOpts::default()
        }
        .normalized();
        let page = paginate((1..=7).collect::<Vec<i32>>(), &opts);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);

        let empty = paginate(Vec::<i32>::new(), &opts);
        assert!(empty.items.is_empty());
        assert_eq!(empty.total_pages, 1);
    }

    #[test]
    fn rfc3339_string_order_is_chronological() {
        let a = rfc3339(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap());
        let b = rfc3339(Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap());
        let c = rfc3339(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
        assert!(a < b && b < c);
        assert_eq!(parse_rfc3339(&a).unwrap().to_rfc3339(), "2026-01-05T09:00:00+00:00");
        assert!(parse_rfc3339("garbage").is_none());
    }

    #[test]
    fn severity_labels() {
        assert_eq!(Severity::Critical.to_string(), "critical");
        assert_eq!(Severity::Unknown.as_str(), "unknown");
        let json = serde_json::to_string(&Severity::High).unwrap();
        assert_eq!(json, "\"high\"");
    }
}

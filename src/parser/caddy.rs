// src/parser/caddy.rs
use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::error::{Result, SentryError};
use crate::parser::{GenericLogRecord, LogParser};

/// Caddy's structured access log (one JSON object per line).
#[derive(Deserialize)]
struct CaddyJsonEntry {
    #[serde(default)]
    ts: f64,
    #[serde(default)]
    request: CaddyRequest,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    size: u64,
}

#[derive(Deserialize, Default)]
struct CaddyRequest {
    #[serde(default)]
    remote_ip: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    proto: String,
    #[serde(default)]
    headers: HashMap<String, Vec<String>>,
}

pub struct CaddyParser;

impl LogParser for CaddyParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let entry: CaddyJsonEntry = serde_json::from_str(line)
            .map_err(|e| SentryError::Parse(format!("unparseable caddy json: {e}")))?;

        let mut rec = GenericLogRecord::base("caddy");
        // ts is unix seconds with fractional millis.
        if entry.ts > 0.0 {
            if let Some(t) = Utc.timestamp_millis_opt((entry.ts * 1000.0) as i64).single() {
                rec.time_local = t;
            }
        }
        rec.remote_ip = entry.request.remote_ip;
        rec.method = entry.request.method;
        rec.path = entry.request.uri;
        rec.protocol = entry.request.proto;
        rec.status = entry.status;
        rec.body_bytes_sent = entry.size;

        let header = |name: &str| -> String {
            entry
                .request
                .headers
                .get(name)
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_default()
        };
        rec.referer = header("Referer");
        rec.user_agent = header("User-Agent");
        Ok(rec)
    }
}

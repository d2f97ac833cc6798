// src/parser/traefik.rs
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Result, SentryError};
use crate::parser::{GenericLogRecord, LogParser};

/// Traefik JSON access log. Headers are only present with extra
/// middleware configuration, so referer/user-agent stay empty here.
#[derive(Deserialize)]
struct TraefikJsonEntry {
    #[serde(rename = "ClientHost", default)]
    client_host: String,
    #[serde(rename = "ClientUsername", default)]
    client_username: String,
    #[serde(rename = "StartUTC", default)]
    start_utc: String,
    #[serde(rename = "RequestMethod", default)]
    request_method: String,
    #[serde(rename = "RequestPath", default)]
    request_path: String,
    #[serde(rename = "RequestProtocol", default)]
    request_protocol: String,
    #[serde(rename = "DownstreamStatus", default)]
    downstream_status: u16,
    #[serde(rename = "DownstreamContentSize", default)]
    downstream_content_size: u64,
    /// Nanoseconds.
    #[serde(rename = "Duration", default)]
    duration: Option<u64>,
}

pub struct TraefikParser;

impl LogParser for TraefikParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let entry: TraefikJsonEntry = serde_json::from_str(line)
            .map_err(|e| SentryError::Parse(format!("unparseable traefik json: {e}")))?;

        let mut rec = GenericLogRecord::base("traefik");
        rec.time_local = DateTime::parse_from_rfc3339(&entry.start_utc)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        rec.remote_ip = entry.client_host;
        if !entry.client_username.is_empty() {
            rec.remote_user = entry.client_username;
        }
        rec.method = entry.request_method;
        rec.path = entry.request_path;
        rec.protocol = entry.request_protocol;
        rec.status = entry.downstream_status;
        rec.body_bytes_sent = entry.downstream_content_size;
        rec.latency = entry.duration.map(|ns| ns as f64 / 1e9);
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_access_json() {
        let line = r#"{"ClientHost":"9.9.9.9","ClientUsername":"-","StartUTC":"2023-12-01T12:00:00Z","RequestMethod":"GET","RequestPath":"/dashboard","RequestProtocol":"HTTP/1.1","DownstreamStatus":404,"DownstreamContentSize":19,"Duration":1500000}"#;
        let rec = TraefikParser.parse(line).unwrap();
        assert_eq!(rec.remote_ip, "9.9.9.9");
        assert_eq!(rec.status, 404);
        assert_eq!(rec.path, "/dashboard");
        assert_eq!(rec.latency, Some(0.0015));
    }
}

// src/parser/envoy.rs
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SentryError};
use crate::parser::{parse_u16, parse_u64, GenericLogRecord, LogParser};

// Envoy default access log format:
// [START_TIME] "METHOD PATH PROTOCOL" CODE FLAGS BYTES_RECV BYTES_SENT
// DURATION UPSTREAM_TIME "X-FORWARDED-FOR" "USER-AGENT" ...
// [2016-04-15T20:17:00.310Z] "POST /api/v1/locations HTTP/1.1" 204 - 154 0 226 100 "10.0.35.16" "Mozilla/5.0" ...
static ENVOY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\[([^\]]+)\] "(\S+) (\S+) (\S+)" (\d+) \S+ (\d+) (\d+) (\d+|-) \S+ "([^"]*)" "([^"]*)""#,
    )
    .expect("envoy regex")
});

pub struct EnvoyParser;

impl LogParser for EnvoyParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let caps = ENVOY_RE
            .captures(line)
            .ok_or_else(|| SentryError::Parse(format!("unparseable envoy line: {line}")))?;

        let mut rec = GenericLogRecord::base("envoy");
        rec.time_local = DateTime::parse_from_rfc3339(&caps[1])
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        rec.method = caps[2].to_string();
        rec.path = caps[3].to_string();
        rec.protocol = caps[4].to_string();
        rec.status = parse_u16(&caps[5]);
        rec.body_bytes_sent = parse_u64(&caps[7]);
        if &caps[8] != "-" {
            rec.latency = Some(parse_u64(&caps[8]) as f64 / 1000.0);
        }
        // X-Forwarded-For is the closest thing to a client address here.
        rec.remote_ip = caps[9].to_string();
        rec.user_agent = caps[10].to_string();
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_default_format() {
        let line = r#"[2016-04-15T20:17:00.310Z] "POST /api/v1/locations HTTP/1.1" 204 - 154 0 226 100 "10.0.35.16" "Mozilla/5.0" "v23-234-234" "authority" "10.0.35.16:8080""#;
        let rec = EnvoyParser.parse(line).unwrap();
        assert_eq!(rec.method, "POST");
        assert_eq!(rec.path, "/api/v1/locations");
        assert_eq!(rec.status, 204);
        assert_eq!(rec.body_bytes_sent, 0);
        assert_eq!(rec.latency, Some(0.226));
        assert_eq!(rec.remote_ip, "10.0.35.16");
        assert_eq!(rec.user_agent, "Mozilla/5.0");
    }
}

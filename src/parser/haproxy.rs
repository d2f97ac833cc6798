// src/parser/haproxy.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SentryError};
use crate::parser::{parse_naive_time, parse_u16, parse_u64, GenericLogRecord, LogParser};

// HAProxy HTTP log (default httplog):
// Feb  6 12:14:14 host haproxy[14389]: 10.0.1.2:33313 [06/Feb/2009:12:14:14.655]
//   frontend backend/srv1 10/0/30/69/109 200 2750 - - ---- 1/1/1/1/0 0/0 "GET /index.html HTTP/1.1"
// The timer field is Tq/Tw/Tc/Tr/Tt; Tt (last) is the whole request in ms.
static HAPROXY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"\]: (\S+):\d+ \[([^\]]+)\] \S+ \S+ ([\d/+-]+) (\d+) (\d+) \S+ \S+ \S+ \S+ \S+ "(\S+) (\S+) (\S+)""#,
    )
    .expect("haproxy regex")
});

pub struct HaproxyParser;

impl LogParser for HaproxyParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let caps = HAPROXY_RE
            .captures(line)
            .ok_or_else(|| SentryError::Parse(format!("unparseable haproxy line: {line}")))?;

        let mut rec = GenericLogRecord::base("haproxy");
        rec.remote_ip = caps[1].to_string();
        rec.time_local = parse_naive_time(&caps[2], "%d/%b/%Y:%H:%M:%S%.f");
        rec.status = parse_u16(&caps[4]);
        rec.body_bytes_sent = parse_u64(&caps[5]);
        rec.method = caps[6].to_string();
        rec.path = caps[7].to_string();
        rec.protocol = caps[8].to_string();
        if let Some(total_ms) = caps[3].rsplit('/').next().and_then(|t| t.parse::<i64>().ok()) {
            if total_ms >= 0 {
                rec.latency = Some(total_ms as f64 / 1000.0);
            }
        }
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_httplog_line() {
        let line = r#"Feb  6 12:14:14 localhost haproxy[14389]: 10.0.1.2:33313 [06/Feb/2009:12:14:14.655] frontend backend/srv1 10/0/30/69/109 200 2750 - - ---- 1/1/1/1/0 0/0 "GET /index.html HTTP/1.1""#;
        let rec = HaproxyParser.parse(line).unwrap();
        assert_eq!(rec.remote_ip, "10.0.1.2");
        assert_eq!(rec.status, 200);
        assert_eq!(rec.body_bytes_sent, 2750);
        assert_eq!(rec.method, "GET");
        assert_eq!(rec.path, "/index.html");
        assert_eq!(rec.latency, Some(0.109));
        assert_eq!(rec.time_local.hour(), 12);
    }

    #[test]
    fn rejects_plain_syslog() {
        let line = "Feb  6 12:14:14 localhost sshd[999]: Connection closed";
        assert!(HaproxyParser.parse(line).is_err());
    }
}

// src/parser/nginx.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SentryError};
use crate::parser::{parse_clf_time, parse_u16, parse_u64, GenericLogRecord, LogParser};

// Combined Log Format:
// IP - User [Time] "Method Path Protocol" Status Bytes "Referer" "UserAgent"
// Path carries the query string when present (/index.html?foo=bar).
static NGINX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\S+) - (\S+) \[([^\]]+)\] "(\S+) (\S+) (\S+)" (\d+) (\d+) "([^"]*)" "([^"]*)""#)
        .expect("nginx regex")
});

pub struct NginxParser;

impl LogParser for NginxParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let caps = NGINX_RE
            .captures(line)
            .ok_or_else(|| SentryError::Parse(format!("unparseable nginx line: {line}")))?;

        let mut rec = GenericLogRecord::base("nginx");
        rec.remote_ip = caps[1].to_string();
        rec.remote_user = caps[2].to_string();
        rec.time_local = parse_clf_time(&caps[3]);
        rec.method = caps[4].to_string();
        rec.path = caps[5].to_string();
        rec.protocol = caps[6].to_string();
        rec.status = parse_u16(&caps[7]);
        rec.body_bytes_sent = parse_u64(&caps[8]);
        rec.referer = caps[9].to_string();
        rec.user_agent = caps[10].to_string();
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_combined_format() {
        let line = r#"1.2.3.4 - - [10/Nov/2024:12:34:56 +0000] "GET /index.php?id=1+UNION+SELECT+1 HTTP/1.1" 200 512 "-" "Mozilla/5.0""#;
        let rec = NginxParser.parse(line).unwrap();
        assert_eq!(rec.remote_ip, "1.2.3.4");
        assert_eq!(rec.remote_user, "-");
        assert_eq!(rec.method, "GET");
        assert_eq!(rec.path, "/index.php?id=1+UNION+SELECT+1");
        assert_eq!(rec.protocol, "HTTP/1.1");
        assert_eq!(rec.status, 200);
        assert_eq!(rec.body_bytes_sent, 512);
        assert_eq!(rec.user_agent, "Mozilla/5.0");
        assert_eq!(rec.time_local.year(), 2024);
        assert_eq!(rec.time_local.hour(), 12);
    }

    #[test]
    fn rejects_garbage() {
        assert!(NginxParser.parse("not a log line").is_err());
    }

    #[test]
    fn bad_timestamp_defaults_to_now() {
        let line = r#"1.2.3.4 - - [not-a-date] "GET / HTTP/1.1" 200 0 "-" "-""#;
        let rec = NginxParser.parse(line).unwrap();
        assert_eq!(rec.status, 200);
    }
}

// src/parser/tomcat.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SentryError};
use crate::parser::{parse_clf_time, parse_u16, parse_u64, GenericLogRecord, LogParser};

// Tomcat AccessLogValve default pattern (%h %l %u %t "%r" %s %b).
// Referer and user-agent need an extended valve pattern, so they stay empty.
static TOMCAT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\S+) \S+ (\S+) \[([^\]]+)\] "(\S+) (\S+) (\S+)" (\d+) (\d+|-)"#)
        .expect("tomcat regex")
});

pub struct TomcatParser;

impl LogParser for TomcatParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let caps = TOMCAT_RE
            .captures(line)
            .ok_or_else(|| SentryError::Parse(format!("unparseable tomcat line: {line}")))?;

        let mut rec = GenericLogRecord::base("tomcat");
        rec.remote_ip = caps[1].to_string();
        rec.remote_user = caps[2].to_string();
        rec.time_local = parse_clf_time(&caps[3]);
        rec.method = caps[4].to_string();
        rec.path = caps[5].to_string();
        rec.protocol = caps[6].to_string();
        rec.status = parse_u16(&caps[7]);
        if &caps[8] != "-" {
            rec.body_bytes_sent = parse_u64(&caps[8]);
        }
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_access_valve_line() {
        let line = r#"127.0.0.1 - - [01/Feb/2026:12:00:00 +0000] "GET /app HTTP/1.1" 200 123"#;
        let rec = TomcatParser.parse(line).unwrap();
        assert_eq!(rec.path, "/app");
        assert_eq!(rec.status, 200);
        assert_eq!(rec.body_bytes_sent, 123);
        assert!(rec.user_agent.is_empty());
    }
}

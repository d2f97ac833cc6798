// src/parser/lighttpd.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SentryError};
use crate::parser::{parse_clf_time, parse_u16, parse_u64, GenericLogRecord, LogParser};

// Lighttpd default is plain Common Log Format.
static LIGHTTPD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(\S+) \S+ (\S+) \[([^\]]+)\] "(\S+) (\S+) (\S+)" (\d+) (\d+|-)"#)
        .expect("lighttpd regex")
});

pub struct LighttpdParser;

impl LogParser for LighttpdParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let caps = LIGHTTPD_RE
            .captures(line)
            .ok_or_else(|| SentryError::Parse(format!("unparseable lighttpd line: {line}")))?;

        let mut rec = GenericLogRecord::base("lighttpd");
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
    fn parses_common_format() {
        let line = r#"127.0.0.1 - - [01/Feb/2026:12:00:00 +0000] "GET /index.html HTTP/1.0" 200 1234"#;
        let rec = LighttpdParser.parse(line).unwrap();
        assert_eq!(rec.status, 200);
        assert_eq!(rec.body_bytes_sent, 1234);
        assert_eq!(rec.protocol, "HTTP/1.0");
    }
}

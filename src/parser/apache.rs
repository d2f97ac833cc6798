// src/parser/apache.rs
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, SentryError};
use crate::parser::{parse_clf_time, parse_u16, parse_u64, GenericLogRecord, LogParser};

// Apache Combined:
// %h %l %u %t "%r" %>s %b "%{Referer}i" "%{User-Agent}i"
// %b is "-" for bodyless responses.
static APACHE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^(\S+) \S+ (\S+) \[([^\]]+)\] "(\S+) (\S+) (\S+)" (\d+) (\d+|-) "([^"]*)" "([^"]*)""#,
    )
    .expect("apache regex")
});

pub struct ApacheParser;

impl LogParser for ApacheParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let caps = APACHE_RE
            .captures(line)
            .ok_or_else(|| SentryError::Parse(format!("unparseable apache line: {line}")))?;

        let mut rec = GenericLogRecord::base("apache");
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
        rec.referer = caps[9].to_string();
        rec.user_agent = caps[10].to_string();
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_combined_with_dash_bytes() {
        let line = r#"203.0.113.7 - frank [10/Oct/2023:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 304 - "http://example.com/" "Mozilla/4.08""#;
        let rec = ApacheParser.parse(line).unwrap();
        assert_eq!(rec.remote_user, "frank");
        assert_eq!(rec.status, 304);
        assert_eq!(rec.body_bytes_sent, 0);
        assert_eq!(rec.referer, "http://example.com/");
    }
}

// src/parser/journald.rs
use crate::error::Result;
use crate::parser::{GenericLogRecord, LogParser};

/// Parses the `"<host> <comm>: <message>"` lines the journald reader
/// reconstructs after JSON decoding. Never fails: the whole point is to
/// keep every journal line.
///
/// The record is web-centric, so fields are overloaded on purpose: the
/// host rides in `remote_ip`, the emitting process in `method`, the
/// message in `path`, and status is a constant 200 regardless of content.
pub struct JournalShimParser;

impl LogParser for JournalShimParser {
    fn parse(&self, line: &str) -> Result<GenericLogRecord> {
        let (header, message) = match line.split_once(": ") {
            Some((h, m)) => (h, m),
            None => (line, ""),
        };

        let mut parts = header.split_whitespace();
        let host = parts.next().unwrap_or("localhost");
        let process = parts.next().unwrap_or("system");

        let mut rec = GenericLogRecord::base("journald");
        rec.remote_ip = host.to_string();
        rec.method = process.to_string();
        rec.path = message.to_string();
        rec.status = 200;
        Ok(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_process_message() {
        let rec = JournalShimParser
            .parse("web01 sshd: pam_unix(sshd:session): session opened for user root")
            .unwrap();
        assert_eq!(rec.remote_ip, "web01");
        assert_eq!(rec.method, "sshd");
        assert_eq!(rec.path, "pam_unix(sshd:session): session opened for user root");
        assert_eq!(rec.status, 200);
    }

    #[test]
    fn headerless_line_still_produces_record() {
        let rec = JournalShimParser.parse("kernel-panic-ish garbage").unwrap();
        assert_eq!(rec.status, 200);
        assert_eq!(rec.service, "journald");
    }
}

// src/analyzer/mod.rs
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;

use crate::storage::Severity;

const EXFIL_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    SqlInjection,
    Xss,
    PathTraversal,
    Scanner,
    DataExfiltration,
    None,
}

impl AttackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackKind::SqlInjection => "SQL Injection",
            AttackKind::Xss => "XSS",
            AttackKind::PathTraversal => "Path Traversal",
            AttackKind::Scanner => "Scanner",
            AttackKind::DataExfiltration => "Data Exfiltration (Large Download)",
            AttackKind::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackResult {
    pub detected: bool,
    pub kind: AttackKind,
    pub severity: Severity,
}

impl AttackResult {
    fn none() -> Self {
        AttackResult {
            detected: false,
            kind: AttackKind::None,
            severity: Severity::Low,
        }
    }

    fn hit(kind: AttackKind, severity: Severity) -> Self {
        AttackResult {
            detected: true,
            kind,
            severity,
        }
    }
}

/// Pattern-based request analyzer. All regexes compile once here and are
/// reused for the life of the pipeline.
pub struct Analyzer {
    sqli: Regex,
    xss: Regex,
    path_traversal: Regex,
    scanner: Regex,
}

impl Analyzer {
    pub fn new() -> Self {
        Analyzer {
            // UNION SELECT, OR 1=1, comment truncation, stacked DROP.
            sqli: Regex::new(r"(?i)(union\s+select|or\s+1=1|\s+or\s+true|--|;\s*drop\s+table)")
                .expect("sqli regex"),
            xss: Regex::new(r"(?i)(<script|javascript:|on\w+=|alert\()").expect("xss regex"),
            path_traversal: Regex::new(r"\.\./\.\.").expect("path traversal regex"),
            scanner: Regex::new(r"(?i)(nessus|nmap|nikto|sqlmap|burp)").expect("scanner regex"),
        }
    }

    /// Runs the detection rules in order over the request path and
    /// user-agent; first match wins.
    pub fn detect_attack(&self, path: &str, user_agent: &str) -> AttackResult {
        let decoded = percent_decode(path);

        // Attackers routinely ship payloads base64-wrapped (b3IgMT0x = "or 1=1").
        let b64 = BASE64
            .decode(path)
            .ok()
            .and_then(|b| String::from_utf8(b).ok());

        let mut targets: Vec<&str> = vec![path, &decoded];
        if let Some(s) = b64.as_deref() {
            targets.push(s);
        }

        for target in targets {
            if self.sqli.is_match(target) {
                return AttackResult::hit(AttackKind::SqlInjection, Severity::Critical);
            }
            if self.xss.is_match(target) {
                return AttackResult::hit(AttackKind::Xss, Severity::High);
            }
            if self.path_traversal.is_match(target) {
                return AttackResult::hit(AttackKind::PathTraversal, Severity::High);
            }
        }

        if self.scanner.is_match(user_agent) {
            return AttackResult::hit(AttackKind::Scanner, Severity::Medium);
        }

        AttackResult::none()
    }

    /// Flags unusually large response bodies. Strictly greater than
    /// 100 MiB; a body of exactly 100 MiB is not an exfiltration.
    pub fn check_data_exfiltration(&self, body_bytes_sent: u64) -> AttackResult {
        if body_bytes_sent > EXFIL_THRESHOLD_BYTES {
            AttackResult::hit(AttackKind::DataExfiltration, Severity::High)
        } else {
            AttackResult::none()
        }
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer::new()
    }
}

/// Query-style percent decoding (`%27` → `'`, `+` → space). Malformed
/// escapes pass through verbatim; a record is preferable to a drop.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = bytes.get(i + 1..i + 3);
                match hex.and_then(|h| u8::from_str_radix(std::str::from_utf8(h).ok()?, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sql_injection_in_query() {
        let a = Analyzer::new();
        let r = a.detect_attack("/index.php?id=1+UNION+SELECT+1", "Mozilla/5.0");
        assert!(r.detected);
        assert_eq!(r.kind, AttackKind::SqlInjection);
        assert_eq!(r.severity, Severity::Critical);
    }

    #[test]
    fn detects_url_encoded_payload() {
        let a = Analyzer::new();
        let r = a.detect_attack("/search?q=%27%20or%201=1", "Mozilla/5.0");
        assert!(r.detected);
        assert_eq!(r.kind, AttackKind::SqlInjection);
    }

    #[test]
    fn detects_base64_wrapped_payload() {
        let a = Analyzer::new();
        // "b3IgMT0x" is base64 for "or 1=1".
        let r = a.detect_attack("b3IgMT0x", "Mozilla/5.0");
        assert!(r.detected);
        assert_eq!(r.kind, AttackKind::SqlInjection);
    }

    #[test]
    fn detects_xss_and_traversal() {
        let a = Analyzer::new();
        let xss = a.detect_attack("/comment?body=<script>alert(1)</script>", "-");
        assert_eq!(xss.kind, AttackKind::Xss);
        assert_eq!(xss.severity, Severity::High);

        let trav = a.detect_attack("/files/../../etc/passwd", "-");
        assert_eq!(trav.kind, AttackKind::PathTraversal);
        assert_eq!(trav.severity, Severity::High);
    }

    #[test]
    fn first_match_wins() {
        let a = Analyzer::new();
        // Both SQLi and XSS markers present; SQLi is checked first.
        let r = a.detect_attack("/x?id=1+union+select+<script>", "-");
        assert_eq!(r.kind, AttackKind::SqlInjection);
    }

    #[test]
    fn detects_scanner_user_agent() {
        let a = Analyzer::new();
        let r = a.detect_attack("/", "sqlmap/1.7#stable");
        assert_eq!(r.kind, AttackKind::Scanner);
        assert_eq!(r.severity, Severity::Medium);
    }

    #[test]
    fn clean_request_passes() {
        let a = Analyzer::new();
        let r = a.detect_attack("/index.html?page=2", "Mozilla/5.0");
        assert!(!r.detected);
        assert_eq!(r.kind, AttackKind::None);
    }

    #[test]
    fn exfiltration_threshold_is_strict() {
        let a = Analyzer::new();
        let at = a.check_data_exfiltration(100 * 1024 * 1024);
        assert!(!at.detected);

        let over = a.check_data_exfiltration(100 * 1024 * 1024 + 1);
        assert!(over.detected);
        assert_eq!(over.kind, AttackKind::DataExfiltration);
        assert_eq!(over.severity, Severity::High);
    }
}

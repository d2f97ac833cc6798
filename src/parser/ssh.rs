// src/parser/ssh.rs
use once_cell::sync::Lazy;
use regex::Regex;

/// Tagged OpenSSH auth-log event. `Unknown` covers lines that are not
/// relevant to session accounting; callers skip them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshRecord {
    LoginSuccess {
        user: String,
        ip: String,
        auth_method: String,
    },
    LoginFailed {
        user: String,
        ip: String,
        auth_method: String,
    },
    Disconnect,
    Unknown,
}

// Accepted password for root from 192.168.1.1 port 22 ssh2
// Accepted publickey for deploy from 10.0.0.1 port 55555 ssh2: RSA SHA256:...
static SSH_ACCEPTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Accepted (\S+) for (\S+) from (\S+)").expect("ssh accepted regex"));

// Failed password for invalid user admin from 192.168.1.5 port 22 ssh2
static SSH_FAILED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Failed (\S+) for (?:invalid user )?(\S+) from (\S+)").expect("ssh failed regex")
});

/// Best-effort OpenSSH line classification. Disconnect wording varies a
/// lot between versions, so that branch is a substring check.
pub fn parse_ssh_line(line: &str) -> SshRecord {
    if let Some(caps) = SSH_ACCEPTED_RE.captures(line) {
        return SshRecord::LoginSuccess {
            auth_method: caps[1].to_string(),
            user: caps[2].to_string(),
            ip: caps[3].to_string(),
        };
    }

    if let Some(caps) = SSH_FAILED_RE.captures(line) {
        return SshRecord::LoginFailed {
            auth_method: caps[1].to_string(),
            user: caps[2].to_string(),
            ip: caps[3].to_string(),
        };
    }

    if line.contains("sshd") && line.contains("Disconnected from") {
        return SshRecord::Disconnect;
    }

    SshRecord::Unknown
}

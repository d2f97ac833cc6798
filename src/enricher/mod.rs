// src/enricher/mod.rs
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// GeoIP resolution is an external collaborator (an mmdb reader in the
/// deployment image). Implementations must be thread-safe.
pub trait GeoLookup: Send + Sync {
    /// Returns `(country_iso, asn_org)` for the address, or None when the
    /// address is not in the database.
    fn lookup(&self, ip: &str) -> Option<(String, String)>;
}

pub struct Enricher {
    user_cache: RwLock<HashMap<String, String>>,
    geo: Option<Arc<dyn GeoLookup>>,
    passwd_path: PathBuf,
}

impl Enricher {
    pub fn new(geo: Option<Arc<dyn GeoLookup>>) -> Self {
        // Containerized deployments mount the host /etc under HOST_ETC.
        let etc = std::env::var("HOST_ETC").unwrap_or_else(|_| "/etc".to_string());
        Enricher {
            user_cache: RwLock::new(HashMap::new()),
            geo,
            passwd_path: PathBuf::from(etc).join("passwd"),
        }
    }

    /// Classifies a source address string as one of
    /// unknown | invalid | loopback | internal | external.
    pub fn classify_ip(&self, ip: &str) -> &'static str {
        if ip.is_empty() || ip == "-" {
            return "unknown";
        }
        let addr: IpAddr = match ip.parse() {
            Ok(a) => a,
            Err(_) => return "invalid",
        };
        if addr.is_loopback() {
            return "loopback";
        }
        match addr {
            IpAddr::V4(v4) => {
                let o = v4.octets();
                if v4.is_private() || (o[0] == 169 && o[1] == 254) {
                    "internal"
                } else {
                    "external"
                }
            }
            IpAddr::V6(v6) => {
                let seg = v6.segments();
                // ULA fc00::/7 and link-local fe80::/10 are both host-side.
                if (seg[0] & 0xfe00) == 0xfc00 || (seg[0] & 0xffc0) == 0xfe80 {
                    "internal"
                } else {
                    "external"
                }
            }
        }
    }

    /// Returns `(country, asn)` labels, `("Unknown", "Unknown")` when no
    /// GeoIP reader is configured or the address is not covered.
    pub fn geo_enrich(&self, ip: &str) -> (String, String) {
        if let Some(geo) = &self.geo {
            if let Some((country, asn)) = geo.lookup(ip) {
                return (country, asn);
            }
        }
        ("Unknown".to_string(), "Unknown".to_string())
    }

    /// Translates a UID string to a username via /etc/passwd, caching the
    /// answer indefinitely. Returns the UID itself when resolution fails.
    pub fn resolve_user(&self, uid: &str) -> String {
        if uid.is_empty() || uid == "-" {
            return "-".to_string();
        }

        if let Some(name) = self.user_cache.read().get(uid) {
            return name.clone();
        }

        let resolved = self.lookup_passwd(uid).unwrap_or_else(|| uid.to_string());
        self.user_cache
            .write()
            .insert(uid.to_string(), resolved.clone());
        resolved
    }

    fn lookup_passwd(&self, uid: &str) -> Option<String> {
        let data = match std::fs::read_to_string(&self.passwd_path) {
            Ok(d) => d,
            Err(e) => {
                debug!(path = %self.passwd_path.display(), "passwd read failed: {e}");
                return None;
            }
        };
        for line in data.lines() {
            let mut parts = line.split(':');
            let name = parts.next()?;
            let _pw = parts.next();
            if parts.next() == Some(uid) {
                return Some(name.to_string());
            }
        }
        None
    }

    /// Coarse user-agent family used as a metric label.
    pub fn classify_user_agent(&self, ua: &str) -> &'static str {
        if ua.is_empty() || ua == "-" {
            return "unknown";
        }
        let ua = ua.to_ascii_lowercase();

        const BOTS: &[&str] = &["bot", "crawl", "slurp", "spider", "mediapartners"];
        const TOOLS: &[&str] = &["curl", "wget", "python", "go-http", "postman", "crowdsec"];
        const MOBILE: &[&str] = &["mobile", "android", "iphone"];
        const BROWSERS: &[&str] = &["mozilla", "chrome", "safari"];

        if BOTS.iter().any(|b| ua.contains(b)) {
            return "bot";
        }
        if TOOLS.iter().any(|t| ua.contains(t)) {
            return "tool";
        }
        // Mobile before generic browser: mobile UAs all claim Mozilla.
        if MOBILE.iter().any(|m| ua.contains(m)) {
            return "mobile";
        }
        if BROWSERS.iter().any(|b| ua.contains(b)) {
            return "browser";
        }
        "other"
    }
}

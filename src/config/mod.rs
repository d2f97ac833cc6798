// src/config/mod.rs
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SentryError};

/// Top-level agent configuration. Loaded once from YAML with
/// `${VAR:default}` environment substitution; every section has working
/// defaults so a missing file still yields a runnable agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub metrics_port: u16,
    pub syslog_port: u16,
    pub workers: usize,
    pub services_path: String,
    pub rules_path: String,
    pub journald_enabled: bool,
    pub webhook_url: String,
    pub storage: StorageConfig,
    pub recorder: RecorderSection,
    pub anomaly: AnomalySection,
    pub monitors: MonitorSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metrics_port: 9102,
            syslog_port: 5140,
            workers: 5,
            services_path: "services.yaml".to_string(),
            rules_path: "rules.json".to_string(),
            journald_enabled: true,
            webhook_url: String::new(),
            storage: StorageConfig::default(),
            recorder: RecorderSection::default(),
            anomaly: AnomalySection::default(),
            monitors: MonitorSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
    pub retention_days: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            path: "data/log-sentry.db".to_string(),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSection {
    pub interval_secs: u64,
    pub threshold: f64,
}

impl Default for RecorderSection {
    fn default() -> Self {
        RecorderSection {
            interval_secs: 5,
            threshold: 90.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalySection {
    pub rate_404: f64,
    pub capacity_404: f64,
    pub rate_5xx: f64,
    pub capacity_5xx: f64,
    pub window_secs: u64,
}

impl Default for AnomalySection {
    fn default() -> Self {
        AnomalySection {
            rate_404: 10.0,
            capacity_404: 10.0,
            rate_5xx: 20.0,
            capacity_5xx: 20.0,
            window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub process_scan_secs: u64,
    pub fim_scan_secs: u64,
    pub fim_paths: Vec<String>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        MonitorSection {
            process_scan_secs: 30,
            fim_scan_secs: 30,
            fim_paths: vec!["/etc/passwd".to_string(), "/etc/shadow".to_string()],
        }
    }
}

/// One log source the ingest pipeline should follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub log_path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Reloadable detection rules (currently the process blacklist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rules {
    #[serde(default)]
    pub process_blacklist: Vec<String>,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(AppConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| SentryError::io(path, e))?;
        let config: AppConfig = serde_yaml::from_str(&substitute_env_vars(&content))
            .map_err(|e| SentryError::Config(format!("failed to parse {path}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(SentryError::Config("workers must be at least 1".to_string()));
        }
        if self.recorder.interval_secs == 0 {
            return Err(SentryError::Config(
                "recorder interval must be at least 1 second".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.recorder.threshold) {
            return Err(SentryError::Config(
                "recorder threshold must be a percentage".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads the ordered service list. A missing file simply means no file
/// sources are configured (syslog/journald may still run).
pub fn load_services(path: &str) -> Result<Vec<ServiceEntry>> {
    if !Path::new(path).exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| SentryError::io(path, e))?;
    serde_yaml::from_str(&substitute_env_vars(&content))
        .map_err(|e| SentryError::Config(format!("failed to parse {path}: {e}")))
}

pub fn load_rules(path: &str) -> Result<Rules> {
    let content = std::fs::read_to_string(path).map_err(|e| SentryError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Replaces `${VAR}` / `${VAR:default}` occurrences with environment
/// values before the YAML parse.
fn substitute_env_vars(content: &str) -> String {
    static ENV_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("env regex"));

    ENV_RE
        .replace_all(content, |caps: &regex::Captures| {
            let var = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.metrics_port, 9102);
        assert_eq!(cfg.workers, 5);
        assert_eq!(cfg.recorder.threshold, 90.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_substitution_with_default() {
        std::env::remove_var("LS_TEST_MISSING");
        let out = substitute_env_vars("path: ${LS_TEST_MISSING:/var/log/nginx/access.log}");
        assert_eq!(out, "path: /var/log/nginx/access.log");

        std::env::set_var("LS_TEST_SET", "9200");
        let out = substitute_env_vars("port: ${LS_TEST_SET:9102}");
        assert_eq!(out, "port: 9200");
    }

    #[test]
    fn services_yaml_shape() {
        let yaml = r#"
- name: edge-nginx
  type: nginx
  log_path: /var/log/nginx/access.log
- name: auth
  type: ssh
  log_path: /var/log/auth.log
  enabled: false
"#;
        let services: Vec<ServiceEntry> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(services.len(), 2);
        assert!(services[0].enabled);
        assert_eq!(services[0].kind, "nginx");
        assert!(!services[1].enabled);
    }

    #[test]
    fn rules_json_shape() {
        let rules: Rules =
            serde_json::from_str(r#"{"process_blacklist": ["nc", "xmrig"]}"#).unwrap();
        assert_eq!(rules.process_blacklist, vec!["nc", "xmrig"]);
    }

    #[test]
    fn invalid_config_rejected() {
        let mut cfg = AppConfig::default();
        cfg.workers = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::default();
        cfg.recorder.threshold = 250.0;
        assert!(cfg.validate().is_err());
    }
}

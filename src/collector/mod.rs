// src/collector/mod.rs
use prometheus::{
    CounterVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

use crate::analyzer::AttackResult;
use crate::anomaly::AnomalyKind;
use crate::error::Result;
use crate::parser::{GenericLogRecord, SshRecord};

/// Prometheus families for everything the ingest pipeline observes.
/// Registered once against the registry handed in at startup; the
/// underlying vecs are lock-free on the hot path.
pub struct MetricsCollector {
    web_requests: IntCounterVec,
    web_response_bytes: CounterVec,
    web_request_duration: HistogramVec,
    web_attacks: IntCounterVec,
    web_anomalies: IntCounterVec,

    ssh_login_attempts: IntCounterVec,
    ssh_disconnects: IntCounter,
    ssh_active_sessions: IntGauge,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let web_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests."),
            &[
                "service",
                "method",
                "status",
                "path",
                "remote_ip",
                "network_type",
                "country",
                "asn",
            ],
        )?;
        let web_response_bytes = CounterVec::new(
            Opts::new("http_response_bytes_total", "Total number of bytes sent."),
            &["service", "method", "remote_ip"],
        )?;
        let web_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Request duration for log formats that carry timings.",
            ),
            &["service", "method"],
        )?;
        let web_attacks = IntCounterVec::new(
            Opts::new(
                "web_attack_detected_total",
                "Total number of detected web attacks.",
            ),
            &[
                "service",
                "type",
                "severity",
                "endpoint",
                "source_ip",
                "network_type",
            ],
        )?;
        let web_anomalies = IntCounterVec::new(
            Opts::new(
                "web_anomaly_detected_total",
                "Total number of detected traffic anomalies (e.g., 404 floods).",
            ),
            &["service", "type", "source_ip"],
        )?;
        let ssh_login_attempts = IntCounterVec::new(
            Opts::new("ssh_login_attempts_total", "Total number of SSH login attempts."),
            &["user", "ip", "status", "auth_method"],
        )?;
        let ssh_disconnects = IntCounter::new(
            "ssh_disconnects_total",
            "Total number of SSH disconnect events.",
        )?;
        let ssh_active_sessions = IntGauge::new(
            "ssh_active_sessions",
            "Estimated number of active SSH sessions.",
        )?;

        registry.register(Box::new(web_requests.clone()))?;
        registry.register(Box::new(web_response_bytes.clone()))?;
        registry.register(Box::new(web_request_duration.clone()))?;
        registry.register(Box::new(web_attacks.clone()))?;
        registry.register(Box::new(web_anomalies.clone()))?;
        registry.register(Box::new(ssh_login_attempts.clone()))?;
        registry.register(Box::new(ssh_disconnects.clone()))?;
        registry.register(Box::new(ssh_active_sessions.clone()))?;

        Ok(MetricsCollector {
            web_requests,
            web_response_bytes,
            web_request_duration,
            web_attacks,
            web_anomalies,
            ssh_login_attempts,
            ssh_disconnects,
            ssh_active_sessions,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn process_web(
        &self,
        rec: &GenericLogRecord,
        attack: &AttackResult,
        anomaly: AnomalyKind,
        network_type: &str,
        country: &str,
        asn: &str,
    ) {
        let status = rec.status.to_string();

        self.web_requests
            .with_label_values(&[
                &rec.service,
                &rec.method,
                &status,
                &rec.path,
                &rec.remote_ip,
                network_type,
                country,
                asn,
            ])
            .inc();

        self.web_response_bytes
            .with_label_values(&[&rec.service, &rec.method, &rec.remote_ip])
            .inc_by(rec.body_bytes_sent as f64);

        if let Some(latency) = rec.latency {
            self.web_request_duration
                .with_label_values(&[&rec.service, &rec.method])
                .observe(latency);
        }

        if attack.detected {
            self.web_attacks
                .with_label_values(&[
                    &rec.service,
                    attack.kind.as_str(),
                    attack.severity.as_str(),
                    &rec.path,
                    &rec.remote_ip,
                    network_type,
                ])
                .inc();
        }

        if let Some(kind) = anomaly.as_label() {
            self.web_anomalies
                .with_label_values(&[&rec.service, kind, &rec.remote_ip])
                .inc();
        }
    }

    pub fn process_ssh(&self, rec: &SshRecord) {
        match rec {
            SshRecord::LoginSuccess {
                user,
                ip,
                auth_method,
            } => {
                self.ssh_login_attempts
                    .with_label_values(&[user, ip, "success", auth_method])
                    .inc();
                self.ssh_active_sessions.inc();
            }
            SshRecord::LoginFailed {
                user,
                ip,
                auth_method,
            } => {
                self.ssh_login_attempts
                    .with_label_values(&[user, ip, "failed", auth_method])
                    .inc();
            }
            SshRecord::Disconnect => {
                self.ssh_disconnects.inc();
                self.ssh_active_sessions.dec();
            }
            SshRecord::Unknown => {}
        }
    }

    #[cfg(test)]
    pub(crate) fn active_ssh_sessions(&self) -> i64 {
        self.ssh_active_sessions.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_session_gauge_tracks_lifecycle() {
        let registry = Registry::new();
        let coll = MetricsCollector::new(&registry).unwrap();

        coll.process_ssh(&SshRecord::LoginSuccess {
            user: "root".to_string(),
            ip: "1.1.1.1".to_string(),
            auth_method: "password".to_string(),
        });
        coll.process_ssh(&SshRecord::LoginSuccess {
            user: "deploy".to_string(),
            ip: "2.2.2.2".to_string(),
            auth_method: "publickey".to_string(),
        });
        assert_eq!(coll.active_ssh_sessions(), 2);

        coll.process_ssh(&SshRecord::Disconnect);
        assert_eq!(coll.active_ssh_sessions(), 1);

        coll.process_ssh(&SshRecord::Unknown);
        assert_eq!(coll.active_ssh_sessions(), 1);
    }

    #[test]
    fn families_register_once() {
        let registry = Registry::new();
        let _coll = MetricsCollector::new(&registry).unwrap();
        // Registering a second collector on the same registry collides.
        assert!(MetricsCollector::new(&registry).is_err());
    }
}

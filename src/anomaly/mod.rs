// src/anomaly/mod.rs
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyKind {
    None,
    Flood404,
    Burst5xx,
}

impl AnomalyKind {
    /// Metric label; `None` carries no label and is never exported.
    pub fn as_label(&self) -> Option<&'static str> {
        match self {
            AnomalyKind::None => None,
            AnomalyKind::Flood404 => Some("404_flood"),
            AnomalyKind::Burst5xx => Some("500_burst"),
        }
    }
}

/// Dual token-bucket state for one source IP. Buckets start full so a
/// legitimate burst is allowed; sustained offenders run dry and keep
/// reporting until traffic subsides.
struct IpBucket {
    tokens_404: f64,
    tokens_5xx: f64,
    last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub rate_404: f64,
    pub capacity_404: f64,
    pub rate_5xx: f64,
    pub capacity_5xx: f64,
    pub window: Duration,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        AnomalyConfig {
            rate_404: 10.0,
            capacity_404: 10.0,
            rate_5xx: 20.0,
            capacity_5xx: 20.0,
            window: Duration::from_secs(5 * 60),
        }
    }
}

pub struct AnomalyDetector {
    cfg: AnomalyConfig,
    buckets: Mutex<HashMap<String, IpBucket>>,
}

impl AnomalyDetector {
    pub fn new(cfg: AnomalyConfig) -> Self {
        AnomalyDetector {
            cfg,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Feeds one observation. Statuses outside {404} ∪ [500, 599] return
    /// `None` without touching the map.
    pub fn check(&self, ip: &str, status: u16) -> AnomalyKind {
        self.check_at(ip, status, Instant::now())
    }

    fn check_at(&self, ip: &str, status: u16, now: Instant) -> AnomalyKind {
        let is_404 = status == 404;
        let is_5xx = (500..=599).contains(&status);
        if !is_404 && !is_5xx {
            return AnomalyKind::None;
        }

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip.to_string()).or_insert_with(|| IpBucket {
            tokens_404: self.cfg.capacity_404,
            tokens_5xx: self.cfg.capacity_5xx,
            last_seen: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_seen).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens_404 =
                (bucket.tokens_404 + elapsed * self.cfg.rate_404).min(self.cfg.capacity_404);
            bucket.tokens_5xx =
                (bucket.tokens_5xx + elapsed * self.cfg.rate_5xx).min(self.cfg.capacity_5xx);
        }
        bucket.last_seen = now;

        if is_404 {
            if bucket.tokens_404 >= 1.0 {
                bucket.tokens_404 -= 1.0;
                AnomalyKind::None
            } else {
                AnomalyKind::Flood404
            }
        } else if bucket.tokens_5xx >= 1.0 {
            bucket.tokens_5xx -= 1.0;
            AnomalyKind::None
        } else {
            AnomalyKind::Burst5xx
        }
    }

    /// Drops entries idle longer than the window.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let window = self.cfg.window;
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, b| now.saturating_duration_since(b.last_seen) <= window);
        let removed = before - buckets.len();
        if removed > 0 {
            debug!(removed, tracked = buckets.len(), "anomaly sweep");
        }
    }

    pub fn tracked_ips(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Background sweeper, one tick per window.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let detector = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(detector.cfg.window);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = ticker.tick() => detector.sweep(),
                    _ = shutdown.changed() => {
                        info!("anomaly sweeper stopping");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_after_capacity_exhausted() {
        let det = AnomalyDetector::new(AnomalyConfig::default());
        let now = Instant::now();
        for i in 0..10 {
            assert_eq!(
                det.check_at("9.9.9.9", 404, now),
                AnomalyKind::None,
                "observation {i} should still pass"
            );
        }
        assert_eq!(det.check_at("9.9.9.9", 404, now), AnomalyKind::Flood404);
    }

    #[test]
    fn burst_5xx_independent_of_404() {
        let det = AnomalyDetector::new(AnomalyConfig::default());
        let now = Instant::now();
        for _ in 0..20 {
            assert_eq!(det.check_at("1.2.3.4", 503, now), AnomalyKind::None);
        }
        assert_eq!(det.check_at("1.2.3.4", 500, now), AnomalyKind::Burst5xx);
        // The 404 bucket for the same IP is untouched.
        assert_eq!(det.check_at("1.2.3.4", 404, now), AnomalyKind::None);
    }

    #[test]
    fn non_qualifying_statuses_ignored() {
        let det = AnomalyDetector::new(AnomalyConfig::default());
        for _ in 0..100 {
            assert_eq!(det.check("5.5.5.5", 499), AnomalyKind::None);
            assert_eq!(det.check("5.5.5.5", 600), AnomalyKind::None);
            assert_eq!(det.check("5.5.5.5", 200), AnomalyKind::None);
        }
        assert_eq!(det.tracked_ips(), 0);
    }

    #[test]
    fn boundary_statuses_counted() {
        let det = AnomalyDetector::new(AnomalyConfig::default());
        let now = Instant::now();
        det.check_at("6.6.6.6", 404, now);
        det.check_at("6.6.6.6", 500, now);
        det.check_at("6.6.6.6", 599, now);
        assert_eq!(det.tracked_ips(), 1);
    }

    #[test]
    fn refill_restores_tokens() {
        let cfg = AnomalyConfig {
            rate_404: 10.0,
            capacity_404: 10.0,
            ..AnomalyConfig::default()
        };
        let det = AnomalyDetector::new(cfg);
        let t0 = Instant::now();
        for _ in 0..10 {
            det.check_at("7.7.7.7", 404, t0);
        }
        assert_eq!(det.check_at("7.7.7.7", 404, t0), AnomalyKind::Flood404);

        // Two seconds replenish the bucket to capacity at 10 tokens/s.
        let t1 = t0 + Duration::from_secs(2);
        assert_eq!(det.check_at("7.7.7.7", 404, t1), AnomalyKind::None);
    }

    #[test]
    fn sweep_drops_idle_entries() {
        let det = AnomalyDetector::new(AnomalyConfig {
            window: Duration::from_secs(60),
            ..AnomalyConfig::default()
        });
        let t0 = Instant::now();
        det.check_at("8.8.8.8", 404, t0);
        assert_eq!(det.tracked_ips(), 1);

        det.sweep_at(t0 + Duration::from_secs(30));
        assert_eq!(det.tracked_ips(), 1);

        det.sweep_at(t0 + Duration::from_secs(61));
        assert_eq!(det.tracked_ips(), 0);
    }
}

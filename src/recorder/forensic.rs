// src/recorder/forensic.rs
use crate::recorder::{ProcessSnapshot, Snapshot};
use crate::storage::Severity;

/// Post-crash root-cause analysis over a recorded snapshot sequence.
#[derive(Debug, Clone)]
pub struct ForensicReport {
    pub verdict: String,
    pub severity: Severity,
    pub spike_detected: bool,
}

pub fn analyze(snapshots: &[Snapshot]) -> ForensicReport {
    let Some(last) = snapshots.last() else {
        return ForensicReport {
            verdict: "No snapshots available. The recorder may not have been running before the crash."
                .to_string(),
            severity: Severity::Unknown,
            spike_detected: false,
        };
    };

    // Spike: was memory or CPU climbing across the last three snapshots?
    let mut spike_detected = false;
    if snapshots.len() >= 3 {
        let recent = &snapshots[snapshots.len() - 3..];
        if recent[2].total_mem_pct > recent[0].total_mem_pct + 5.0 {
            spike_detected = true;
        }
        if recent[2].total_cpu_pct > recent[0].total_cpu_pct + 10.0 {
            spike_detected = true;
        }
    }

    let (verdict, severity) = generate_verdict(last, spike_detected);
    ForensicReport {
        verdict,
        severity,
        spike_detected,
    }
}

fn generate_verdict(last: &Snapshot, spike_detected: bool) -> (String, Severity) {
    if last.top_processes.is_empty() {
        return (
            "No process data in last snapshot.".to_string(),
            Severity::Unknown,
        );
    }

    let top_mem = max_by_f64(&last.top_processes, |p| p.rss_mb);
    let top_cpu = max_by_f64(&last.top_processes, |p| p.cpu_pct);

    if last.total_mem_pct > 80.0 {
        if let Some(p) = top_mem {
            let mut verdict = format!(
                "MEMORY EXHAUSTION: Process \"{}\" (PID {}, user: {}) was consuming {:.1}% RAM ({:.0} MB RSS)",
                p.name, p.pid, p.user, p.mem_pct, p.rss_mb
            );
            let mut severity = Severity::High;

            if p.gpu_mem_mb > 0 {
                verdict.push_str(&format!(" + {} MB GPU memory", p.gpu_mem_mb));
            }
            if p.oom_score > 800 {
                verdict.push_str(&format!(
                    ". OOM score: {}/1000 — this process would be killed by the OOM killer.",
                    p.oom_score
                ));
                severity = Severity::Critical;
            }
            if spike_detected {
                verdict.push_str(" Memory was climbing rapidly in the seconds before crash.");
            }
            return (verdict, severity);
        }
    }

    if last.total_cpu_pct > 90.0 {
        if let Some(p) = top_cpu {
            return (
                format!(
                    "CPU SATURATION: Process \"{}\" (PID {}, user: {}) was consuming {:.1}% CPU.",
                    p.name, p.pid, p.user, p.cpu_pct
                ),
                Severity::High,
            );
        }
    }

    for gpu in &last.gpus {
        if gpu.mem_total_mb > 0
            && gpu.mem_used_mb as f64 / gpu.mem_total_mb as f64 > 0.95
        {
            let mut verdict = format!(
                "GPU MEMORY EXHAUSTION: GPU {} at {}/{} MB ({:.0}% utilized). ",
                gpu.id,
                gpu.mem_used_mb,
                gpu.mem_total_mb,
                gpu.mem_used_mb as f64 / gpu.mem_total_mb as f64 * 100.0
            );
            if let Some(p) = top_mem.filter(|p| p.gpu_mem_mb > 0) {
                verdict.push_str(&format!(
                    "Top GPU consumer: \"{}\" (PID {}, user: {}) using {} MB.",
                    p.name, p.pid, p.user, p.gpu_mem_mb
                ));
            }
            return (verdict, Severity::Critical);
        }
    }

    match top_mem {
        Some(p) => (
            format!(
                "Top resource consumer at last snapshot: \"{}\" (PID {}, user: {}) — {:.1}% MEM, {:.1}% CPU.",
                p.name, p.pid, p.user, p.mem_pct, p.cpu_pct
            ),
            Severity::Medium,
        ),
        None => (
            "Unable to determine root cause from available data.".to_string(),
            Severity::Unknown,
        ),
    }
}

fn max_by_f64<F: Fn(&ProcessSnapshot) -> f64>(
    procs: &[ProcessSnapshot],
    key: F,
) -> Option<&ProcessSnapshot> {
    procs
        .iter()
        .max_by(|a, b| key(a).partial_cmp(&key(b)).unwrap_or(std::cmp::Ordering::Equal))
}

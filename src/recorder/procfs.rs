// src/recorder/procfs.rs
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::enricher::Enricher;
use crate::recorder::gpu;
use crate::recorder::{GpuSnapshot, HostProbe, ProcessSnapshot};

const CMDLINE_MAX: usize = 120;

/// Real host probe backed by /proc (or the HOST_PROC mount in
/// containerized deployments), statvfs, and nvidia-smi.
pub struct ProcfsProbe {
    proc_root: PathBuf,
    enricher: Arc<Enricher>,
    clock_ticks: f64,
}

impl ProcfsProbe {
    pub fn new(enricher: Arc<Enricher>) -> Self {
        let proc_root = std::env::var("HOST_PROC").unwrap_or_else(|_| "/proc".to_string());
        let clock_ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        ProcfsProbe {
            proc_root: PathBuf::from(proc_root),
            enricher,
            clock_ticks: if clock_ticks > 0 { clock_ticks as f64 } else { 100.0 },
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    fn read_cpu_counters(&self) -> Option<(u64, u64)> {
        let data = std::fs::read_to_string(self.proc_root.join("stat")).ok()?;
        let line = data.lines().next()?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return None;
        }
        let mut total = 0u64;
        let mut idle = 0u64;
        for (i, f) in fields.iter().enumerate().skip(1) {
            let v: u64 = f.parse().unwrap_or(0);
            total += v;
            if i == 4 {
                idle = v;
            }
        }
        Some((idle, total))
    }

    fn uptime_secs(&self) -> f64 {
        std::fs::read_to_string(self.proc_root.join("uptime"))
            .ok()
            .and_then(|s| s.split_whitespace().next().map(str::to_string))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.0)
    }

    fn total_mem_mb(&self) -> f64 {
        let data = match std::fs::read_to_string(self.proc_root.join("meminfo")) {
            Ok(d) => d,
            Err(_) => return 0.0,
        };
        for line in data.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                let kb: f64 = rest
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.0);
                return kb / 1024.0;
            }
        }
        0.0
    }

    fn scan_pid(&self, pid: i32, total_mem_mb: f64, uptime: f64) -> Option<ProcessSnapshot> {
        let dir = self.proc_root.join(pid.to_string());
        let mut p = ProcessSnapshot {
            pid,
            ..ProcessSnapshot::default()
        };

        // Every read below is best-effort: the process may exit at any
        // point mid-scan and that must not fail the sweep.
        if let Ok(comm) = std::fs::read_to_string(dir.join("comm")) {
            p.name = comm.trim().to_string();
        }

        if let Ok(cmdline) = std::fs::read_to_string(dir.join("cmdline")) {
            let mut cmd = cmdline.replace('\0', " ").trim().to_string();
            if cmd.len() > CMDLINE_MAX {
                let mut cut = CMDLINE_MAX;
                while !cmd.is_char_boundary(cut) {
                    cut -= 1;
                }
                cmd.truncate(cut);
                cmd.push_str("...");
            }
            p.cmd = cmd;
        }

        if let Ok(status) = std::fs::read_to_string(dir.join("status")) {
            for line in status.lines() {
                let mut fields = line.split_whitespace();
                match fields.next() {
                    Some("Uid:") => {
                        if let Some(uid) = fields.next() {
                            p.user = self.enricher.resolve_user(uid);
                        }
                    }
                    Some("VmRSS:") => {
                        let kb: f64 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
                        p.rss_mb = kb / 1024.0;
                    }
                    _ => {}
                }
            }
        }

        if let Ok(score) = std::fs::read_to_string(dir.join("oom_score")) {
            p.oom_score = score.trim().parse().unwrap_or(0);
        }

        if let Ok(io) = std::fs::read_to_string(dir.join("io")) {
            for line in io.lines() {
                if let Some(v) = line.strip_prefix("read_bytes:") {
                    p.read_bytes = v.trim().parse().unwrap_or(0);
                } else if let Some(v) = line.strip_prefix("write_bytes:") {
                    p.write_bytes = v.trim().parse().unwrap_or(0);
                }
            }
        }

        (p.net_rx, p.net_tx) = read_net_dev(&dir);

        if let Some((ticks, starttime)) = read_proc_stat_times(&dir) {
            let elapsed = uptime - starttime / self.clock_ticks;
            if elapsed > 0.0 {
                p.cpu_pct = (ticks / self.clock_ticks) / elapsed * 100.0;
            }
        }

        let mut socket_inodes: HashSet<u64> = HashSet::new();
        if let Ok(entries) = std::fs::read_dir(dir.join("fd")) {
            for entry in entries.flatten() {
                p.fd_count += 1;
                if let Ok(target) = std::fs::read_link(entry.path()) {
                    let target = target.to_string_lossy();
                    if let Some(inode) = target
                        .strip_prefix("socket:[")
                        .and_then(|s| s.strip_suffix(']'))
                        .and_then(|s| s.parse().ok())
                    {
                        socket_inodes.insert(inode);
                    }
                }
            }
        }

        if let Ok(entries) = std::fs::read_dir(dir.join("task")) {
            p.thread_count = entries.flatten().count();
        }

        if !socket_inodes.is_empty() {
            let (ports, external) = resolve_sockets(&dir, &socket_inodes);
            p.net_ports = ports;
            p.is_external = external;
        }

        if total_mem_mb > 0.0 {
            p.mem_pct = p.rss_mb / total_mem_mb * 100.0;
        }

        // Kernel threads have neither resident memory nor I/O accounting.
        if p.rss_mb == 0.0 && p.read_bytes == 0 && p.write_bytes == 0 {
            return None;
        }
        Some(p)
    }
}

impl HostProbe for ProcfsProbe {
    /// Aggregate CPU utilization sampled over a 100 ms window of the
    /// kernel's cumulative counters.
    fn cpu_pct(&self) -> f64 {
        let first = self.read_cpu_counters();
        std::thread::sleep(Duration::from_millis(100));
        let second = self.read_cpu_counters();

        match (first, second) {
            (Some((idle1, total1)), Some((idle2, total2))) => {
                let idle_delta = idle2.saturating_sub(idle1) as f64;
                let total_delta = total2.saturating_sub(total1) as f64;
                if total_delta == 0.0 {
                    0.0
                } else {
                    (1.0 - idle_delta / total_delta) * 100.0
                }
            }
            _ => 0.0,
        }
    }

    fn mem(&self) -> (f64, f64) {
        let data = match std::fs::read_to_string(self.proc_root.join("meminfo")) {
            Ok(d) => d,
            Err(_) => return (0.0, 0.0),
        };
        let mut total = 0u64;
        let mut avail = 0u64;
        for line in data.lines() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("MemTotal:") => total = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                Some("MemAvailable:") => {
                    avail = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0)
                }
                _ => {}
            }
        }
        if total == 0 {
            return (0.0, 0.0);
        }
        let used = total.saturating_sub(avail);
        (
            used as f64 / total as f64 * 100.0,
            total as f64 / 1024.0 / 1024.0,
        )
    }

    fn disk_pct(&self) -> f64 {
        statvfs_pct("/")
    }

    fn gpus(&self) -> Vec<GpuSnapshot> {
        gpu::read_gpus()
    }

    fn gpu_process_memory(&self) -> std::collections::HashMap<i32, u64> {
        gpu::read_gpu_processes()
    }

    fn processes(&self) -> Vec<ProcessSnapshot> {
        let entries = match std::fs::read_dir(&self.proc_root) {
            Ok(e) => e,
            Err(e) => {
                debug!(root = %self.proc_root.display(), "proc scan failed: {e}");
                return Vec::new();
            }
        };

        let total_mem_mb = self.total_mem_mb();
        let uptime = self.uptime_secs();

        let mut procs = Vec::new();
        for entry in entries.flatten() {
            let pid: i32 = match entry.file_name().to_string_lossy().parse() {
                Ok(pid) => pid,
                Err(_) => continue,
            };
            if let Some(p) = self.scan_pid(pid, total_mem_mb, uptime) {
                procs.push(p);
            }
        }
        procs
    }
}

fn read_proc_stat_times(dir: &Path) -> Option<(f64, f64)> {
    let stat = std::fs::read_to_string(dir.join("stat")).ok()?;
    // comm may contain spaces; everything after the closing paren is
    // positional. utime and stime are fields 14/15 (1-indexed), starttime 22.
    let rest = stat.rsplit_once(')')?.1;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 20 {
        return None;
    }
    let utime: f64 = fields[11].parse().ok()?;
    let stime: f64 = fields[12].parse().ok()?;
    let starttime: f64 = fields[19].parse().ok()?;
    Some((utime + stime, starttime))
}

/// Sums rx (field 1) and tx (field 9) across interfaces, excluding lo.
fn read_net_dev(dir: &Path) -> (u64, u64) {
    let data = match std::fs::read_to_string(dir.join("net/dev")) {
        Ok(d) => d,
        Err(_) => return (0, 0),
    };
    let mut rx = 0u64;
    let mut tx = 0u64;
    for line in data.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() >= 9 {
            rx += fields[0].parse().unwrap_or(0);
            tx += fields[8].parse().unwrap_or(0);
        }
    }
    (rx, tx)
}

/// Matches the process's socket inodes against net/tcp and net/tcp6.
/// Returns the ascending comma-joined local ports and whether the process
/// is externally reachable: listening on a wildcard address, or holding an
/// established connection to a non-loopback peer.
fn resolve_sockets(dir: &Path, inodes: &HashSet<u64>) -> (String, bool) {
    let mut ports: BTreeSet<u16> = BTreeSet::new();
    let mut external = false;

    for table in ["net/tcp", "net/tcp6"] {
        let data = match std::fs::read_to_string(dir.join(table)) {
            Ok(d) => d,
            Err(_) => continue,
        };
        for line in data.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            let inode: u64 = fields[9].parse().unwrap_or(0);
            if !inodes.contains(&inode) {
                continue;
            }

            let Some((local_addr, local_port)) = fields[1].split_once(':') else {
                continue;
            };
            if let Ok(port) = u16::from_str_radix(local_port, 16) {
                ports.insert(port);
            }

            let state = fields[3];
            match state {
                // LISTEN on the wildcard address.
                "0A" if local_addr.bytes().all(|b| b == b'0') => external = true,
                // ESTABLISHED to a peer that is neither zero nor loopback.
                "01" => {
                    if let Some((remote_addr, _)) = fields[2].split_once(':') {
                        if !is_zero_or_loopback_hex(remote_addr) {
                            external = true;
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let joined = ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");
    (joined, external)
}

fn is_zero_or_loopback_hex(addr: &str) -> bool {
    if addr.bytes().all(|b| b == b'0') {
        return true;
    }
    // Kernel hex for 127.0.0.1 (little-endian v4) and ::1.
    addr == "0100007F" || addr == "00000000000000000000000001000000"
}

fn statvfs_pct(path: &str) -> f64 {
    let c_path = match std::ffi::CString::new(path) {
        Ok(c) => c,
        Err(_) => return 0.0,
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) } != 0 {
        return 0.0;
    }
    let total = stat.f_blocks as u64 * stat.f_frsize as u64;
    let free = stat.f_bavail as u64 * stat.f_frsize as u64;
    if total == 0 {
        return 0.0;
    }
    (total - free) as f64 / total as f64 * 100.0
}

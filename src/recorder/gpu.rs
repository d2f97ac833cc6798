// src/recorder/gpu.rs
use std::collections::HashMap;
use std::process::Command;

use crate::recorder::GpuSnapshot;

/// Queries nvidia-smi for utilization, memory, and temperature per GPU.
/// Returns an empty list on non-GPU hosts (nvidia-smi absent).
pub fn read_gpus() -> Vec<GpuSnapshot> {
    let out = match Command::new("nvidia-smi")
        .args([
            "--query-gpu=index,utilization.gpu,memory.used,memory.total,temperature.gpu",
            "--format=csv,noheader,nounits",
        ])
        .output()
    {
        Ok(out) if out.status.success() => out,
        _ => return Vec::new(),
    };

    let stdout = String::from_utf8_lossy(&out.stdout);
    let mut gpus = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split(", ").map(str::trim).collect();
        if fields.len() < 5 {
            continue;
        }
        gpus.push(GpuSnapshot {
            id: fields[0].parse().unwrap_or(0),
            util_pct: fields[1].parse().unwrap_or(0),
            mem_used_mb: fields[2].parse().unwrap_or(0),
            mem_total_mb: fields[3].parse().unwrap_or(0),
            temp_c: fields[4].parse().unwrap_or(0),
        });
    }
    gpus
}

/// Maps PID to GPU memory used (MB) for compute processes.
pub fn read_gpu_processes() -> HashMap<i32, u64> {
    let out = match Command::new("nvidia-smi")
        .args(["--query-compute-apps=pid,used_memory", "--format=csv,noheader,nounits"])
        .output()
    {
        Ok(out) if out.status.success() => out,
        _ => return HashMap::new(),
    };

    let stdout = String::from_utf8_lossy(&out.stdout);
    let mut result = HashMap::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split(", ").map(str::trim).collect();
        if fields.len() < 2 {
            continue;
        }
        let pid: i32 = fields[0].parse().unwrap_or(0);
        let mem: u64 = fields[1].parse().unwrap_or(0);
        if pid > 0 {
            result.insert(pid, mem);
        }
    }
    result
}

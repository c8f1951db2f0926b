//! Dynamic resource snapshot collection for `NodeHello.static_resources`
//! and each `Heartbeat.resources`. Reads `/proc` directly rather than
//! pulling in a system-info crate: none of the pack's example repos
//! actually call into one (a `sysinfo` dependency shows up unused in an
//! unrelated example's manifest), so this stays within the stack the
//! corpus demonstrates.

use std::collections::HashMap;
use std::fs;

use symphony_core::model::{ResourceSnapshot, StorageMount};

/// Aggregate or per-core jiffy counters parsed from one `/proc/stat` line.
#[derive(Debug, Clone, Copy, Default)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Stateful collector: CPU percentages are a derivative, so each call
/// needs the previous call's counters. One instance lives for the life of
/// the node process and is polled on every heartbeat tick.
#[derive(Default)]
pub struct ResourceCollector {
    previous: HashMap<String, CpuTimes>,
}

impl ResourceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of current CPU/memory/storage usage. Any individual
    /// source (`/proc/stat`, `/proc/meminfo`, the root filesystem) that
    /// can't be read contributes a zeroed default rather than failing the
    /// whole heartbeat — resource reporting is best-effort telemetry, not
    /// load-bearing for scheduling decisions.
    pub fn collect(&mut self) -> ResourceSnapshot {
        let (cpu_percent, per_core_percent) = self.cpu_usage();
        let (memory_used_bytes, memory_total_bytes) = read_meminfo().unwrap_or((0, 0));
        let storage_mounts = read_root_mount().into_iter().collect();

        ResourceSnapshot {
            cpu_percent,
            per_core_percent,
            memory_used_bytes,
            memory_total_bytes,
            gpus: Vec::new(),
            storage_mounts,
        }
    }

    fn cpu_usage(&mut self) -> (f64, Vec<f64>) {
        let Ok(contents) = fs::read_to_string("/proc/stat") else {
            return (0.0, Vec::new());
        };

        let mut aggregate_percent = 0.0;
        let mut per_core = Vec::new();

        for line in contents.lines() {
            let Some(label) = line.split_whitespace().next() else { continue };
            if !label.starts_with("cpu") {
                continue;
            }
            let Some(times) = parse_cpu_line(line) else { continue };

            let percent = match self.previous.get(label) {
                Some(prev) => percent_busy(prev, &times),
                None => 0.0,
            };
            self.previous.insert(label.to_string(), times);

            if label == "cpu" {
                aggregate_percent = percent;
            } else {
                per_core.push(percent);
            }
        }

        (aggregate_percent, per_core)
    }
}

fn parse_cpu_line(line: &str) -> Option<CpuTimes> {
    let mut fields = line.split_whitespace();
    fields.next()?; // label

    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 4 {
        return None;
    }

    // user, nice, system, idle, iowait, irq, softirq, steal (fields beyond
    // these, e.g. guest/guest_nice, are intentionally not double-counted).
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    let total: u64 = values.iter().take(8).sum();
    Some(CpuTimes { idle, total })
}

fn percent_busy(prev: &CpuTimes, curr: &CpuTimes) -> f64 {
    let total_delta = curr.total.saturating_sub(prev.total);
    let idle_delta = curr.idle.saturating_sub(prev.idle);
    if total_delta == 0 {
        0.0
    } else {
        100.0 * (1.0 - idle_delta as f64 / total_delta as f64)
    }
}

fn read_meminfo() -> Option<(u64, u64)> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    let mut total_kb = None;
    let mut available_kb = None;

    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = parse_kb_field(rest);
        }
    }

    let total_kb = total_kb?;
    let available_kb = available_kb.unwrap_or(0);
    let used_kb = total_kb.saturating_sub(available_kb);
    Some((used_kb * 1024, total_kb * 1024))
}

fn parse_kb_field(rest: &str) -> Option<u64> {
    rest.split_whitespace().next()?.parse().ok()
}

fn read_root_mount() -> Option<StorageMount> {
    use nix::sys::statvfs::statvfs;

    let stats = statvfs("/").ok()?;
    let block_size = stats.fragment_size().max(1);
    let total_bytes = stats.blocks() * block_size;
    let free_bytes = stats.blocks_free() * block_size;
    Some(StorageMount {
        path: "/".to_string(),
        used_bytes: total_bytes.saturating_sub(free_bytes),
        total_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aggregate_cpu_line() {
        let line = "cpu  100 0 200 600 50 0 0 0 0 0";
        let times = parse_cpu_line(line).unwrap();
        assert_eq!(times.idle, 600 + 50);
        assert_eq!(times.total, 100 + 0 + 200 + 600 + 50);
    }

    #[test]
    fn percent_busy_is_zero_when_all_idle() {
        let prev = CpuTimes { idle: 100, total: 100 };
        let curr = CpuTimes { idle: 200, total: 200 };
        assert_eq!(percent_busy(&prev, &curr), 0.0);
    }

    #[test]
    fn percent_busy_reflects_nonidle_delta() {
        let prev = CpuTimes { idle: 100, total: 200 };
        let curr = CpuTimes { idle: 150, total: 400 };
        // idle_delta=50, total_delta=200 -> 1 - 50/200 = 0.75 -> 75%
        assert_eq!(percent_busy(&prev, &curr), 75.0);
    }

    #[test]
    fn first_call_reports_zero_until_a_baseline_exists() {
        let mut collector = ResourceCollector::new();
        let (aggregate, per_core) = collector.cpu_usage();
        assert_eq!(aggregate, 0.0);
        assert!(per_core.iter().all(|p| *p == 0.0));
    }
}

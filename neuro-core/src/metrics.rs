//! System readings from procfs, model health bookkeeping, and the report texts built from them.
//!
//! Readings are best effort: a missing or unreadable procfs file yields zeros, never an error.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

const PROC_ROOT: &str = "/proc";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
    pub mem_total_kb: u64,
    pub mem_available_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
    pub uptime_secs: f64,
    pub cpu_count: usize,
}

impl SystemMetrics {
    pub fn collect() -> Self {
        Self::from_proc(Path::new(PROC_ROOT))
    }

    pub fn from_proc(root: &Path) -> Self {
        let mut metrics = SystemMetrics {
            cpu_count: num_cpus::get(),
            ..Default::default()
        };
        if let Ok(loadavg) = std::fs::read_to_string(root.join("loadavg")) {
            let mut fields = loadavg.split_whitespace().map(|f| f.parse().unwrap_or(0.0));
            metrics.load_1 = fields.next().unwrap_or(0.0);
            metrics.load_5 = fields.next().unwrap_or(0.0);
            metrics.load_15 = fields.next().unwrap_or(0.0);
        }
        if let Ok(meminfo) = std::fs::read_to_string(root.join("meminfo")) {
            for line in meminfo.lines() {
                let Some((key, rest)) = line.split_once(':') else {
                    continue;
                };
                let kb = rest
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                match key {
                    "MemTotal" => metrics.mem_total_kb = kb,
                    "MemAvailable" => metrics.mem_available_kb = kb,
                    "SwapTotal" => metrics.swap_total_kb = kb,
                    "SwapFree" => metrics.swap_free_kb = kb,
                    _ => {}
                }
            }
        }
        if let Ok(uptime) = std::fs::read_to_string(root.join("uptime")) {
            metrics.uptime_secs = uptime
                .split_whitespace()
                .next()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0);
        }
        metrics
    }

    /// Fraction of RAM in use, 0.0 when unknown.
    pub fn memory_usage(&self) -> f64 {
        if self.mem_total_kb == 0 {
            return 0.0;
        }
        1.0 - self.mem_available_kb as f64 / self.mem_total_kb as f64
    }

    /// One-minute load per CPU, capped at 1.0.
    pub fn cpu_usage(&self) -> f64 {
        (self.load_1 / self.cpu_count.max(1) as f64).clamp(0.0, 1.0)
    }

    pub fn swap_usage(&self) -> f64 {
        if self.swap_total_kb == 0 {
            return 0.0;
        }
        1.0 - self.swap_free_kb as f64 / self.swap_total_kb as f64
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub name: String,
    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_dropped: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub interfaces: Vec<InterfaceStats>,
}

impl NetworkStats {
    pub fn collect() -> Self {
        Self::from_proc(Path::new(PROC_ROOT))
    }

    pub fn from_proc(root: &Path) -> Self {
        std::fs::read_to_string(root.join("net/dev"))
            .map(|content| Self::parse(&content))
            .unwrap_or_default()
    }

    /// Parses the `/proc/net/dev` table (two header lines, then one line per interface).
    pub fn parse(content: &str) -> Self {
        let interfaces = content
            .lines()
            .skip(2)
            .filter_map(|line| {
                let (name, counters) = line.split_once(':')?;
                let values: Vec<u64> = counters
                    .split_whitespace()
                    .map(|v| v.parse().unwrap_or(0))
                    .collect();
                if values.len() < 12 {
                    return None;
                }
                Some(InterfaceStats {
                    name: name.trim().to_string(),
                    rx_bytes: values[0],
                    rx_packets: values[1],
                    rx_errors: values[2],
                    rx_dropped: values[3],
                    tx_bytes: values[8],
                    tx_packets: values[9],
                    tx_errors: values[10],
                    tx_dropped: values[11],
                })
            })
            .collect();
        Self { interfaces }
    }
}

/// Model and task health as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub confidence: f64,
    pub coherence: f64,
    pub stability: f64,
    pub response_time_ms: f64,
    pub memory_usage: f64,
    pub cpu_usage: f64,
    pub gpu_usage: f64,
    /// Share of generated tokens that fell outside the vocabulary.
    pub hallucination_score: f64,
    pub error_count: u64,
    pub warning_count: u64,
}

#[derive(Debug, Default)]
struct HealthCounters {
    tasks_ok: u64,
    tasks_failed: u64,
    warnings: u64,
    generations: u64,
    natural_stops: u64,
    generated_tokens: u64,
    unknown_tokens: u64,
    response_ms: Option<f64>,
}

/// Running counters behind [`HealthMetrics`].
#[derive(Debug, Default)]
pub struct HealthTracker {
    counters: Mutex<HealthCounters>,
}

impl HealthTracker {
    pub fn record_task(&self, ok: bool) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if ok {
            c.tasks_ok += 1;
        } else {
            c.tasks_failed += 1;
        }
    }

    pub fn record_warnings(&self, count: usize) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        c.warnings += count as u64;
    }

    /// `natural_stop` is true when generation ended on EOS or a stop sequence.
    pub fn record_generation(
        &self,
        elapsed_ms: u64,
        tokens: usize,
        unknown_tokens: usize,
        natural_stop: bool,
    ) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        c.generations += 1;
        c.generated_tokens += tokens as u64;
        c.unknown_tokens += unknown_tokens as u64;
        if natural_stop {
            c.natural_stops += 1;
        }
        // exponential moving average
        let sample = elapsed_ms as f64;
        c.response_ms = Some(match c.response_ms {
            Some(avg) => avg * 0.8 + sample * 0.2,
            None => sample,
        });
    }

    pub fn reset(&self) {
        *self.counters.lock().unwrap_or_else(PoisonError::into_inner) = HealthCounters::default();
    }

    pub fn snapshot(&self, system: &SystemMetrics) -> HealthMetrics {
        let c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let tasks = c.tasks_ok + c.tasks_failed;
        let stability = if tasks == 0 {
            1.0
        } else {
            c.tasks_ok as f64 / tasks as f64
        };
        let coherence = if c.generations == 0 {
            1.0
        } else {
            c.natural_stops as f64 / c.generations as f64
        };
        let hallucination_score = if c.generated_tokens == 0 {
            0.0
        } else {
            c.unknown_tokens as f64 / c.generated_tokens as f64
        };
        HealthMetrics {
            confidence: stability * (1.0 - hallucination_score),
            coherence,
            stability,
            response_time_ms: c.response_ms.unwrap_or(0.0),
            memory_usage: system.memory_usage(),
            cpu_usage: system.cpu_usage(),
            gpu_usage: 0.0,
            hallucination_score,
            error_count: c.tasks_failed,
            warning_count: c.warnings,
        }
    }
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

pub fn monitoring_report(system: &SystemMetrics, health: &HealthMetrics) -> String {
    let mut out = String::from("System Health Report\n====================\n");
    let _ = writeln!(out, "Uptime: {:.0}s", system.uptime_secs);
    let _ = writeln!(
        out,
        "Load average: {:.2} {:.2} {:.2} ({} CPUs)",
        system.load_1, system.load_5, system.load_15, system.cpu_count
    );
    let _ = writeln!(out, "CPU usage: {}", percent(system.cpu_usage()));
    let _ = writeln!(
        out,
        "Memory usage: {} of {} MiB",
        percent(system.memory_usage()),
        system.mem_total_kb / 1024
    );
    let _ = writeln!(out, "Swap usage: {}", percent(system.swap_usage()));
    out.push_str("\nModel Health\n------------\n");
    let _ = writeln!(out, "Stability: {}", percent(health.stability));
    let _ = writeln!(out, "Coherence: {}", percent(health.coherence));
    let _ = writeln!(out, "Confidence: {}", percent(health.confidence));
    let _ = writeln!(out, "Response time: {:.1}ms", health.response_time_ms);
    let _ = writeln!(
        out,
        "Errors: {}, warnings: {}",
        health.error_count, health.warning_count
    );
    out
}

/// Recommendations for `target` ("memory", "cpu", "swap", or empty for all).
pub fn optimization_report(system: &SystemMetrics, target: &str) -> String {
    let target = target.trim().to_ascii_lowercase();
    let wants = |area: &str| target.is_empty() || target == "all" || target == area;

    let mut findings = Vec::new();
    if wants("memory") {
        let usage = system.memory_usage();
        if usage > 0.9 {
            findings.push(format!(
                "Memory pressure is critical ({}): stop idle tasks and lower the model memory budget.",
                percent(usage)
            ));
        } else if usage > 0.75 {
            findings.push(format!(
                "Memory usage is high ({}): consider deleting finished tasks to release buffers.",
                percent(usage)
            ));
        }
    }
    if wants("cpu") {
        let usage = system.cpu_usage();
        if usage > 0.85 {
            findings.push(format!(
                "CPU is saturated ({}): lower max_tokens or the sandbox CPU share.",
                percent(usage)
            ));
        }
    }
    if wants("swap") && system.swap_usage() > 0.5 {
        findings.push(format!(
            "Swap usage is {}: the working set exceeds RAM.",
            percent(system.swap_usage())
        ));
    }

    let mut out = String::from("System Optimization Report\n==========================\n");
    if findings.is_empty() {
        out.push_str("No action needed: all inspected resources are within normal ranges.\n");
    } else {
        for (i, finding) in findings.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, finding);
        }
    }
    out
}

/// Traffic and error summary, optionally limited to interfaces whose name contains `filter`.
pub fn network_report(stats: &NetworkStats, filter: &str) -> String {
    let filter = filter.trim();
    let mut out = String::from("Network Analysis Report\n=======================\n");
    let mut shown = 0;
    for iface in stats
        .interfaces
        .iter()
        .filter(|i| filter.is_empty() || i.name.contains(filter))
    {
        shown += 1;
        let _ = writeln!(
            out,
            "{}: rx {} bytes / {} packets, tx {} bytes / {} packets",
            iface.name, iface.rx_bytes, iface.rx_packets, iface.tx_bytes, iface.tx_packets
        );
        let errors = iface.rx_errors + iface.tx_errors;
        let drops = iface.rx_dropped + iface.tx_dropped;
        if errors > 0 || drops > 0 {
            let _ = writeln!(
                out,
                "  WARNING: {} errors and {} dropped packets",
                errors, drops
            );
        }
    }
    if shown == 0 {
        out.push_str("No matching network interfaces found.\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0: 52000     400    2    1    0     0          0         0    31000     300    0    3    0     0       0          0
";

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("loadavg"), "0.50 0.25 0.10 1/100 4242\n").unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal:       1000 kB\nMemFree:         100 kB\nMemAvailable:    250 kB\nSwapTotal:         0 kB\nSwapFree:          0 kB\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("uptime"), "123.45 67.89\n").unwrap();
        std::fs::create_dir(dir.path().join("net")).unwrap();
        std::fs::write(dir.path().join("net/dev"), NET_DEV).unwrap();
        dir
    }

    #[test]
    fn test_system_metrics_from_proc() {
        let proc_root = fake_proc();
        let metrics = SystemMetrics::from_proc(proc_root.path());
        assert_eq!(metrics.load_1, 0.5);
        assert_eq!(metrics.mem_total_kb, 1000);
        assert_eq!(metrics.mem_available_kb, 250);
        assert_eq!(metrics.uptime_secs, 123.45);
        assert!((metrics.memory_usage() - 0.75).abs() < 1e-9);
        assert_eq!(metrics.swap_usage(), 0.0);
    }

    #[test]
    fn test_missing_proc_gives_zeros() {
        let empty = tempfile::tempdir().unwrap();
        let metrics = SystemMetrics::from_proc(empty.path());
        assert_eq!(metrics.mem_total_kb, 0);
        assert_eq!(metrics.memory_usage(), 0.0);
        assert!(NetworkStats::from_proc(empty.path()).interfaces.is_empty());
    }

    #[test]
    fn test_net_dev_parsing_and_report() {
        let stats = NetworkStats::parse(NET_DEV);
        assert_eq!(stats.interfaces.len(), 2);
        assert_eq!(stats.interfaces[1].name, "eth0");
        assert_eq!(stats.interfaces[1].tx_dropped, 3);

        let report = network_report(&stats, "eth");
        assert!(report.contains("eth0: rx 52000 bytes"));
        assert!(report.contains("2 errors and 4 dropped"));
        assert!(!report.contains("lo:"));
        assert!(network_report(&stats, "wlan").contains("No matching"));
    }

    #[test]
    fn test_optimization_report_flags_memory_pressure() {
        let metrics = SystemMetrics {
            mem_total_kb: 1000,
            mem_available_kb: 50,
            cpu_count: 1,
            ..Default::default()
        };
        let report = optimization_report(&metrics, "memory");
        assert!(report.contains("critical"));
        let quiet = optimization_report(&metrics, "cpu");
        assert!(quiet.contains("No action needed"));
    }

    #[test]
    fn test_health_tracker_ratios() {
        let tracker = HealthTracker::default();
        tracker.record_task(true);
        tracker.record_task(true);
        tracker.record_task(false);
        tracker.record_warnings(2);
        tracker.record_generation(100, 10, 5, true);
        tracker.record_generation(200, 10, 0, false);

        let health = tracker.snapshot(&SystemMetrics::default());
        assert_eq!(health.error_count, 1);
        assert_eq!(health.warning_count, 2);
        assert!((health.stability - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(health.coherence, 0.5);
        assert_eq!(health.hallucination_score, 0.25);
        assert_eq!(health.response_time_ms, 120.0);

        tracker.reset();
        assert_eq!(tracker.snapshot(&SystemMetrics::default()).error_count, 0);
    }

    #[test]
    fn test_monitoring_report_mentions_sections() {
        let health = HealthTracker::default().snapshot(&SystemMetrics::default());
        let report = monitoring_report(&SystemMetrics::default(), &health);
        assert!(report.contains("System Health Report"));
        assert!(report.contains("Model Health"));
    }
}

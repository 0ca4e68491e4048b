//! System metric samplers and the clock producer.
//!
//! Each sampler is a pure parser over the text of a `/proc` or `/sys` file
//! plus a reader rooted at a configurable directory, so tests can point it
//! at a temporary tree.

use crate::publisher::{Publisher, Segment};
use crate::shutdown::{self, ShutdownRx};
use bytesize::ByteSize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const CLOCK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const CLOCK_INTERVAL: Duration = Duration::from_millis(200);
const CPU_SAMPLE_GAP: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct MetricRoots {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
}

impl MetricRoots {
    pub fn new(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
        }
    }

    fn battery_dir(&self) -> PathBuf {
        self.sys_root.join("class/power_supply/BAT0")
    }

    pub fn has_battery(&self) -> bool {
        self.battery_dir().exists()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cpu,
    Temperature,
    Memory,
    Battery,
}

impl Metric {
    pub fn segment(self) -> Segment {
        match self {
            Metric::Cpu => Segment::Cpu,
            Metric::Temperature => Segment::Temperature,
            Metric::Memory => Segment::Memory,
            Metric::Battery => Segment::Battery,
        }
    }

    pub fn interval(self) -> Duration {
        match self {
            Metric::Cpu | Metric::Temperature => Duration::from_secs(2),
            Metric::Memory => Duration::from_secs(3),
            Metric::Battery => Duration::from_secs(5),
        }
    }

    /// Blocking read; `None` means the value is unavailable right now.
    pub fn sample(self, roots: &MetricRoots) -> Option<String> {
        match self {
            Metric::Cpu => sample_cpu(roots),
            Metric::Temperature => sample_temperature(roots),
            Metric::Memory => sample_memory(roots),
            Metric::Battery => sample_battery(roots),
        }
    }
}

/// The first four counters (user, nice, system, idle) of the aggregate
/// `cpu` line, which must be the first line.
pub fn parse_cpu_counters(stat: &str) -> Option<[u64; 4]> {
    let mut fields = stat.lines().next()?.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let mut counters = [0u64; 4];
    for counter in counters.iter_mut() {
        *counter = fields.next()?.parse().ok()?;
    }
    Some(counters)
}

pub fn cpu_usage_percent(before: [u64; 4], after: [u64; 4]) -> u64 {
    let idle = after[3].saturating_sub(before[3]);
    let total = after
        .iter()
        .sum::<u64>()
        .saturating_sub(before.iter().sum::<u64>());
    if total == 0 {
        return 0;
    }
    100u64.saturating_sub(idle.saturating_mul(100) / total)
}

fn sample_cpu(roots: &MetricRoots) -> Option<String> {
    let path = roots.proc_root.join("stat");
    let before = parse_cpu_counters(&fs::read_to_string(&path).ok()?)?;
    std::thread::sleep(CPU_SAMPLE_GAP);
    let after = parse_cpu_counters(&fs::read_to_string(&path).ok()?)?;
    Some(format!("🖥️ {}%", cpu_usage_percent(before, after)))
}

/// `(MemTotal, MemAvailable)` in kB. A zero total is treated as unavailable.
pub fn parse_meminfo(meminfo: &str) -> Option<(u64, u64)> {
    let mut total = 0u64;
    let mut available = 0u64;
    for line in meminfo.lines() {
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match key {
            "MemTotal:" => total = value.parse().unwrap_or(total),
            "MemAvailable:" => available = value.parse().unwrap_or(available),
            _ => {}
        }
    }
    (total > 0).then_some((total, available))
}

pub fn format_memory(total_kb: u64, available_kb: u64) -> String {
    let used = total_kb.saturating_sub(available_kb).saturating_mul(1024);
    let total = total_kb.saturating_mul(1024);
    format!(
        "💾 {}/{}",
        ByteSize::b(used).display().si(),
        ByteSize::b(total).display().si()
    )
}

fn sample_memory(roots: &MetricRoots) -> Option<String> {
    let meminfo = fs::read_to_string(roots.proc_root.join("meminfo")).ok()?;
    let (total, available) = parse_meminfo(&meminfo)?;
    Some(format_memory(total, available))
}

pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|milli| milli.is_finite())
        .map(|milli| milli / 1000.0)
}

pub fn format_temperature(celsius: f64) -> String {
    format!("🌡️ {celsius:.0}°C")
}

/// Subdirectories of `dir` whose names start with `prefix`, sorted by name.
fn sorted_children(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut children = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    children.sort();
    children
}

pub fn temperature_candidates(roots: &MetricRoots) -> Vec<PathBuf> {
    let sys = &roots.sys_root;
    let mut candidates = vec![
        sys.join("class/thermal/thermal_zone0/temp"),
        sys.join("class/thermal/thermal_zone1/temp"),
    ];
    candidates.extend(
        sorted_children(&sys.join("devices/platform/coretemp.0/hwmon"), "hwmon")
            .into_iter()
            .map(|dir| dir.join("temp1_input")),
    );
    candidates.extend(
        sorted_children(&sys.join("class/hwmon"), "")
            .into_iter()
            .map(|dir| dir.join("temp1_input")),
    );
    candidates
}

fn sample_temperature(roots: &MetricRoots) -> Option<String> {
    temperature_candidates(roots).into_iter().find_map(|path| {
        let raw = fs::read_to_string(path).ok()?;
        parse_millidegrees(&raw).map(format_temperature)
    })
}

pub fn format_battery(capacity: &str, status: &str) -> String {
    let icon = match status.trim() {
        "Charging" => "🔌",
        _ => "🔋",
    };
    format!("{icon} {}%", capacity.trim())
}

fn sample_battery(roots: &MetricRoots) -> Option<String> {
    let dir = roots.battery_dir();
    let capacity = fs::read_to_string(dir.join("capacity")).ok()?;
    let status = fs::read_to_string(dir.join("status")).ok()?;
    Some(format_battery(&capacity, &status))
}

pub fn spawn_metric(
    metric: Metric,
    roots: Arc<MetricRoots>,
    publisher: Publisher,
    mut shutdown: ShutdownRx,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let segment = metric.segment();
        loop {
            let sample_roots = roots.clone();
            let text = match tokio::task::spawn_blocking(move || metric.sample(&sample_roots)).await
            {
                Ok(Some(text)) => text,
                Ok(None) => {
                    debug!(event = "metric_unavailable", metric = segment.name());
                    segment.placeholder().to_string()
                }
                Err(err) => {
                    warn!(event = "metric_sampler_error", metric = segment.name(), error = %err);
                    segment.placeholder().to_string()
                }
            };
            publisher.publish(segment, text);
            if shutdown::sleep_or_shutdown(metric.interval(), &mut shutdown).await {
                break;
            }
        }
    })
}

pub fn spawn_clock(publisher: Publisher, mut shutdown: ShutdownRx) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = chrono::Local::now().format(CLOCK_FORMAT).to_string();
            publisher.publish(Segment::Clock, now);
            if shutdown::sleep_or_shutdown(CLOCK_INTERVAL, &mut shutdown).await {
                break;
            }
        }
    })
}

//! CPU utilization of the host process, or of its container.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Kernel clock ticks per second used by `/proc/<pid>/stat`.
const USER_HZ: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuMode {
    #[default]
    Host,
    /// Account against the cgroup v2 CPU controller.
    Container,
}

/// Source of the current CPU utilization, as a fraction in `[0, 1]`.
pub trait CpuUtilSource: Send + Sync {
    fn cpu_util(&self) -> io::Result<f64>;
}

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    cpu_time: Duration,
    at: Instant,
}

/// Reads CPU time from procfs or cgroupfs and reports utilization over the
/// interval since the previous reading.
#[derive(Debug)]
pub struct ProcCpuSource {
    mode: CpuMode,
    proc_stat: PathBuf,
    cgroup_root: PathBuf,
    last: Mutex<Option<CpuReading>>,
}

impl ProcCpuSource {
    pub fn new(mode: CpuMode) -> Self {
        Self::with_paths(mode, "/proc/self/stat", "/sys/fs/cgroup")
    }

    pub fn with_paths(
        mode: CpuMode,
        proc_stat: impl Into<PathBuf>,
        cgroup_root: impl Into<PathBuf>,
    ) -> Self {
        let source = Self {
            mode,
            proc_stat: proc_stat.into(),
            cgroup_root: cgroup_root.into(),
            last: Mutex::new(None),
        };
        // Prime the baseline so the first tick already has an interval.
        if let Ok(reading) = source.read() {
            *source.last.lock() = Some(reading);
        }
        source
    }

    fn read(&self) -> io::Result<CpuReading> {
        let cpu_time = match self.mode {
            CpuMode::Host => {
                let stat = fs::read_to_string(&self.proc_stat)?;
                parse_proc_stat_cpu_time(&stat)
            }
            CpuMode::Container => {
                let stat = fs::read_to_string(self.cgroup_root.join("cpu.stat"))?;
                parse_cgroup_usage(&stat)
            }
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed cpu accounting"))?;
        Ok(CpuReading {
            cpu_time,
            at: Instant::now(),
        })
    }

    fn cores(&self) -> f64 {
        let available = thread::available_parallelism().map_or(1, |n| n.get()) as f64;
        match self.mode {
            CpuMode::Host => available,
            CpuMode::Container => fs::read_to_string(self.cgroup_root.join("cpu.max"))
                .ok()
                .and_then(|max| parse_cpu_max(&max))
                .unwrap_or(available),
        }
    }
}

impl CpuUtilSource for ProcCpuSource {
    fn cpu_util(&self) -> io::Result<f64> {
        let current = self.read()?;
        let previous = self.last.lock().replace(current);
        let Some(previous) = previous else {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no baseline reading yet",
            ));
        };
        let wall = current.at.saturating_duration_since(previous.at).as_secs_f64();
        if wall <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "no time elapsed since the previous reading",
            ));
        }
        let used = current.cpu_time.saturating_sub(previous.cpu_time).as_secs_f64();
        Ok((used / wall / self.cores()).clamp(0.0, 1.0))
    }
}

/// User plus system time from a `/proc/<pid>/stat` line.
fn parse_proc_stat_cpu_time(stat: &str) -> Option<Duration> {
    // The command name may contain spaces, so count fields after the last ')'.
    let (_, rest) = stat.rsplit_once(')')?;
    let mut fields = rest.split_whitespace().skip(11);
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(Duration::from_secs_f64((utime + stime) as f64 / USER_HZ))
}

fn parse_cgroup_usage(stat: &str) -> Option<Duration> {
    stat.lines()
        .find_map(|line| line.strip_prefix("usage_usec "))
        .and_then(|usec| usec.trim().parse().ok())
        .map(Duration::from_micros)
}

/// Number of cores granted by `cpu.max`, `None` when unlimited.
fn parse_cpu_max(max: &str) -> Option<f64> {
    let mut parts = max.split_whitespace();
    let quota: f64 = parts.next()?.parse().ok()?;
    let period: f64 = parts.next()?.parse().ok()?;
    (period > 0.0).then(|| quota / period)
}

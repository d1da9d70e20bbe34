//! Process and host gauges.

use super::catalog;
use super::store::{Gauge, MetricStore};
use crate::error::MetricsError;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use std::time::Instant;

/// Point-in-time process readings. `None` means the reading is not
/// available on this platform or failed; that gauge is left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSample {
    pub memory_bytes: Option<u64>,
    pub peak_memory_bytes: Option<u64>,
    pub memory_limit_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub open_files: Option<u64>,
    /// 1, 5 and 15 minute load averages.
    pub load_average: Option<[f64; 3]>,
    pub uptime_seconds: f64,
}

/// Reads process statistics through sysinfo.
pub struct SystemSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
    started_at: Instant,
}

impl SystemSampler {
    pub fn new(started_at: Instant) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(error) => {
                tracing::debug!(%error, "current pid unavailable, process gauges disabled");
                None
            }
        };
        Self {
            system: Mutex::new(System::new()),
            pid,
            started_at,
        }
    }

    pub fn sample(&self) -> SystemSample {
        let mut sample = SystemSample {
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            peak_memory_bytes: peak_resident_bytes(),
            open_files: open_file_count(),
            ..SystemSample::default()
        };

        let mut system = self.system.lock();
        system.refresh_memory();
        let total_memory = system.total_memory();
        if total_memory > 0 {
            sample.memory_limit_bytes = Some(total_memory);
        }

        if let Some(pid) = self.pid {
            system.refresh_processes_specifics(
                ProcessesToUpdate::Some(&[pid]),
                true,
                ProcessRefreshKind::nothing().with_memory().with_cpu(),
            );
            if let Some(process) = system.process(pid) {
                sample.memory_bytes = Some(process.memory());
                sample.cpu_percent = Some(f64::from(process.cpu_usage()));
            }
        }
        drop(system);

        let load = System::load_average();
        if load.one > 0.0 || load.five > 0.0 || load.fifteen > 0.0 {
            sample.load_average = Some([load.one, load.five, load.fifteen]);
        }

        sample
    }
}

/// Gauge handles for [`SystemSample`].
#[derive(Clone)]
pub struct SystemGauges {
    memory_usage: Gauge,
    memory_peak: Gauge,
    memory_limit: Gauge,
    uptime: Gauge,
    cpu_usage: Gauge,
    open_files: Gauge,
    load_average: Gauge,
}

impl SystemGauges {
    pub fn register(store: &MetricStore) -> Result<Self, MetricsError> {
        Ok(Self {
            memory_usage: store.get_or_register_gauge(&catalog::MEMORY_USAGE_BYTES)?,
            memory_peak: store.get_or_register_gauge(&catalog::MEMORY_PEAK_BYTES)?,
            memory_limit: store.get_or_register_gauge(&catalog::MEMORY_LIMIT_BYTES)?,
            uptime: store.get_or_register_gauge(&catalog::PROCESS_UPTIME_SECONDS)?,
            cpu_usage: store.get_or_register_gauge(&catalog::PROCESS_CPU_USAGE_PERCENT)?,
            open_files: store.get_or_register_gauge(&catalog::PROCESS_OPEN_FILES)?,
            load_average: store.get_or_register_gauge(&catalog::SYSTEM_LOAD_AVERAGE)?,
        })
    }

    /// Write every available reading. A failed update is logged and the
    /// remaining gauges are still written.
    pub fn apply(&self, sample: &SystemSample) {
        set_optional(&self.memory_usage, sample.memory_bytes.map(|value| value as f64));
        set_optional(&self.memory_peak, sample.peak_memory_bytes.map(|value| value as f64));
        set_optional(&self.memory_limit, sample.memory_limit_bytes.map(|value| value as f64));
        set_optional(&self.uptime, Some(sample.uptime_seconds));
        set_optional(&self.cpu_usage, sample.cpu_percent);
        set_optional(&self.open_files, sample.open_files.map(|value| value as f64));

        if let Some([one, five, fifteen]) = sample.load_average {
            for (period, value) in [("1min", one), ("5min", five), ("15min", fifteen)] {
                if let Err(error) = self.load_average.set(&[period], value) {
                    tracing::debug!(
                        metric = self.load_average.name(),
                        %error,
                        "gauge update skipped"
                    );
                }
            }
        }
    }
}

fn set_optional(gauge: &Gauge, value: Option<f64>) {
    let Some(value) = value else {
        return;
    };
    if let Err(error) = gauge.set(&[], value) {
        tracing::debug!(metric = gauge.name(), %error, "gauge update skipped");
    }
}

#[cfg(unix)]
fn peak_resident_bytes() -> Option<u64> {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    let result = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if result != 0 {
        return None;
    }
    let usage = unsafe { usage.assume_init() };
    let max_rss = u64::try_from(usage.ru_maxrss).ok()?;

    // Linux reports kilobytes, macOS reports bytes.
    if cfg!(target_os = "macos") {
        Some(max_rss)
    } else {
        Some(max_rss * 1024)
    }
}

#[cfg(not(unix))]
fn peak_resident_bytes() -> Option<u64> {
    None
}

fn open_file_count() -> Option<u64> {
    let entries = std::fs::read_dir("/proc/self/fd").ok()?;
    Some(entries.filter_map(|entry| entry.ok()).count() as u64)
}

//! Resource usage accounting via `getrusage(2)` (`spec.md` §4.F).
//!
//! `RUSAGE_CHILDREN` aggregates over every child this process has
//! reaped so far, so readings are only meaningful as a delta around a
//! single action's execution — the executor snapshots before and after
//! and reports the difference.

use crate::spec::ResourceUsage;

#[cfg(unix)]
pub fn snapshot_children() -> ResourceUsage {
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) != 0 {
            return ResourceUsage::default();
        }
        ResourceUsage {
            cpu_time: std::time::Duration::from_secs(usage.ru_utime.tv_sec as u64)
                + std::time::Duration::from_micros(usage.ru_utime.tv_usec as u64)
                + std::time::Duration::from_secs(usage.ru_stime.tv_sec as u64)
                + std::time::Duration::from_micros(usage.ru_stime.tv_usec as u64),
            peak_memory_bytes: peak_memory_bytes(usage.ru_maxrss),
            io_read_bytes: usage.ru_inblock as u64 * 512,
            io_write_bytes: usage.ru_oublock as u64 * 512,
        }
    }
}

#[cfg(not(unix))]
pub fn snapshot_children() -> ResourceUsage {
    ResourceUsage::default()
}

/// `ru_maxrss` is kilobytes on Linux, bytes on macOS.
#[cfg(target_os = "macos")]
fn peak_memory_bytes(maxrss: libc::c_long) -> u64 {
    maxrss as u64
}

#[cfg(all(unix, not(target_os = "macos")))]
fn peak_memory_bytes(maxrss: libc::c_long) -> u64 {
    maxrss as u64 * 1024
}

/// Computes `after - before` saturating at zero, since `RUSAGE_CHILDREN`
/// is cumulative across the process's lifetime.
pub fn delta(before: ResourceUsage, after: ResourceUsage) -> ResourceUsage {
    ResourceUsage {
        cpu_time: after.cpu_time.saturating_sub(before.cpu_time),
        peak_memory_bytes: after.peak_memory_bytes.max(before.peak_memory_bytes),
        io_read_bytes: after.io_read_bytes.saturating_sub(before.io_read_bytes),
        io_write_bytes: after.io_write_bytes.saturating_sub(before.io_write_bytes),
    }
}

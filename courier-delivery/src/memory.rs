//! Resident memory of the worker process.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the process's resident memory, checked between jobs.
pub trait MemoryGauge: Send + Sync {
    /// Bytes currently resident, or `None` when the platform cannot say.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads the current process's memory from the operating system.
///
/// On Linux this is the current resident set from `/proc/self/statm`.
/// Elsewhere the peak resident set from `getrusage` is used, which never
/// shrinks; a worker over its limit will still exit as expected.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemory;

impl ProcessMemory {
    fn from_statm() -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;

        // SAFETY: sysconf only reads a configuration value.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let page_size = u64::try_from(page_size).ok().filter(|size| *size > 0)?;

        pages.checked_mul(page_size)
    }

    fn from_rusage() -> Option<u64> {
        let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();

        // SAFETY: `usage` is a valid, writable rusage and is only read after
        // getrusage reports success.
        let usage = unsafe {
            if libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) != 0 {
                return None;
            }
            usage.assume_init()
        };

        let max_rss = u64::try_from(usage.ru_maxrss).ok()?;
        if cfg!(target_os = "macos") {
            Some(max_rss)
        } else {
            max_rss.checked_mul(1024)
        }
    }
}

impl MemoryGauge for ProcessMemory {
    fn resident_bytes(&self) -> Option<u64> {
        Self::from_statm().or_else(Self::from_rusage)
    }
}

/// A gauge reporting whatever it was last set to.
#[derive(Debug, Default)]
pub struct FixedMemory(AtomicU64);

impl FixedMemory {
    pub const fn new(bytes: u64) -> Self {
        Self(AtomicU64::new(bytes))
    }

    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::Relaxed);
    }
}

impl MemoryGauge for FixedMemory {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_memory_is_reported() {
        let used = ProcessMemory.resident_bytes();
        assert!(used.is_some_and(|bytes| bytes > 0));
    }

    #[test]
    fn test_fixed_memory() {
        let gauge = FixedMemory::new(10);
        assert_eq!(gauge.resident_bytes(), Some(10));
        gauge.set(20);
        assert_eq!(gauge.resident_bytes(), Some(20));
    }
}

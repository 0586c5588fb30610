//! Optional operating-system capabilities, resolved once at startup

#![allow(unsafe_code)]

use serde::Serialize;
use std::io;
use tracing::debug;

/// Resident memory and accumulated CPU time of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSample {
    pub rss_kib: Option<u64>,
    pub cpu_time_ms: Option<u64>,
}

/// Platform hooks that may be unavailable
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// Resident set size of a pid, in KiB
    pub read_rss_kib: Option<fn(u32) -> Option<u64>>,
    /// User plus system CPU time of a pid, in milliseconds
    pub read_cpu_time_ms: Option<fn(u32) -> Option<u64>>,
    /// Make this process adopt orphaned descendants
    pub set_child_subreaper: Option<fn() -> io::Result<()>>,
}

impl Capabilities {
    /// Probe the running platform
    pub fn detect() -> Self {
        let caps = Self::platform();
        debug!(
            "Capabilities: rss={} cpu={} subreaper={}",
            caps.read_rss_kib.is_some(),
            caps.read_cpu_time_ms.is_some(),
            caps.set_child_subreaper.is_some()
        );
        caps
    }

    /// No optional capability at all
    pub fn none() -> Self {
        Self::default()
    }

    #[cfg(target_os = "linux")]
    fn platform() -> Self {
        let has_proc = std::path::Path::new("/proc/self/stat").exists();
        Self {
            read_rss_kib: has_proc.then_some(linux::read_rss_kib as fn(u32) -> Option<u64>),
            read_cpu_time_ms: has_proc
                .then_some(linux::read_cpu_time_ms as fn(u32) -> Option<u64>),
            set_child_subreaper: Some(linux::set_child_subreaper),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn platform() -> Self {
        Self::none()
    }

    /// Whether any resource reader is present
    pub fn can_sample(&self) -> bool {
        self.read_rss_kib.is_some() || self.read_cpu_time_ms.is_some()
    }

    /// Sample a process; `None` when no reader exists
    pub fn sample(&self, pid: u32) -> Option<ResourceSample> {
        if !self.can_sample() {
            return None;
        }
        Some(ResourceSample {
            rss_kib: self.read_rss_kib.and_then(|read| read(pid)),
            cpu_time_ms: self.read_cpu_time_ms.and_then(|read| read(pid)),
        })
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs;
    use std::io;

    pub(super) fn read_rss_kib(pid: u32) -> Option<u64> {
        let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
        parse_vm_rss(&status)
    }

    pub(super) fn parse_vm_rss(status: &str) -> Option<u64> {
        let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
        line.split_whitespace().nth(1)?.parse().ok()
    }

    pub(super) fn read_cpu_time_ms(pid: u32) -> Option<u64> {
        let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        let hz = clock_ticks_per_second()?;
        let ticks = parse_cpu_ticks(&stat)?;
        Some(ticks * 1000 / hz)
    }

    /// utime + stime from a `/proc/<pid>/stat` line
    pub(super) fn parse_cpu_ticks(stat: &str) -> Option<u64> {
        let rparen = stat.rfind(')')?;
        let after = stat.get(rparen + 2..)?;
        let fields: Vec<&str> = after.split_whitespace().collect();
        // fields[0] is field 3 (state); utime is field 14, stime field 15
        let utime: u64 = fields.get(11)?.parse().ok()?;
        let stime: u64 = fields.get(12)?.parse().ok()?;
        Some(utime + stime)
    }

    fn clock_ticks_per_second() -> Option<u64> {
        let v = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if v <= 0 {
            None
        } else {
            Some(v as u64)
        }
    }

    pub(super) fn set_child_subreaper() -> io::Result<()> {
        let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_never_samples() {
        let caps = Capabilities::none();
        assert!(!caps.can_sample());
        assert_eq!(caps.sample(1), None);
    }

    #[test]
    fn custom_readers_are_used() {
        fn fake_rss(_pid: u32) -> Option<u64> {
            Some(42)
        }
        let caps = Capabilities {
            read_rss_kib: Some(fake_rss),
            ..Capabilities::none()
        };
        let sample = caps.sample(7).unwrap();
        assert_eq!(sample.rss_kib, Some(42));
        assert_eq!(sample.cpu_time_ms, None);
    }
}

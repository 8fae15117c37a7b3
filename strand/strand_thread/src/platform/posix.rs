//! Linux adapter over the POSIX scheduler interface.
//!
//! Priorities map linearly onto the range of the thread's scheduling
//! policy. Under a policy with no priority range (`SCHED_OTHER`) the thread
//! is moved to `SCHED_RR`; unprivileged callers get `EPERM` for that, which
//! is treated as success since priorities are advisory.

use log::debug;
use std::fs;
use std::io;
use std::mem;

use strand_core::{CpuSet, PlatformError};

use super::{Capabilities, NativeHandle, PlatformAdapter};

const CPU_LIMIT: usize = libc::CPU_SETSIZE as usize;
const ONLINE_CPUS: &str = "/sys/devices/system/cpu/online";

/// Native adapter for Linux.
#[derive(Debug, Default, Clone, Copy)]
pub struct PosixAdapter;

impl PosixAdapter {
    /// Create the Linux adapter.
    pub fn new() -> Self {
        Self
    }
}

fn parse_online(list: &str) -> Option<CpuSet> {
    list.trim().parse::<CpuSet>().ok().filter(|cpus| !cpus.is_empty())
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn priority_range(policy: libc::c_int) -> Result<(libc::c_int, libc::c_int), PlatformError> {
    // SAFETY: pure queries on a policy constant.
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(policy),
            libc::sched_get_priority_max(policy),
        )
    };
    if min < 0 {
        return Err(PlatformError::Os {
            op: "sched_get_priority_min",
            code: last_errno(),
        });
    }
    if max < 0 {
        return Err(PlatformError::Os {
            op: "sched_get_priority_max",
            code: last_errno(),
        });
    }
    Ok((min, max))
}

/// Map a normalized priority onto `[min, max]`.
pub(crate) fn native_priority(min: libc::c_int, max: libc::c_int, priority: f64) -> libc::c_int {
    let span = f64::from(max - min);
    min + (span * priority.clamp(0.0, 1.0)).round() as libc::c_int
}

fn to_cpu_set(cpus: &CpuSet) -> Result<libc::cpu_set_t, PlatformError> {
    // SAFETY: cpu_set_t is a plain bit array; all zeroes is the empty set.
    let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
    for cpu in cpus {
        if cpu >= CPU_LIMIT {
            return Err(PlatformError::CpuOutOfRange {
                cpu,
                limit: CPU_LIMIT,
            });
        }
        // SAFETY: cpu is below CPU_SETSIZE.
        unsafe { libc::CPU_SET(cpu, &mut set) };
    }
    Ok(set)
}

fn from_cpu_set(set: &libc::cpu_set_t) -> CpuSet {
    // SAFETY: every index is below CPU_SETSIZE.
    (0..CPU_LIMIT)
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, set) })
        .collect()
}

fn set_affinity(tid: libc::pid_t, cpus: &CpuSet) -> Result<(), PlatformError> {
    let set = to_cpu_set(cpus)?;
    // SAFETY: set is a valid cpu_set_t of the size passed.
    let res = unsafe { libc::sched_setaffinity(tid, mem::size_of::<libc::cpu_set_t>(), &set) };
    if res != 0 {
        return Err(PlatformError::Os {
            op: "sched_setaffinity",
            code: last_errno(),
        });
    }
    Ok(())
}

impl PlatformAdapter for PosixAdapter {
    fn name(&self) -> &'static str {
        "posix"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn set_thread_priority(&self, handle: NativeHandle, priority: f64) -> Result<(), PlatformError> {
        let thread = handle.pthread() as libc::pthread_t;

        let mut policy: libc::c_int = 0;
        // SAFETY: sched_param is plain data; the handle belongs to a live thread.
        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        let res = unsafe { libc::pthread_getschedparam(thread, &mut policy, &mut param) };
        if res != 0 {
            return Err(PlatformError::Os {
                op: "pthread_getschedparam",
                code: res,
            });
        }

        let (mut min, mut max) = priority_range(policy)?;
        if max <= min {
            policy = libc::SCHED_RR;
            (min, max) = priority_range(policy)?;
        }

        param.sched_priority = native_priority(min, max, priority);
        // SAFETY: as above.
        let res = unsafe { libc::pthread_setschedparam(thread, policy, &param) };
        match res {
            0 => Ok(()),
            libc::EPERM => {
                debug!(
                    "Permission denied setting priority {} on thread {}, ignoring",
                    priority,
                    handle.tid()
                );
                Ok(())
            }
            code => Err(PlatformError::Os {
                op: "pthread_setschedparam",
                code,
            }),
        }
    }

    fn set_thread_affinity(&self, handle: NativeHandle, cpus: &CpuSet) -> Result<(), PlatformError> {
        set_affinity(handle.tid() as libc::pid_t, cpus)
    }

    /// The kernel's list of online CPUs, which may have holes, together
    /// with whatever the process is already allowed to run on.
    fn system_affinity(&self) -> CpuSet {
        let online = fs::read_to_string(ONLINE_CPUS)
            .ok()
            .and_then(|list| parse_online(&list))
            .unwrap_or_else(|| (0..num_cpus::get()).collect());
        let visible = match self.process_affinity() {
            Ok(allowed) => online.union(&allowed),
            Err(e) => {
                debug!("Could not read process affinity: {}", e);
                online
            }
        };
        visible.iter().filter(|&cpu| cpu < CPU_LIMIT).collect()
    }

    fn process_affinity(&self) -> Result<CpuSet, PlatformError> {
        // SAFETY: the kernel fills at most size_of::<cpu_set_t>() bytes.
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        let res = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if res != 0 {
            return Err(PlatformError::Os {
                op: "sched_getaffinity",
                code: last_errno(),
            });
        }
        Ok(from_cpu_set(&set))
    }

    fn set_process_affinity(&self, cpus: &CpuSet) -> Result<(), PlatformError> {
        set_affinity(0, cpus)
    }
}

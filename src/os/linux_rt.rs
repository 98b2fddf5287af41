use anyhow::Result;
use libc::{
    clock_gettime, clock_nanosleep, cpu_set_t, mlockall, pthread_self, pthread_setaffinity_np,
    sched_param, sched_setscheduler, timespec, CLOCK_MONOTONIC, CPU_SET, CPU_ZERO, MCL_CURRENT,
    MCL_FUTURE, SCHED_FIFO, TIMER_ABSTIME,
};
use log::{info, warn};
use std::io;
use std::time::Duration;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Real-time settings applied by the publish cycle thread to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtThreadConfig {
    pub core: Option<usize>,
    /// SCHED_FIFO priority 1-99
    pub priority: Option<i32>,
    pub lock_memory: bool,
}

impl RtThreadConfig {
    /// Apply to the calling thread. Missing privileges only produce warnings;
    /// a core that does not exist is an error.
    pub fn apply(&self) -> Result<()> {
        info!(
            "Initializing publish cycle thread: core={:?}, priority={:?}, mlock={}",
            self.core, self.priority, self.lock_memory
        );
        if self.lock_memory {
            if let Err(e) = lock_memory() {
                warn!("{}; continuing without memory locking", e);
            }
        }
        if let Some(core) = self.core {
            pin_thread_to_core(core)?;
        }
        if let Some(priority) = self.priority {
            if let Err(e) = set_realtime_priority(priority) {
                warn!("{}; cycle timing will not be deterministic", e);
            }
        }
        Ok(())
    }
}

/// Pin the calling thread to `core_id`, checked against the online CPU count.
pub fn pin_thread_to_core(core_id: usize) -> Result<()> {
    let cpus = num_cpus::get();
    if core_id >= cpus {
        anyhow::bail!("CPU core {} does not exist ({} cores available)", core_id, cpus);
    }
    // SAFETY: cpu_set_t is plain data, the mask is passed by reference with its size.
    let res = unsafe {
        let mut set: cpu_set_t = std::mem::zeroed();
        CPU_ZERO(&mut set);
        CPU_SET(core_id, &mut set);
        pthread_setaffinity_np(pthread_self(), std::mem::size_of::<cpu_set_t>(), &set)
    };
    if res != 0 {
        anyhow::bail!(
            "Failed to pin thread to core {}: {}",
            core_id,
            io::Error::from_raw_os_error(res)
        );
    }
    info!("Thread pinned to CPU core {}", core_id);
    Ok(())
}

/// SCHED_FIFO for the calling thread. Needs CAP_SYS_NICE.
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    if !(1..=99).contains(&priority) {
        anyhow::bail!("Priority must be between 1 and 99, got {}", priority);
    }
    let param = sched_param {
        sched_priority: priority,
    };
    // SAFETY: pid 0 targets the calling thread, param outlives the call.
    let res = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
    if res != 0 {
        anyhow::bail!("Failed to set RT priority {}: {}", priority, io::Error::last_os_error());
    }
    info!("Real-time priority set to {}", priority);
    Ok(())
}

/// Lock current and future pages. Needs CAP_IPC_LOCK.
pub fn lock_memory() -> Result<()> {
    // SAFETY: no pointers involved.
    let res = unsafe { mlockall(MCL_CURRENT | MCL_FUTURE) };
    if res != 0 {
        anyhow::bail!("Failed to lock memory: {}", io::Error::last_os_error());
    }
    info!("Memory locked");
    Ok(())
}

/// Absolute CLOCK_MONOTONIC deadline for drift-free periodic loops.
#[derive(Clone, Copy)]
pub struct MonotonicDeadline {
    ts: timespec,
}

impl std::fmt::Debug for MonotonicDeadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MonotonicDeadline({}.{:09})", self.ts.tv_sec, self.ts.tv_nsec)
    }
}

impl MonotonicDeadline {
    pub fn now() -> Result<Self> {
        // SAFETY: ts is a valid out pointer.
        let ts = unsafe {
            let mut ts: timespec = std::mem::zeroed();
            if clock_gettime(CLOCK_MONOTONIC, &mut ts) != 0 {
                anyhow::bail!("Failed to read monotonic clock: {}", io::Error::last_os_error());
            }
            ts
        };
        Ok(MonotonicDeadline { ts })
    }

    /// Move the deadline forward by `period`.
    pub fn advance(&mut self, period: Duration) {
        let total = self.ts.tv_nsec as i64 + period.subsec_nanos() as i64;
        self.ts.tv_sec += period.as_secs() as libc::time_t + (total / NANOS_PER_SEC) as libc::time_t;
        self.ts.tv_nsec = (total % NANOS_PER_SEC) as _;
    }

    /// Block until the deadline. Returns immediately if it already passed.
    pub fn sleep_until(&self) -> Result<()> {
        loop {
            // SAFETY: ts is valid for the call, remaining time is not requested.
            let res = unsafe { clock_nanosleep(CLOCK_MONOTONIC, TIMER_ABSTIME, &self.ts, std::ptr::null_mut()) };
            match res {
                0 => return Ok(()),
                libc::EINTR => continue,
                code => anyhow::bail!("clock_nanosleep failed: {}", io::Error::from_raw_os_error(code)),
            }
        }
    }

    /// How far `now` is past this deadline, zero if it is not.
    pub fn lateness(&self, now: &MonotonicDeadline) -> Duration {
        let ns = (now.ts.tv_sec as i64 - self.ts.tv_sec as i64) * NANOS_PER_SEC
            + (now.ts.tv_nsec as i64 - self.ts.tv_nsec as i64);
        if ns <= 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(ns as u64)
        }
    }
}

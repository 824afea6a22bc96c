//! Real-time scheduling priority and CPU affinity, requested best-effort.
//!
//! The source pins its sampler and compute threads to a core and asks for
//! an elevated scheduling class. Neither is available to an unprivileged
//! process on every deployment target, so this is exposed as a capability
//! check performed once at startup: failure is logged and the caller
//! proceeds at normal priority, per the "expose as config, degrade
//! gracefully" redesign note.

use slog::{info, warn, Logger};

/// Attempts to set the calling thread to the `SCHED_FIFO` real-time policy
/// at `priority`, logging the outcome. Never panics; a failure here must
/// never prevent the engine from running.
#[cfg(unix)]
pub fn apply_realtime_policy(log: &Logger, thread_name: &str, priority: i32) {
    // SAFETY: `sched_param` is a plain-old-data struct with no invariants
    // beyond the field we set; `pthread_self`/`pthread_setschedparam` are
    // standard POSIX calls operating only on the calling thread.
    let result = unsafe {
        let param = libc::sched_param {
            sched_priority: priority,
        };
        libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param)
    };
    if result == 0 {
        info!(log, "applied real-time scheduling"; "thread" => thread_name, "priority" => priority);
    } else {
        warn!(log, "could not apply real-time scheduling, continuing at normal priority";
            "thread" => thread_name, "errno" => result);
    }
}

#[cfg(not(unix))]
pub fn apply_realtime_policy(log: &Logger, thread_name: &str, _priority: i32) {
    warn!(log, "real-time scheduling not supported on this platform"; "thread" => thread_name);
}

/// Attempts to pin the calling thread to `core_id`, logging the outcome.
#[cfg(target_os = "linux")]
pub fn pin_to_core(log: &Logger, thread_name: &str, core_id: usize) {
    // SAFETY: `cpu_set_t` manipulation macros only touch the local stack
    // value; `sched_setaffinity(0, ...)` applies to the calling thread.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core_id, &mut set);
        let result = libc::sched_setaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if result == 0 {
            info!(log, "pinned thread to core"; "thread" => thread_name, "core" => core_id);
        } else {
            warn!(log, "could not pin thread to core, continuing unpinned";
                "thread" => thread_name, "core" => core_id, "errno" => result);
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(log: &Logger, thread_name: &str, _core_id: usize) {
    warn!(log, "core pinning not supported on this platform"; "thread" => thread_name);
}

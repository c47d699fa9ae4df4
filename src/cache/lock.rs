use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Acquire a tier mutex, recovering the guard if a previous holder panicked.
///
/// A poisoned tier is still structurally valid (every mutation completes
/// before the guard drops), so the cache keeps serving instead of failing.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "entries written by the panicking thread may be missing",
                "Recovered from poisoned cache tier lock"
            );
            poisoned.into_inner()
        }
    }
}

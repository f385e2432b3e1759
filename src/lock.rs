use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, taking the inner value back if a callback thread panicked while holding it.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mutex poisoned in {context}; recovering");
            poisoned.into_inner()
        }
    }
}

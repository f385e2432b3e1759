use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

/// Shared interrupt flag. The interrupt handler flips it; the driver thread observes it
/// between polls and unwinds through the normal teardown path. A token can also carry a
/// deadline, after which it reads as cancelled without anyone flipping it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh token that cancels itself once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Sleep for `duration`, waking early if the token is cancelled.
    /// Returns `false` when the sleep was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(25);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLICE));
        }
    }
}

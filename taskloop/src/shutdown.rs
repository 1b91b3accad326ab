//! Cooperative stop signal shared by every long-running loop.
//!
//! Loops check [`StopSignal::is_stopped`] between iterations and sleep through
//! [`StopSignal::sleep`], which wakes immediately when a stop is requested, so
//! Ctrl-C ends a poller after its current item instead of mid-action.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `duration`. Returns true if a stop was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut stopped = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = cvar
                .wait_timeout(stopped, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *stopped
    }

    /// Trip this signal on SIGINT/SIGTERM.
    pub fn install_handler(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            info!("stop requested, finishing current iteration");
            signal.trigger();
        })
        .context("install interrupt handler")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn sleep_runs_full_duration_without_stop() {
        let stop = StopSignal::new();
        let start = Instant::now();
        assert!(!stop.sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn trigger_wakes_sleeper() {
        let stop = StopSignal::new();
        let waker = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            waker.trigger();
        });
        let start = Instant::now();
        assert!(stop.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(stop.is_stopped());
        handle.join().unwrap();
    }
}

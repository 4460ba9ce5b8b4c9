use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

use crate::signal::{Signal, SignalHandle};

#[derive(Default)]
struct TimerState {
    cancelled: bool,
    fired: bool,
}

/// One-shot timer thread that signals a process group unless cancelled first.
///
/// The signal is sent while holding the state lock, so once [`cancel`]
/// returns the timer can no longer fire.
///
/// [`cancel`]: KillTimer::cancel
pub(crate) struct KillTimer {
    state: Arc<(Mutex<TimerState>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl KillTimer {
    pub(crate) fn start(after: Duration, target: SignalHandle, signal: Signal) -> Self {
        let state = Arc::new((Mutex::new(TimerState::default()), Condvar::new()));
        let shared = state.clone();

        let thread = std::thread::spawn(move || {
            let (lock, condvar) = &*shared;
            let Ok(guard) = lock.lock() else { return };
            let Ok((mut guard, _)) =
                condvar.wait_timeout_while(guard, after, |state| !state.cancelled)
            else {
                return;
            };
            if guard.cancelled {
                return;
            }
            guard.fired = true;
            warn!(?signal, timeout = ?after, "Timeout expired; signalling process group");
            if let Err(e) = target.send_signal(signal) {
                debug!(error = %e, ?signal, "Timer signal not delivered");
            }
        });

        Self {
            state,
            thread: Some(thread),
        }
    }

    /// Disarm the timer, wait for its thread and report whether it fired.
    pub(crate) fn cancel(&mut self) -> bool {
        let (lock, condvar) = &*self.state;
        if let Ok(mut state) = lock.lock() {
            state.cancelled = true;
        }
        condvar.notify_all();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        lock.lock().map(|state| state.fired).unwrap_or(false)
    }
}

impl Drop for KillTimer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn cancelled_timer_never_fires() {
        let mut timer = KillTimer::start(
            Duration::from_millis(50),
            SignalHandle::default(),
            Signal::Terminate,
        );
        assert!(!timer.cancel());
        std::thread::sleep(Duration::from_millis(80));
        assert!(!timer.cancel());
    }

    #[test]
    fn expired_timer_reports_fired_even_without_a_process() {
        let mut timer = KillTimer::start(
            Duration::from_millis(10),
            SignalHandle::default(),
            Signal::Kill,
        );
        std::thread::sleep(Duration::from_millis(60));
        assert!(timer.cancel());
    }

    #[test]
    fn cancel_wakes_the_timer_thread_promptly() {
        let mut timer = KillTimer::start(
            Duration::from_secs(30),
            SignalHandle::default(),
            Signal::Kill,
        );
        let started = Instant::now();
        timer.cancel();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

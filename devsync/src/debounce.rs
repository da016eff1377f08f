//! Coalescing of rapid repeated intents

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Verdict for an offered value
#[derive(Debug, PartialEq, Eq)]
pub enum Gate<T> {
    /// Outside the window: run this value now
    Now(T),
    /// Inside the window: wait this long, then run whatever [`Debouncer::take`] returns
    Arm(Duration),
    /// A timer is already armed and will pick this value up
    Deferred,
}

#[derive(Debug)]
struct DebounceState<T> {
    last_fire: Option<Instant>,
    armed: bool,
    pending: Option<T>,
}

/// Leading-edge debouncer with a trailing run of the last value
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    state: Mutex<DebounceState<T>>,
}

impl<T> Debouncer<T> {
    /// Create a debouncer with the given window
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(DebounceState {
                last_fire: None,
                armed: false,
                pending: None,
            }),
        }
    }

    /// Offer a value
    pub fn offer(&self, value: T) -> Gate<T> {
        let mut state = self.state.lock();
        if state.armed {
            state.pending = Some(value);
            return Gate::Deferred;
        }

        let now = Instant::now();
        match state.last_fire {
            Some(last) if now.duration_since(last) < self.window => {
                state.armed = true;
                state.pending = Some(value);
                Gate::Arm(self.window - now.duration_since(last))
            }
            _ => {
                state.last_fire = Some(now);
                Gate::Now(value)
            }
        }
    }

    /// Disarm and return the latest deferred value
    pub fn take(&self) -> Option<T> {
        let mut state = self.state.lock();
        state.armed = false;
        state.last_fire = Some(Instant::now());
        state.pending.take()
    }
}

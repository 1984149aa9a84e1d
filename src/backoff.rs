use crate::env_var::Config;

use std::time::{Duration, Instant};
use tracing::warn;

/// Pause policy applied between polls of remote state.
///
/// Each unsuccessful poll sleeps for the current pause, which then grows by
/// `factor` up to `max`. A `factor` of 1 keeps the pause fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    factor: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, factor: u32) -> Backoff {
        Backoff {
            initial,
            max: max.max(initial),
            factor: factor.max(1),
        }
    }

    pub fn fixed(pause: Duration) -> Backoff {
        Backoff::new(pause, pause, 1)
    }

    pub fn from_config(config: &Config) -> Backoff {
        Backoff::new(
            Duration::from_micros(config.pause_us),
            Duration::from_micros(config.pause_max_us),
            config.backoff_factor,
        )
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub(crate) fn start(&self) -> BackoffState {
        BackoffState {
            policy: *self,
            current: self.initial,
            polls: 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct BackoffState {
    policy: Backoff,
    current: Duration,
    polls: u64,
}

impl BackoffState {
    pub(crate) fn pause(&mut self) {
        if self.current.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.current);
        }
        self.polls += 1;
        self.current = self
            .current
            .saturating_mul(self.policy.factor)
            .min(self.policy.max);
    }

    /// Start over from the initial pause, keeping the poll count
    pub(crate) fn reset(&mut self) {
        self.current = self.policy.initial;
    }

    #[cfg(test)]
    pub(crate) fn current(&self) -> Duration {
        self.current
    }

    pub(crate) fn polls(&self) -> u64 {
        self.polls
    }
}

/// Reports a loop that has spun longer than the deadlock timeout, then keeps spinning
pub(crate) struct DeadlockWatch {
    timeout: f64,
    start: Instant,
    what: &'static str,
}

impl DeadlockWatch {
    pub(crate) fn new(timeout: f64, what: &'static str) -> DeadlockWatch {
        DeadlockWatch {
            timeout,
            start: Instant::now(),
            what,
        }
    }

    pub(crate) fn check(&mut self, my_pe: usize) {
        if self.start.elapsed().as_secs_f64() > self.timeout {
            warn!(
                "[WARNING] pe {} potential deadlock detected while {}. \
                Every pe must reach the termination protocol for it to complete. \
                The deadlock timeout can be set via the GLOBAL_DONE_DEADLOCK_TIMEOUT environment variable, the current timeout is {} seconds",
                my_pe, self.what, self.timeout
            );
            self.start = Instant::now();
        }
    }
}

/// Poll `ready` until it reports true, pausing between attempts. Returns the number of pauses.
pub(crate) fn spin_until<E, F>(
    backoff: &Backoff,
    watch: &mut DeadlockWatch,
    my_pe: usize,
    mut ready: F,
) -> Result<u64, E>
where
    F: FnMut() -> Result<bool, E>,
{
    let mut state = backoff.start();
    while !ready()? {
        state.pause();
        watch.check(my_pe);
    }
    Ok(state.polls())
}

//! Cancellable deferred actions
//!
//! A [`TimerSlot`] owns at most one spawned timer task. Arming the slot
//! replaces whatever it held; cancelling aborts the task. Each arming gets a
//! new generation number which the action receives, so code that fires
//! concurrently with a cancel can check [`TimerSlot::is_current`] under the
//! same lock that guards the slot and back off.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Counters describing a slot's history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    pub scheduled: u64,
    pub cancelled: u64,
    pub completed: u64,
}

#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
    stats: TimerStats,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once after `delay`, replacing any armed timer
    pub fn schedule_once<F, Fut>(&mut self, delay: Duration, action: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        self.stats.scheduled += 1;

        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action(generation).await;
        }));

        generation
    }

    /// Run `tick` every `period`, first one `period` from now, replacing any armed timer
    pub fn schedule_every<F>(&mut self, period: Duration, tick: F) -> u64
    where
        F: Fn(u64) + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        self.stats.scheduled += 1;

        let generation = self.generation;
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tick(generation);
            }
        }));

        generation
    }

    /// Abort the armed timer, if any. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.abort();
                self.stats.cancelled += 1;
                true
            }
            None => false,
        }
    }

    /// Disarm after a one-shot fired, without aborting the running task.
    /// Returns `false` if `generation` was cancelled or replaced meanwhile.
    pub fn complete(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.handle = None;
        self.stats.completed += 1;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Whether `generation` is the timer currently armed in this slot
    pub fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }

    pub fn stats(&self) -> TimerStats {
        self.stats
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

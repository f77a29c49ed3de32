//! Timers and clocks.
//!
//! The engine never sleeps or reads the wall clock itself. It asks a
//! [`Scheduler`] for a callback after N milliseconds and is handed the token
//! back when it fires. [`TimerQueue`] is the deterministic virtual-time
//! implementation used by the runner and by tests; [`RealtimePacer`] lets a
//! host follow that timeline at wall-clock speed.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Identifies one scheduled callback so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// What a fired timer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerToken {
    /// Movement tick.
    Tick,
    /// Next frame of the active sequence is due.
    FrameAdvance,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler has been shut down")]
    Unavailable,
    #[error("scheduler is full ({capacity} pending timers)")]
    Full { capacity: usize },
}

/// Cancellable "call me back after N ms" primitive supplied by the host.
pub trait Scheduler {
    /// Current position on the scheduler's monotonic timeline.
    fn now_ms(&self) -> u64;

    fn schedule(&mut self, delay_ms: u64, token: TimerToken) -> Result<TimerHandle, SchedulerError>;

    /// Cancelling a timer that already fired or was never issued is a no-op.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Virtual-time timer queue.
///
/// Timers fire in due-time order; ties fire in the order they were
/// scheduled. Popping a timer moves the queue's clock to its due time, so
/// callbacks observe exactly the instant they asked for.
#[derive(Debug, Clone)]
pub struct TimerQueue {
    now_ms: u64,
    next_id: u64,
    pending: BTreeMap<(u64, u64), TimerToken>,
    due_by_id: HashMap<u64, u64>,
    capacity: usize,
    closed: bool,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerQueue {
    const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            now_ms: 0,
            next_id: 0,
            pending: BTreeMap::new(),
            due_by_id: HashMap::new(),
            capacity,
            closed: false,
        }
    }

    /// Due time of the earliest pending timer.
    pub fn next_due(&self) -> Option<u64> {
        self.pending.keys().next().map(|&(due, _)| due)
    }

    /// Removes and returns the earliest timer if it is due at or before
    /// `until`, moving the clock to its due time.
    pub fn pop_due(&mut self, until: u64) -> Option<(TimerHandle, TimerToken)> {
        let (&(due, id), _) = self.pending.iter().next()?;
        if due > until {
            return None;
        }
        let token = self.pending.remove(&(due, id))?;
        self.due_by_id.remove(&id);
        self.now_ms = self.now_ms.max(due);
        Some((TimerHandle(id), token))
    }

    /// Moves the clock forward without firing anything. Never goes back.
    pub fn advance_clock(&mut self, to_ms: u64) {
        self.now_ms = self.now_ms.max(to_ms);
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.due_by_id.contains_key(&handle.0)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.due_by_id.clear();
    }

    /// Drops every timer and refuses new ones.
    pub fn shutdown(&mut self) {
        self.clear();
        self.closed = true;
    }
}

impl Scheduler for TimerQueue {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn schedule(
        &mut self,
        delay_ms: u64,
        token: TimerToken,
    ) -> Result<TimerHandle, SchedulerError> {
        if self.closed {
            return Err(SchedulerError::Unavailable);
        }
        if self.pending.len() >= self.capacity {
            return Err(SchedulerError::Full {
                capacity: self.capacity,
            });
        }
        let id = self.next_id;
        self.next_id += 1;
        let due = self.now_ms.saturating_add(delay_ms);
        self.pending.insert((due, id), token);
        self.due_by_id.insert(id, due);
        Ok(TimerHandle(id))
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(due) = self.due_by_id.remove(&handle.0) {
            self.pending.remove(&(due, handle.0));
        }
    }
}

/// Monotonic millisecond source.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    pub fn set(&self, ms: u64) {
        self.now.set(self.now.get().max(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Maps wall-clock progress onto a virtual timeline.
///
/// If the host falls behind by more than `max_lag_ms` between two polls, the
/// excess is dropped instead of being replayed in a burst.
#[derive(Debug, Clone)]
pub struct RealtimePacer<C: Clock> {
    clock: C,
    last_wall_ms: u64,
    virtual_ms: u64,
    pub max_lag_ms: u64,
}

impl<C: Clock> RealtimePacer<C> {
    pub const DEFAULT_MAX_LAG_MS: u64 = 250;

    pub fn new(clock: C, virtual_start_ms: u64) -> Self {
        let last_wall_ms = clock.now_ms();
        Self {
            clock,
            last_wall_ms,
            virtual_ms: virtual_start_ms,
            max_lag_ms: Self::DEFAULT_MAX_LAG_MS,
        }
    }

    /// Advances the virtual timeline by the wall time elapsed since the last
    /// poll and returns the new virtual time.
    pub fn poll(&mut self) -> u64 {
        let wall = self.clock.now_ms();
        let mut delta = wall.saturating_sub(self.last_wall_ms);
        self.last_wall_ms = wall;

        if delta > self.max_lag_ms {
            log::warn!(
                "Host fell {}ms behind; skipping ahead {}ms",
                delta,
                self.max_lag_ms
            );
            delta = self.max_lag_ms;
        }

        self.virtual_ms = self.virtual_ms.saturating_add(delta);
        self.virtual_ms
    }

    pub fn virtual_ms(&self) -> u64 {
        self.virtual_ms
    }

    /// Wall time to wait before the virtual timeline reaches `due_ms`.
    pub fn wait_for(&self, due_ms: u64) -> Duration {
        Duration::from_millis(due_ms.saturating_sub(self.virtual_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_fire_in_due_then_insertion_order() {
        let mut q = TimerQueue::new();
        q.schedule(100, TimerToken::Tick).unwrap();
        q.schedule(50, TimerToken::FrameAdvance).unwrap();
        q.schedule(100, TimerToken::FrameAdvance).unwrap();

        assert_eq!(q.next_due(), Some(50));
        let (_, first) = q.pop_due(1000).unwrap();
        assert_eq!(first, TimerToken::FrameAdvance);
        assert_eq!(q.now_ms(), 50);

        let (_, second) = q.pop_due(1000).unwrap();
        assert_eq!(second, TimerToken::Tick);
        let (_, third) = q.pop_due(1000).unwrap();
        assert_eq!(third, TimerToken::FrameAdvance);
        assert_eq!(q.now_ms(), 100);
        assert!(q.pop_due(1000).is_none());
    }

    #[test]
    fn pop_due_respects_limit() {
        let mut q = TimerQueue::new();
        q.schedule(125, TimerToken::Tick).unwrap();
        assert!(q.pop_due(124).is_none());
        assert_eq!(q.now_ms(), 0);
        assert!(q.pop_due(125).is_some());
    }

    #[test]
    fn delay_is_relative_to_current_time() {
        let mut q = TimerQueue::new();
        q.advance_clock(300);
        q.schedule(125, TimerToken::Tick).unwrap();
        assert_eq!(q.next_due(), Some(425));
        q.advance_clock(10);
        assert_eq!(q.now_ms(), 300);
    }

    #[test]
    fn cancel_removes_pending_and_ignores_stale() {
        let mut q = TimerQueue::new();
        let a = q.schedule(10, TimerToken::Tick).unwrap();
        let b = q.schedule(20, TimerToken::FrameAdvance).unwrap();
        q.cancel(a);
        q.cancel(a);
        assert!(!q.is_pending(a));
        assert!(q.is_pending(b));
        assert_eq!(q.pending(), 1);
        let (handle, _) = q.pop_due(100).unwrap();
        assert_eq!(handle, b);
        q.cancel(b);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn shutdown_and_capacity_fail_scheduling() {
        let mut q = TimerQueue::with_capacity(1);
        q.schedule(1, TimerToken::Tick).unwrap();
        assert_eq!(
            q.schedule(1, TimerToken::Tick),
            Err(SchedulerError::Full { capacity: 1 })
        );
        q.shutdown();
        assert_eq!(q.pending(), 0);
        assert_eq!(
            q.schedule(1, TimerToken::Tick),
            Err(SchedulerError::Unavailable)
        );
    }

    #[test]
    fn pacer_follows_wall_clock() {
        let clock = ManualClock::new(1_000);
        let mut pacer = RealtimePacer::new(clock.clone(), 0);
        clock.advance(40);
        assert_eq!(pacer.poll(), 40);
        clock.advance(85);
        assert_eq!(pacer.poll(), 125);
        assert_eq!(pacer.wait_for(250), Duration::from_millis(125));
        assert_eq!(pacer.wait_for(100), Duration::ZERO);
    }

    #[test]
    fn pacer_caps_lag() {
        let clock = ManualClock::new(0);
        let mut pacer = RealtimePacer::new(clock.clone(), 500);
        clock.advance(10_000);
        assert_eq!(pacer.poll(), 500 + RealtimePacer::<ManualClock>::DEFAULT_MAX_LAG_MS);
    }
}

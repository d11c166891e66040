// Skein Scheduler
// Clock, per-thread wait deadlines and the list of parked (paused) threads.
// Nothing here runs on its own: the host polls.

use crate::vm::{Thread, ThreadId, ThreadStatus};
use rustc_hash::FxHashMap;

/// Millisecond clock driving wait deadlines
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Clock {
    /// Wall clock time from `chrono`
    #[default]
    System,
    /// A clock that only moves when advanced, for tests and replays
    Manual(i64),
}

impl Clock {
    pub fn now_ms(&self) -> i64 {
        match self {
            Clock::System => chrono::Utc::now().timestamp_millis(),
            Clock::Manual(now) => *now,
        }
    }

    /// Move a manual clock forward; the system clock ignores this
    pub fn advance(&mut self, ms: i64) {
        if let Clock::Manual(now) = self {
            *now = now.saturating_add(ms);
        }
    }
}

/// Wait deadlines keyed by thread, written by pausing natives such as `wait`
#[derive(Debug, Clone, Default)]
pub struct TimerTable {
    deadlines: FxHashMap<ThreadId, i64>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, thread: ThreadId, deadline: i64) {
        self.deadlines.insert(thread, deadline);
    }

    pub fn deadline(&self, thread: ThreadId) -> Option<i64> {
        self.deadlines.get(&thread).copied()
    }

    pub fn clear(&mut self, thread: ThreadId) -> Option<i64> {
        self.deadlines.remove(&thread)
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Entries sorted by thread id
    pub fn entries(&self) -> Vec<(ThreadId, i64)> {
        let mut entries: Vec<(ThreadId, i64)> =
            self.deadlines.iter().map(|(id, d)| (*id, *d)).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

/// Paused threads held on behalf of the host
#[derive(Debug, Default)]
pub struct Scheduler {
    parked: Vec<Thread>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a paused thread until its deadline. Threads in any other state
    /// are handed back.
    pub fn park(&mut self, thread: Thread) -> Result<(), Thread> {
        if thread.status() != ThreadStatus::Paused {
            return Err(thread);
        }
        self.parked.push(thread);
        Ok(())
    }

    /// Threads that should be resumed at `now`; the rest stay parked
    pub fn take_due(&mut self, now: i64, timers: &TimerTable) -> Vec<Thread> {
        let (due, waiting): (Vec<Thread>, Vec<Thread>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|t| timers.deadline(t.id()).map_or(true, |d| d <= now));
        self.parked = waiting;
        due
    }

    /// Earliest deadline among parked threads. A parked thread with no
    /// deadline is due immediately.
    pub fn next_deadline(&self, timers: &TimerTable) -> Option<i64> {
        self.parked
            .iter()
            .map(|t| timers.deadline(t.id()).unwrap_or(i64::MIN))
            .min()
    }

    /// Remove a parked thread without resuming it
    pub fn remove(&mut self, id: ThreadId) -> Option<Thread> {
        let index = self.parked.iter().position(|t| t.id() == id)?;
        Some(self.parked.remove(index))
    }

    pub fn threads(&self) -> &[Thread] {
        &self.parked
    }

    pub fn len(&self) -> usize {
        self.parked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    pub(crate) fn restore(&mut self, threads: Vec<Thread>) {
        self.parked.extend(threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let mut clock = Clock::Manual(100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        let mut system = Clock::System;
        system.advance(1_000_000);
        assert_eq!(system, Clock::System);
    }

    #[test]
    fn test_timer_table() {
        let mut timers = TimerTable::new();
        timers.set(ThreadId(2), 40);
        timers.set(ThreadId(1), 90);
        assert_eq!(timers.deadline(ThreadId(2)), Some(40));
        assert_eq!(timers.entries(), vec![(ThreadId(1), 90), (ThreadId(2), 40)]);
        assert_eq!(timers.clear(ThreadId(2)), Some(40));
        assert_eq!(timers.len(), 1);
    }
}

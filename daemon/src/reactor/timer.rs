// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The timer pool: a fixed arena of one-shot and periodic timers with
//! absolute deadlines on the monotonic clock. One-shot entries are vacated
//! *before* their owner is notified, so the owner may immediately re-arm.
//! A periodic timer that runs late catches up with a single fire.

use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::ids::{SlotId, TimerId};
use crate::limits::MX_TIMER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Periodic,
}

/// Who to notify when a timer fires. The `token` is driver-chosen and
/// opaque to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerOwner {
    pub slot: SlotId,
    pub token: u32,
}

#[derive(Debug)]
struct TimerEntry {
    kind: TimerKind,
    deadline: Instant,
    interval: Duration,
    owner: TimerOwner,
}

#[derive(Debug, thiserror::Error)]
#[error("timer pool exhausted ({MX_TIMER} entries)")]
pub struct TimerPoolExhausted;

#[derive(Debug)]
pub struct TimerPool {
    entries: Vec<Option<TimerEntry>>,
}

impl Default for TimerPool {
    fn default() -> Self { Self::new() }
}

impl TimerPool {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: (0..MX_TIMER).map(|_| None).collect() }
    }

    /// Arm a timer firing `after` from now (and every `after` thereafter for
    /// periodics).
    ///
    /// # Errors
    ///
    /// Fails when all `MX_TIMER` entries are armed.
    pub fn add(
        &mut self,
        kind: TimerKind,
        after: Duration,
        owner: TimerOwner,
    ) -> Result<TimerId, TimerPoolExhausted> {
        let idx = self
            .entries
            .iter()
            .position(Option::is_none)
            .ok_or(TimerPoolExhausted)?;
        self.entries[idx] = Some(TimerEntry {
            kind,
            deadline: Instant::now() + after,
            interval: after,
            owner,
        });
        Ok(TimerId(idx))
    }

    /// Disarm. Cancelling an already-fired one-shot is a no-op.
    pub fn del(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get_mut(id.0) {
            *entry = None;
        }
    }

    /// Drop every timer owned by `slot`. Used when a slot is freed.
    pub fn del_owned_by(&mut self, slot: SlotId) {
        for entry in &mut self.entries {
            if entry.as_ref().is_some_and(|e| e.owner.slot == slot) {
                *entry = None;
            }
        }
    }

    /// Soonest armed deadline, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .flatten()
            .map(|entry| entry.deadline)
            .min()
    }

    /// Collect every timer due at `now`. One-shots are vacated here, before
    /// the caller notifies anyone; periodics advance by one interval, and a
    /// late periodic clamps to `now + interval` rather than bursting.
    pub fn pop_expired(&mut self, now: Instant) -> SmallVec<[(TimerId, TimerOwner); 8]> {
        let mut fired = SmallVec::new();
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            let Some(entry) = slot else { continue };
            if entry.deadline > now {
                continue;
            }
            fired.push((TimerId(idx), entry.owner));
            match entry.kind {
                TimerKind::OneShot => *slot = None,
                TimerKind::Periodic => {
                    entry.deadline += entry.interval;
                    if entry.deadline <= now {
                        entry.deadline = now + entry.interval;
                    }
                }
            }
        }
        fired
    }

    #[must_use]
    pub fn armed_count(&self) -> usize { self.entries.iter().flatten().count() }
}

#[cfg(test)]
mod tests_timer {
    use super::*;
    use pretty_assertions::assert_eq;

    fn owner(slot: u8, token: u32) -> TimerOwner {
        TimerOwner { slot: SlotId(slot), token }
    }

    #[test]
    fn one_shot_fires_once_and_frees_its_entry() {
        let mut pool = TimerPool::new();
        let id = pool
            .add(TimerKind::OneShot, Duration::from_millis(0), owner(1, 7))
            .unwrap();
        let fired = pool.pop_expired(Instant::now() + Duration::from_millis(1));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0], (id, owner(1, 7)));
        assert_eq!(pool.armed_count(), 0);

        // The freed entry never fires again.
        let fired = pool.pop_expired(Instant::now() + Duration::from_secs(1));
        assert!(fired.is_empty());
    }

    #[test]
    fn periodic_rearms_and_late_run_catches_up_by_one_fire() {
        let mut pool = TimerPool::new();
        pool.add(TimerKind::Periodic, Duration::from_millis(10), owner(2, 0))
            .unwrap();

        // Three intervals late: exactly one fire, then the next deadline is
        // in the future.
        let late = Instant::now() + Duration::from_millis(35);
        assert_eq!(pool.pop_expired(late).len(), 1);
        assert!(pool.next_deadline().unwrap() > late);
        assert_eq!(pool.armed_count(), 1);
    }

    #[test]
    fn cancel_disarms() {
        let mut pool = TimerPool::new();
        let id = pool
            .add(TimerKind::OneShot, Duration::from_millis(0), owner(0, 1))
            .unwrap();
        pool.del(id);
        assert!(pool.pop_expired(Instant::now() + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn pool_exhaustion_is_an_error_not_corruption() {
        let mut pool = TimerPool::new();
        for _ in 0..MX_TIMER {
            pool.add(TimerKind::OneShot, Duration::from_secs(60), owner(0, 0))
                .unwrap();
        }
        assert!(pool.add(TimerKind::OneShot, Duration::from_secs(60), owner(0, 0)).is_err());
    }

    #[test]
    fn next_deadline_is_the_soonest() {
        let mut pool = TimerPool::new();
        pool.add(TimerKind::OneShot, Duration::from_secs(60), owner(0, 0)).unwrap();
        let soon = pool.add(TimerKind::OneShot, Duration::from_millis(5), owner(0, 1)).unwrap();
        pool.add(TimerKind::Periodic, Duration::from_secs(10), owner(0, 2)).unwrap();

        let deadline = pool.next_deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(5));
        pool.del(soon);
        assert!(pool.next_deadline().unwrap() > Instant::now() + Duration::from_secs(5));
    }

    #[test]
    fn del_owned_by_sweeps_a_slots_timers() {
        let mut pool = TimerPool::new();
        pool.add(TimerKind::OneShot, Duration::from_secs(1), owner(3, 0)).unwrap();
        pool.add(TimerKind::Periodic, Duration::from_secs(1), owner(3, 1)).unwrap();
        pool.add(TimerKind::OneShot, Duration::from_secs(1), owner(4, 0)).unwrap();
        pool.del_owned_by(SlotId(3));
        assert_eq!(pool.armed_count(), 1);
    }
}

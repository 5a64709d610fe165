use super::core::PollSet;

use std::collections::BTreeMap;

/// Callback stored in the timer queue.
///
/// A timer fires at most once, so the callback is consumed when it
/// runs. The loop hands itself to the callback so that it can schedule
/// follow-up work.
pub(crate) type TimerCallback = Box<dyn FnOnce(&mut PollSet) + 'static>;

/// Ordered key of a scheduled timer.
///
/// The deadline orders entries; the insertion sequence number breaks
/// ties so that timers sharing a deadline fire in the order they were
/// scheduled. The pair also gives every entry a stable identity that
/// survives unrelated insertions and erasures, which is what a
/// [`Timeout`] handle holds on to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub(crate) struct TimerKey {
    /// Absolute deadline in monotonic milliseconds.
    pub(crate) at: i64,

    /// Insertion sequence number, unique per queue.
    pub(crate) seq: u64,
}

/// Handle to a scheduled timer.
///
/// Returned by [`PollSet::timeout_at`] and consumed by
/// [`PollSet::timeout_cancel`] and
/// [`PollSet::timeout_reschedule_at`]. A handle is *null* when it no
/// longer refers to a live entry; cancelling a null handle is a no-op.
/// Handles do not cancel on drop; a dropped handle simply lets the
/// timer fire.
#[derive(Default, Debug)]
pub struct Timeout(pub(crate) Option<TimerKey>);

impl Timeout {
    /// A handle referring to no timer.
    pub fn null() -> Timeout {
        Timeout(None)
    }

    /// Whether this handle still refers to a scheduled entry.
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

/// The engine's timer queue.
///
/// An ordered map from `(deadline, insertion seq)` to callback. All
/// access is from the loop thread.
pub(crate) struct TimerQueue {
    entries: BTreeMap<TimerKey, TimerCallback>,
    next_seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Inserts a callback to run at `at` (monotonic ms).
    pub(crate) fn schedule(&mut self, at: i64, cb: TimerCallback) -> TimerKey {
        let key = TimerKey {
            at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, cb);
        key
    }

    /// Removes the entry for `key`, if still present.
    pub(crate) fn cancel(&mut self, key: TimerKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Moves the entry for `key` to a new deadline, preserving its
    /// callback. Returns the new key, or `None` if the entry was no
    /// longer present.
    pub(crate) fn reschedule(&mut self, key: TimerKey, at: i64) -> Option<TimerKey> {
        let cb = self.entries.remove(&key)?;
        Some(self.schedule(at, cb))
    }

    /// Earliest deadline in the queue.
    pub(crate) fn next_deadline(&self) -> Option<i64> {
        self.entries.keys().next().map(|k| k.at)
    }

    /// Removes and returns the earliest entry whose deadline is at or
    /// before `now`.
    ///
    /// The entry is gone from the queue before the caller invokes it,
    /// so the callback may re-schedule freely and a panicking callback
    /// cannot fire twice.
    pub(crate) fn pop_due(&mut self, now: i64) -> Option<(TimerKey, TimerCallback)> {
        let key = *self.entries.keys().next()?;
        if key.at > now {
            return None;
        }
        let cb = self.entries.remove(&key).expect("first key vanished");
        Some((key, cb))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

use super::event::{Mode, WakeKind};
use super::inbox::{Inbox, Injector, Task};
use super::poller::platform::{sys_now_ms, sys_poll, sys_read};
use super::signal::{self, SignalCallback};
use super::timer::{TimerQueue, Timeout};

use libc::{c_int, c_short, pollfd, POLLERR, POLLHUP, POLLIN, POLLOUT, POLLNVAL};
use log::{debug, error, trace};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback registered for descriptor readiness.
///
/// Invoked on the loop thread with the engine itself, so the callback
/// can register descriptors, schedule timers or inject work.
pub(crate) type FdCallback = Box<dyn FnMut(&mut PollSet) + 'static>;

/// Readiness conditions that count as readable. Errors and hang-ups
/// are delivered to the read side so the callback can observe EOF.
const READ_EVENTS: c_short = POLLIN | POLLHUP | POLLERR;

/// Readiness conditions that count as writable.
const WRITE_EVENTS: c_short = POLLOUT | POLLHUP | POLLERR;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-descriptor registration record.
///
/// `idx` is the record's slot in the readiness-request array; the two
/// structures always agree, which the consolidation pass preserves.
struct FdState {
    idx: usize,
    rcb: Option<FdCallback>,
    wcb: Option<FdCallback>,
    roneshot: bool,
    woneshot: bool,
}

impl FdState {
    fn new(idx: usize) -> Self {
        Self {
            idx,
            rcb: None,
            wcb: None,
            roneshot: false,
            woneshot: false,
        }
    }
}

/// A single-threaded callback event loop.
///
/// A `PollSet` multiplexes descriptor readiness, timers, cross-thread
/// callback injection and OS signals onto one loop thread. Each call to
/// [`run_one`](Self::run_one) performs one blocking wait and dispatches
/// everything that became due, strictly sequentially: descriptor
/// callbacks in readiness-array order, then timers in deadline order,
/// then signal callbacks.
///
/// All methods except [`inject`](Self::inject) must be called from the
/// thread that drives the loop. Other threads submit work through an
/// [`Injector`] handle and wake the loop via the internal self-pipe,
/// which permanently occupies slot 0 of the readiness array.
///
/// ```no_run
/// # use vigilis::PollSet;
/// # use std::time::Duration;
/// let mut ps = PollSet::new().unwrap();
/// let t = ps.timeout_in(Duration::from_millis(10), |_ps| println!("due"));
/// while ps.pending() {
///     ps.run_one(None);
/// }
/// # let _ = t;
/// ```
pub struct PollSet {
    id: u64,
    inbox: Arc<Inbox>,
    /// Dense request array handed to poll(2); slot 0 is the self-pipe.
    pollfds: Vec<pollfd>,
    state: HashMap<RawFd, FdState>,
    timers: TimerQueue,
    /// Set while draining the self-pipe if a signal wake byte was seen;
    /// cleared once signal callbacks for the iteration have run.
    signal_pending: bool,
}

impl PollSet {
    /// Creates an engine with a default capacity hint.
    pub fn new() -> io::Result<PollSet> {
        Self::with_capacity(8)
    }

    /// Creates an engine sized for roughly `capacity` descriptors.
    ///
    /// Allocates the self-pipe (both ends non-blocking and
    /// close-on-exec) and reserves its permanent slot 0.
    pub fn with_capacity(capacity: usize) -> io::Result<PollSet> {
        let inbox = Inbox::new()?;
        let mut pollfds = Vec::with_capacity(capacity.max(1));
        pollfds.push(pollfd {
            fd: inbox.read_fd(),
            events: POLLIN,
            revents: 0,
        });
        Ok(PollSet {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            inbox,
            pollfds,
            state: HashMap::new(),
            timers: TimerQueue::new(),
            signal_pending: false,
        })
    }

    pub(crate) fn owner_id(&self) -> u64 {
        self.id
    }

    /// Current monotonic time in whole milliseconds, the clock that
    /// timer deadlines are expressed in.
    pub fn now_ms() -> i64 {
        sys_now_ms()
    }

    /// Registers `cb` for readiness of `fd`.
    ///
    /// `mode` selects exactly one direction, [`Mode::READ`] or
    /// [`Mode::WRITE`], optionally one-shot; registering both
    /// directions takes two calls. Re-registering a direction replaces
    /// its callback and one-shot flag. The change takes effect at or
    /// before the next wait.
    ///
    /// # Panics
    ///
    /// Panics if `mode` contains both `READ` and `WRITE`, or neither.
    pub fn fd_cb(&mut self, fd: RawFd, mode: Mode, cb: impl FnMut(&mut PollSet) + 'static) {
        if mode.contains(Mode::READ) && mode.contains(Mode::WRITE) {
            panic!("fd_cb: cannot register READ and WRITE in one call");
        }
        if !mode.intersects(Mode::READ | Mode::WRITE) {
            panic!("fd_cb: mode selects neither READ nor WRITE");
        }
        trace!("registering fd={fd} mode={mode:?}");

        let fs = match self.state.entry(fd) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                self.pollfds.push(pollfd {
                    fd,
                    events: 0,
                    revents: 0,
                });
                e.insert(FdState::new(self.pollfds.len() - 1))
            }
        };
        let pfd = &mut self.pollfds[fs.idx];
        debug_assert_eq!(pfd.fd, fd, "descriptor record out of sync with request array");

        if mode.contains(Mode::READ) {
            fs.roneshot = mode.contains(Mode::ONESHOT);
            fs.rcb = Some(Box::new(cb));
            pfd.events |= POLLIN;
        } else {
            fs.woneshot = mode.contains(Mode::ONESHOT);
            fs.wcb = Some(Box::new(cb));
            pfd.events |= POLLOUT;
        }
    }

    /// Clears the callback(s) for the direction(s) named in `mode`.
    ///
    /// Unlike registration, clearing may name both directions at once.
    /// Unknown descriptors are ignored. A record whose last direction
    /// is cleared is reclaimed by the consolidation pass before the
    /// next wait.
    pub fn fd_cb_clear(&mut self, fd: RawFd, mode: Mode) {
        let Some(fs) = self.state.get_mut(&fd) else {
            return;
        };
        trace!("clearing fd={fd} mode={mode:?}");
        let pfd = &mut self.pollfds[fs.idx];
        if mode.contains(Mode::READ) {
            pfd.events &= !POLLIN;
            fs.rcb = None;
        }
        if mode.contains(Mode::WRITE) {
            pfd.events &= !POLLOUT;
            fs.wcb = None;
        }
    }

    /// Schedules `cb` to run once `at` (monotonic ms, as returned by
    /// [`now_ms`](Self::now_ms)) has passed.
    ///
    /// Timers sharing a deadline fire in scheduling order.
    pub fn timeout_at(&mut self, at: i64, cb: impl FnOnce(&mut PollSet) + 'static) -> Timeout {
        trace!("scheduling timer at={at}");
        Timeout(Some(self.timers.schedule(at, Box::new(cb))))
    }

    /// Schedules `cb` to run after `delay` from now.
    pub fn timeout_in(
        &mut self,
        delay: Duration,
        cb: impl FnOnce(&mut PollSet) + 'static,
    ) -> Timeout {
        let at = Self::now_ms().saturating_add(delay.as_millis().min(i64::MAX as u128) as i64);
        self.timeout_at(at, cb)
    }

    /// Cancels the timer behind `t` and nulls the handle.
    ///
    /// The callback is released without running. Cancelling a null
    /// handle is a no-op; cancellation is idempotent.
    pub fn timeout_cancel(&mut self, t: &mut Timeout) {
        if let Some(key) = t.0.take() {
            self.timers.cancel(key);
        }
    }

    /// Moves the timer behind `t` to deadline `at`, preserving its
    /// callback; the handle is updated to the new entry.
    ///
    /// A null handle (or one whose timer already fired) stays null.
    pub fn timeout_reschedule_at(&mut self, t: &mut Timeout, at: i64) {
        if let Some(key) = t.0.take() {
            t.0 = self.timers.reschedule(key, at);
        }
    }

    /// Installs `cb` as this engine's callback for signal `sig`.
    ///
    /// A signal has exactly one owning engine per process; installing
    /// takes ownership away from any previous owner. The callback runs
    /// on the loop thread during [`run_one`](Self::run_one). Rapid
    /// deliveries may coalesce into a single invocation, but a
    /// delivered signal is never lost.
    ///
    /// # Errors
    ///
    /// Fails if the OS rejects the handler installation.
    ///
    /// # Panics
    ///
    /// Panics if `sig` is not a valid signal number.
    pub fn signal_cb(
        &mut self,
        sig: c_int,
        cb: impl FnMut(&mut PollSet) + Send + 'static,
    ) -> io::Result<()> {
        let cb: SignalCallback = Box::new(cb);
        signal::install(self.id, self.inbox.write_fd(), sig, cb)
    }

    /// Removes this engine's callback for `sig` and restores the
    /// default disposition.
    ///
    /// A no-op if this engine does not own the signal. An undispatched
    /// delivery is re-raised rather than dropped.
    pub fn signal_cb_clear(&mut self, sig: c_int) -> io::Result<()> {
        signal::uninstall(self.id, sig)
    }

    /// Queues `cb` to run on the loop thread, from any thread.
    ///
    /// Injected callbacks run in FIFO order no later than the next
    /// iteration. See [`injector`](Self::injector) for a handle that
    /// can be moved to other threads.
    pub fn inject(&self, cb: impl FnOnce(&mut PollSet) + Send + 'static) {
        self.inbox.push(Box::new(cb));
    }

    /// Returns a cloneable, `Send` handle for cross-thread injection.
    pub fn injector(&self) -> Injector {
        Injector {
            inbox: Arc::clone(&self.inbox),
        }
    }

    /// Whether driving the loop can still make progress: a user
    /// descriptor is registered, injected callbacks are queued, or a
    /// timer is outstanding.
    pub fn pending(&self) -> bool {
        self.pollfds.len() > 1 || self.inbox.len() > 0 || !self.timers.is_empty()
    }

    /// Runs one iteration: wait, then dispatch.
    ///
    /// `timeout` caps the blocking wait (`None` waits indefinitely);
    /// the earliest timer deadline reduces it further, and a wake from
    /// another thread or a signal ends it early. Dispatch order within
    /// the iteration is descriptors, then timers, then signals, after
    /// which the request array is consolidated.
    ///
    /// A wait interrupted by signal delivery returns without
    /// dispatching; an unrecoverable poll error aborts the process.
    pub fn run_one(&mut self, timeout: Option<Duration>) {
        let timeout_ms = self.next_timeout(timeout);
        trace!("polling: nfds={} timeout_ms={timeout_ms}", self.pollfds.len());

        let nready = match sys_poll(&mut self.pollfds, timeout_ms) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("poll interrupted by signal delivery");
                return;
            }
            Err(e) => {
                error!("poll: {e}");
                process::abort();
            }
        };

        let maxpoll = self.pollfds.len();
        let mut remaining = nready;
        for i in 0..maxpoll {
            if remaining == 0 {
                break;
            }
            let pfd = self.pollfds[i];
            if pfd.revents == 0 {
                continue;
            }
            remaining -= 1;
            debug_assert!(
                pfd.revents & POLLNVAL == 0,
                "closed descriptor {} still in the poll set",
                pfd.fd
            );
            if i == 0 {
                if pfd.revents & READ_EVENTS != 0 {
                    self.run_pending_asyncs();
                }
                continue;
            }
            if pfd.revents & READ_EVENTS != 0 {
                self.dispatch_read(pfd.fd);
            }
            if pfd.revents & WRITE_EVENTS != 0 {
                self.dispatch_write(pfd.fd);
            }
        }

        self.run_timeouts();
        self.run_signal_handlers();
        self.consolidate();
    }

    /// Effective poll timeout: the caller's cap further reduced by the
    /// earliest timer, clamped to the poll(2) argument range.
    fn next_timeout(&self, timeout: Option<Duration>) -> c_int {
        let cap = match timeout {
            None => -1i64,
            Some(d) => d.as_millis().min(c_int::MAX as u128) as i64,
        };
        let Some(at) = self.timers.next_deadline() else {
            return cap as c_int;
        };
        let now = Self::now_ms();
        if now >= at {
            return 0;
        }
        let wait = (at - now).min(c_int::MAX as i64);
        if cap >= 0 && cap <= wait {
            cap as c_int
        } else {
            wait as c_int
        }
    }

    fn dispatch_read(&mut self, fd: RawFd) {
        let (idx, oneshot) = match self.state.get(&fd) {
            Some(fs) if fs.rcb.is_some() => (fs.idx, fs.roneshot),
            _ => return,
        };
        if oneshot {
            // Deregister before invoking, so the callback observes a
            // slot it is free to reuse.
            let mut cb = self.state.get_mut(&fd).and_then(|fs| fs.rcb.take());
            self.pollfds[idx].events &= !POLLIN;
            if let Some(cb) = cb.as_mut() {
                cb(self);
            }
        } else {
            let Some(mut cb) = self.state.get_mut(&fd).and_then(|fs| fs.rcb.take()) else {
                return;
            };
            cb(self);
            // Restore unless the callback replaced or cleared itself.
            if let Some(fs) = self.state.get_mut(&fd) {
                if fs.rcb.is_none() && self.pollfds[fs.idx].events & POLLIN != 0 {
                    fs.rcb = Some(cb);
                }
            }
        }
    }

    fn dispatch_write(&mut self, fd: RawFd) {
        let (idx, oneshot) = match self.state.get(&fd) {
            Some(fs) if fs.wcb.is_some() => (fs.idx, fs.woneshot),
            _ => return,
        };
        if oneshot {
            let mut cb = self.state.get_mut(&fd).and_then(|fs| fs.wcb.take());
            self.pollfds[idx].events &= !POLLOUT;
            if let Some(cb) = cb.as_mut() {
                cb(self);
            }
        } else {
            let Some(mut cb) = self.state.get_mut(&fd).and_then(|fs| fs.wcb.take()) else {
                return;
            };
            cb(self);
            if let Some(fs) = self.state.get_mut(&fd) {
                if fs.wcb.is_none() && self.pollfds[fs.idx].events & POLLOUT != 0 {
                    fs.wcb = Some(cb);
                }
            }
        }
    }

    /// Drains the self-pipe, then runs the injected batch in FIFO
    /// order with the inbox mutex released.
    ///
    /// If a callback panics, the unprocessed tail is re-appended to
    /// the inbox (with a wake, if needed) before the panic propagates,
    /// so the remaining callbacks run on a later iteration.
    fn run_pending_asyncs(&mut self) {
        let mut buf = [0u8; 128];
        loop {
            let n = sys_read(self.inbox.read_fd(), &mut buf);
            if n <= 0 {
                break;
            }
            if !self.signal_pending && buf[..n as usize].contains(&(WakeKind::Signal as u8)) {
                self.signal_pending = true;
            }
        }

        let batch = self.inbox.take();
        if batch.is_empty() {
            return;
        }
        let mut batch = ReinjectTail {
            inbox: Arc::clone(&self.inbox),
            rest: batch,
        };
        while let Some(task) = batch.rest.pop_front() {
            task(self);
        }
    }

    /// Fires every timer due at the start of this step, earliest
    /// first. Entries leave the queue before their callback runs.
    fn run_timeouts(&mut self) {
        let now = Self::now_ms();
        while let Some((_, cb)) = self.timers.pop_due(now) {
            cb(self);
        }
    }

    fn run_signal_handlers(&mut self) {
        if !self.signal_pending {
            return;
        }
        signal::run_pending(self);
        self.signal_pending = false;
    }

    /// Compacts the request array: trailing interest-free slots are
    /// popped, then a single tail-to-head pass swaps each remaining
    /// interest-free slot with the current tail, keeping every record's
    /// index equal to its position. Slot 0 is never compacted.
    fn consolidate(&mut self) {
        while self.pollfds.len() > 1 && self.pollfds.last().map_or(false, |p| p.events == 0) {
            let dead = self.pollfds.pop().expect("checked non-empty");
            self.state.remove(&dead.fd);
        }

        if self.pollfds.len() < 2 {
            return;
        }
        let mut i = self.pollfds.len() - 2;
        while i >= 1 {
            if self.pollfds[i].events == 0 {
                let dead = self.pollfds[i].fd;
                self.state.remove(&dead);
                // The tail is live: trailing dead slots were popped
                // above and every slot behind us has been visited.
                let last = self.pollfds.pop().expect("len >= 2");
                self.pollfds[i] = last;
                self.state
                    .get_mut(&last.fd)
                    .expect("live slot without record")
                    .idx = i;
            }
            i -= 1;
        }
    }
}

impl Drop for PollSet {
    fn drop(&mut self) {
        // Handlers must stop targeting our self-pipe before the inbox
        // (and with it the pipe) can go away.
        signal::uninstall_all(self.id);
    }
}

/// Drop guard carrying the not-yet-run part of an injected batch back
/// to the inbox if the batch unwinds early.
struct ReinjectTail {
    inbox: Arc<Inbox>,
    rest: VecDeque<Task>,
}

impl Drop for ReinjectTail {
    fn drop(&mut self) {
        if !self.rest.is_empty() {
            self.inbox.push_all(mem::take(&mut self.rest));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::poller::platform::{sys_pipe, sys_really_close, sys_write};
    use super::*;

    fn fds_of(ps: &PollSet) -> Vec<RawFd> {
        ps.pollfds.iter().map(|p| p.fd).collect()
    }

    fn assert_dense(ps: &PollSet) {
        assert_eq!(
            ps.pollfds[0].fd,
            ps.inbox.read_fd(),
            "slot 0 must stay the self-pipe"
        );
        for (i, pfd) in ps.pollfds.iter().enumerate().skip(1) {
            assert_ne!(pfd.events, 0, "interest-free slot {i} survived consolidation");
            let fs = ps.state.get(&pfd.fd).expect("slot without record");
            assert_eq!(fs.idx, i, "record index disagrees with slot position");
        }
        for (fd, fs) in &ps.state {
            assert_eq!(ps.pollfds[fs.idx].fd, *fd);
        }
    }

    #[test]
    fn consolidation_keeps_array_dense() {
        let mut ps = PollSet::new().expect("failed to create pollset");
        let mut pipes = Vec::new();
        for _ in 0..5 {
            let (r, w) = sys_pipe().expect("failed to create pipe");
            ps.fd_cb(r, Mode::READ, |_| {});
            pipes.push((r, w));
        }
        assert_eq!(ps.pollfds.len(), 6);

        // Punch holes in the middle and at the tail.
        ps.fd_cb_clear(pipes[1].0, Mode::READ);
        ps.fd_cb_clear(pipes[4].0, Mode::READ);
        ps.run_one(Some(Duration::ZERO));
        assert_eq!(ps.pollfds.len(), 4);
        assert_dense(&ps);
        assert!(!fds_of(&ps).contains(&pipes[1].0));
        assert!(!fds_of(&ps).contains(&pipes[4].0));

        // Clearing everything leaves only the self-pipe.
        for (r, _) in &pipes {
            ps.fd_cb_clear(*r, Mode::READ);
        }
        ps.run_one(Some(Duration::ZERO));
        assert_eq!(ps.pollfds.len(), 1);
        assert!(ps.state.is_empty());
        assert!(!ps.pending());

        for (r, w) in pipes {
            sys_really_close(r);
            sys_really_close(w);
        }
    }

    #[test]
    fn clearing_one_direction_keeps_the_record() {
        let mut ps = PollSet::new().expect("failed to create pollset");
        let (r, w) = sys_pipe().expect("failed to create pipe");
        ps.fd_cb(w, Mode::WRITE, |_| {});
        ps.fd_cb(w, Mode::READ, |_| {});
        ps.fd_cb_clear(w, Mode::READ);
        ps.run_one(Some(Duration::ZERO));
        assert!(ps.state.contains_key(&w), "write interest must keep the record");
        assert_dense(&ps);

        ps.fd_cb_clear(w, Mode::READ | Mode::WRITE);
        ps.run_one(Some(Duration::ZERO));
        assert!(!ps.state.contains_key(&w));

        sys_really_close(r);
        sys_really_close(w);
    }

    #[test]
    fn oneshot_read_clears_interest_before_invoking() {
        let mut ps = PollSet::new().expect("failed to create pollset");
        let (r, w) = sys_pipe().expect("failed to create pipe");
        ps.fd_cb(r, Mode::READ_ONESHOT, |_| {});
        sys_write(w, b"x");
        ps.run_one(Some(Duration::from_millis(100)));
        assert!(
            !ps.state.contains_key(&r),
            "one-shot record must be reclaimed after firing"
        );
        assert_eq!(ps.pollfds.len(), 1);

        sys_really_close(r);
        sys_really_close(w);
    }

    #[test]
    #[should_panic(expected = "READ and WRITE")]
    fn registering_both_directions_panics() {
        let mut ps = PollSet::new().expect("failed to create pollset");
        ps.fd_cb(0, Mode::READ | Mode::WRITE, |_| {});
    }
}

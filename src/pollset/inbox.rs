use super::core::PollSet;
use super::event::WakeKind;
use super::poller::platform::{
    sys_pipe, sys_really_close, sys_set_cloexec, sys_set_nonblocking, sys_write,
};

use std::collections::VecDeque;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A callback injected for execution on the loop thread.
pub(crate) type Task = Box<dyn FnOnce(&mut PollSet) + Send + 'static>;

struct State {
    tasks: Vec<Task>,
    /// True while a wake byte for this inbox is in flight in the
    /// self-pipe. Guarantees at most one byte per false-to-true
    /// transition.
    wake_pending: bool,
}

/// Thread-safe queue of callbacks bound for the loop thread, plus the
/// self-pipe used to interrupt the blocking wait.
///
/// The inbox owns both pipe ends. The engine holds one `Arc` and polls
/// the read end as slot 0 of its readiness array; [`Injector`] handles
/// hold further `Arc`s, so a straggler injector can never write into a
/// recycled descriptor after the engine is gone.
pub(crate) struct Inbox {
    state: Mutex<State>,
    /// Queue length mirror, readable without the mutex.
    len: AtomicUsize,
    read_fd: RawFd,
    write_fd: RawFd,
}

impl Inbox {
    /// Allocates the self-pipe and an empty queue.
    ///
    /// Both pipe ends are made non-blocking and close-on-exec.
    pub(crate) fn new() -> io::Result<Arc<Inbox>> {
        let (read_fd, write_fd) = sys_pipe()?;
        let inbox = Arc::new(Inbox {
            state: Mutex::new(State {
                tasks: Vec::new(),
                wake_pending: false,
            }),
            len: AtomicUsize::new(0),
            read_fd,
            write_fd,
        });
        sys_set_cloexec(read_fd)?;
        sys_set_cloexec(write_fd)?;
        sys_set_nonblocking(read_fd)?;
        sys_set_nonblocking(write_fd)?;
        Ok(inbox)
    }

    /// Read end of the self-pipe; slot 0 of the readiness array.
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read_fd
    }

    /// Write end of the self-pipe; the wake target handed to the
    /// process-wide signal table.
    pub(crate) fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Number of queued tasks.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Appends one task, waking the loop if no wake is in flight.
    pub(crate) fn push(&self, task: Task) {
        let mut st = self.state.lock().expect("inbox mutex poisoned");
        st.tasks.push(task);
        self.len.store(st.tasks.len(), Ordering::Relaxed);
        if !st.wake_pending {
            st.wake_pending = true;
            self.wake(WakeKind::Inject);
        }
    }

    /// Re-appends the unprocessed tail of a batch, in order.
    pub(crate) fn push_all(&self, tasks: impl IntoIterator<Item = Task>) {
        let mut st = self.state.lock().expect("inbox mutex poisoned");
        st.tasks.extend(tasks);
        self.len.store(st.tasks.len(), Ordering::Relaxed);
        if !st.tasks.is_empty() && !st.wake_pending {
            st.wake_pending = true;
            self.wake(WakeKind::Inject);
        }
    }

    /// Swaps out the queued batch and clears the wake flag.
    ///
    /// Called on the loop thread after the self-pipe has been drained;
    /// the batch runs with the mutex released.
    pub(crate) fn take(&self) -> VecDeque<Task> {
        let mut st = self.state.lock().expect("inbox mutex poisoned");
        st.wake_pending = false;
        self.len.store(0, Ordering::Relaxed);
        mem::take(&mut st.tasks).into()
    }

    /// Writes one wake byte to the self-pipe.
    ///
    /// The result is deliberately ignored: the pipe being full already
    /// guarantees a pending wake.
    pub(crate) fn wake(&self, kind: WakeKind) {
        sys_write(self.write_fd, &[kind as u8]);
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        sys_really_close(self.read_fd);
        sys_really_close(self.write_fd);
    }
}

/// Cloneable, `Send` handle for injecting callbacks from other threads.
///
/// Obtained from [`PollSet::injector`]. Injection appends the callback
/// to the engine's inbox and wakes the loop; callbacks run on the loop
/// thread in FIFO order, no later than the next iteration.
///
/// ```no_run
/// # use vigilis::PollSet;
/// let mut ps = PollSet::new().unwrap();
/// let injector = ps.injector();
/// std::thread::spawn(move || {
///     injector.inject(|_ps| println!("ran on the loop thread"));
/// });
/// ps.run_one(None);
/// ```
#[derive(Clone)]
pub struct Injector {
    pub(crate) inbox: Arc<Inbox>,
}

impl Injector {
    /// Queues `cb` for execution on the loop thread.
    pub fn inject(&self, cb: impl FnOnce(&mut PollSet) + Send + 'static) {
        self.inbox.push(Box::new(cb));
    }
}

//! Process-wide signal routing.
//!
//! The OS signal handler carries no user data, so ownership of each
//! signal number lives in module-level state shared by every
//! [`PollSet`](super::core::PollSet) in the process:
//!
//! - a per-signal flag and wake-descriptor, both atomics, which are the
//!   only state the async handler touches;
//! - a mutex-guarded table mapping signal number to owner and callback.
//!
//! The table is valid for the process lifetime; nothing here relies on
//! destructor ordering for teardown.

use super::core::PollSet;
use super::event::WakeKind;
use super::poller::platform::{
    sys_raise, sys_signal_default, sys_signal_handler, sys_write,
};

use libc::c_int;
use log::{error, trace};
use std::collections::BTreeMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{fence, AtomicI32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

/// Callback installed for a signal.
///
/// Stored in the process-wide table, so it must be `Send`.
pub(crate) type SignalCallback = Box<dyn FnMut(&mut PollSet) + Send + 'static>;

/// Highest signal number (exclusive) the router accepts.
pub(crate) const NUM_SIG: c_int = 64;

/// Flag values; `sig_atomic_t` semantics via `AtomicU8`.
const IDLE: u8 = 0;
/// The handler has started and may be about to write to the owner's
/// wake descriptor. Deregistration must not proceed past this.
const WAKE_IN_PROGRESS: u8 = 1;
const WAKE_DELIVERED: u8 = 2;

static FLAGS: [AtomicU8; NUM_SIG as usize] = [const { AtomicU8::new(IDLE) }; NUM_SIG as usize];

/// Per-signal wake descriptor: the owning engine's self-pipe write end,
/// or -1 when the signal is unowned. Read from signal context.
static WAKE_FDS: [AtomicI32; NUM_SIG as usize] =
    [const { AtomicI32::new(-1) }; NUM_SIG as usize];

struct Slot {
    /// Identity of the owning engine.
    owner: u64,
    /// `None` only transiently, while the loop thread has the callback
    /// out of the table for invocation.
    cb: Option<SignalCallback>,
}

static TABLE: Mutex<BTreeMap<c_int, Slot>> = Mutex::new(BTreeMap::new());

fn lock_table() -> MutexGuard<'static, BTreeMap<c_int, Slot>> {
    TABLE.lock().expect("signal table mutex poisoned")
}

/// The handler installed for every routed signal.
///
/// Async-signal-safe: atomic loads and stores, fences, and one
/// non-blocking `write(2)`. The flag protocol keeps the owner alive for
/// the duration: the flag holds `WAKE_IN_PROGRESS` while the wake
/// descriptor may still be dereferenced, and deregistration spins on
/// that value before closing anything.
extern "C" fn signal_handler(sig: c_int) {
    if sig <= 0 || sig >= NUM_SIG {
        return;
    }
    let flag = &FLAGS[sig as usize];
    if flag.load(Ordering::SeqCst) != IDLE {
        // Coalesce: a wake for this signal is already on its way.
        return;
    }
    flag.store(WAKE_IN_PROGRESS, Ordering::SeqCst);
    fence(Ordering::SeqCst);
    let fd = WAKE_FDS[sig as usize].load(Ordering::SeqCst);
    if fd >= 0 {
        sys_write(fd, &[WakeKind::Signal as u8]);
    }
    fence(Ordering::SeqCst);
    flag.store(WAKE_DELIVERED, Ordering::SeqCst);
}

fn check_sig(sig: c_int) {
    if sig <= 0 || sig >= NUM_SIG {
        panic!("signal number {sig} out of range 1..{NUM_SIG}");
    }
}

/// Installs `cb` for `sig` on behalf of the engine identified by
/// `owner` with self-pipe write end `wake_fd`.
///
/// Takes ownership of the signal away from any previous owner. The OS
/// handler is installed only on first ownership; transfers just retarget
/// the wake descriptor. If a delivery raced the install, a wake is
/// issued so the new owner dispatches it.
pub(crate) fn install(owner: u64, wake_fd: RawFd, sig: c_int, cb: SignalCallback) -> io::Result<()> {
    check_sig(sig);
    let mut table = lock_table();
    match table.get_mut(&sig) {
        Some(slot) if slot.owner == owner => {
            slot.cb = Some(cb);
        }
        Some(slot) => {
            trace!("signal {sig}: ownership transfer");
            slot.owner = owner;
            slot.cb = Some(cb);
            WAKE_FDS[sig as usize].store(wake_fd, Ordering::SeqCst);
        }
        None => {
            trace!("signal {sig}: installing handler");
            WAKE_FDS[sig as usize].store(wake_fd, Ordering::SeqCst);
            if let Err(e) = sys_signal_handler(sig, signal_handler) {
                WAKE_FDS[sig as usize].store(-1, Ordering::SeqCst);
                return Err(e);
            }
            table.insert(sig, Slot {
                owner,
                cb: Some(cb),
            });
        }
    }
    if FLAGS[sig as usize].load(Ordering::SeqCst) != IDLE {
        sys_write(wake_fd, &[WakeKind::Signal as u8]);
    }
    Ok(())
}

/// Removes the callback for `sig` if `owner` holds it; no-op otherwise.
/// Assumes the table lock is already held.
///
/// Restores the default disposition, clears the wake descriptor, and
/// only then spins out any handler still in flight, so a handler that
/// read the descriptor before the clear has finished its write before
/// we return. An undispatched delivery is re-raised so the default
/// disposition (or a next owner) still sees it.
fn uninstall_locked(table: &mut BTreeMap<c_int, Slot>, owner: u64, sig: c_int) -> io::Result<()> {
    match table.get(&sig) {
        Some(slot) if slot.owner == owner => {}
        _ => return Ok(()),
    }

    sys_signal_default(sig)?;
    WAKE_FDS[sig as usize].store(-1, Ordering::SeqCst);
    fence(Ordering::SeqCst);
    table.remove(&sig);

    let flag = &FLAGS[sig as usize];
    while flag.load(Ordering::SeqCst) == WAKE_IN_PROGRESS {
        thread::yield_now();
    }
    if flag.load(Ordering::SeqCst) != IDLE {
        flag.store(IDLE, Ordering::SeqCst);
        sys_raise(sig);
    }
    Ok(())
}

/// Removes the callback for `sig` if `owner` holds it; no-op otherwise.
pub(crate) fn uninstall(owner: u64, sig: c_int) -> io::Result<()> {
    check_sig(sig);
    let mut table = lock_table();
    uninstall_locked(&mut table, owner, sig)
}

/// Releases every signal owned by `owner`; used at engine teardown.
///
/// The whole sweep runs inside one critical section, so no other
/// thread can claim or reconfigure any of the engine's signals while
/// its teardown is in progress.
pub(crate) fn uninstall_all(owner: u64) {
    let mut table = lock_table();
    let owned: Vec<c_int> = table
        .iter()
        .filter(|(_, slot)| slot.owner == owner)
        .map(|(&sig, _)| sig)
        .collect();
    for sig in owned {
        if let Err(e) = uninstall_locked(&mut table, owner, sig) {
            error!("uninstalling signal {sig}: {e}");
        }
    }
}

/// Loop-thread dispatch of delivered signals for `owner`.
///
/// Collects the owned signals whose flag is set, then runs each
/// callback with the table unlocked, re-checking ownership at every
/// step: a callback (or another thread) may steal, replace or remove
/// any entry while the lock is down.
pub(crate) fn run_pending(ps: &mut PollSet) {
    let owner = ps.owner_id();
    let pending: Vec<c_int> = {
        let table = lock_table();
        table
            .iter()
            .filter(|(&sig, slot)| {
                slot.owner == owner && FLAGS[sig as usize].load(Ordering::SeqCst) != IDLE
            })
            .map(|(&sig, _)| sig)
            .collect()
    };

    for sig in pending {
        let cb = {
            let mut table = lock_table();
            let Some(slot) = table.get_mut(&sig) else {
                continue;
            };
            if slot.owner != owner {
                continue;
            }
            let flag = &FLAGS[sig as usize];
            while flag.load(Ordering::SeqCst) == WAKE_IN_PROGRESS {
                thread::yield_now();
            }
            flag.store(IDLE, Ordering::SeqCst);
            match slot.cb.take() {
                Some(cb) => cb,
                None => continue,
            }
        };

        // Restore on every exit path, including a panicking callback;
        // the callback stays installed unless explicitly removed.
        let mut restore = Restore {
            owner,
            sig,
            cb: Some(cb),
        };
        (restore.cb.as_mut().expect("callback taken"))(ps);
    }
}

struct Restore {
    owner: u64,
    sig: c_int,
    cb: Option<SignalCallback>,
}

impl Drop for Restore {
    fn drop(&mut self) {
        let Some(cb) = self.cb.take() else { return };
        let mut table = lock_table();
        if let Some(slot) = table.get_mut(&self.sig) {
            // Put the callback back unless the signal changed hands or
            // the callback re-installed itself meanwhile.
            if slot.owner == self.owner && slot.cb.is_none() {
                slot.cb = Some(cb);
            }
        }
    }
}

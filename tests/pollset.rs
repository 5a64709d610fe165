use std::cell::Cell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vigilis::{Mode, PollSet};

#[test]
fn injected_callback_wakes_a_blocking_wait() {
    let mut ps = PollSet::new().expect("failed to create pollset");

    let slot = Arc::new(Mutex::new(String::new()));
    let shared = Arc::clone(&slot);
    ps.inject(move |_| shared.lock().unwrap().push_str("ok"));

    let start = Instant::now();
    ps.run_one(Some(Duration::from_millis(1000)));

    assert_eq!(slot.lock().unwrap().as_str(), "ok");
    assert!(
        start.elapsed() < Duration::from_millis(250),
        "the wake should end the wait long before the 1s timeout"
    );
}

#[test]
fn one_shot_read_fires_exactly_once() {
    let mut ps = PollSet::new().expect("failed to create pollset");

    let (mut writer, reader) = UnixStream::pair().expect("failed to create socket pair");
    reader
        .set_nonblocking(true)
        .expect("failed to set non-blocking");

    let fired = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&fired);
    ps.fd_cb(reader.as_raw_fd(), Mode::READ_ONESHOT, move |_| {
        counter.set(counter.get() + 1);
    });

    writer.write_all(&[1]).expect("failed to write wake byte");
    ps.run_one(Some(Duration::from_millis(1000)));
    assert_eq!(fired.get(), 1, "one-shot callback should fire once");

    // The byte is still unread, but the registration is gone.
    ps.run_one(Some(Duration::from_millis(50)));
    assert_eq!(fired.get(), 1, "one-shot callback must not fire again");
}

#[test]
fn persistent_read_fires_until_cleared() {
    let mut ps = PollSet::new().expect("failed to create pollset");

    let (mut writer, reader) = UnixStream::pair().expect("failed to create socket pair");
    reader
        .set_nonblocking(true)
        .expect("failed to set non-blocking");
    let fd = reader.as_raw_fd();

    let fired = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&fired);
    ps.fd_cb(fd, Mode::READ, move |_| {
        counter.set(counter.get() + 1);
    });

    writer.write_all(&[1]).expect("write");
    ps.run_one(Some(Duration::from_millis(1000)));
    ps.run_one(Some(Duration::from_millis(1000)));
    assert_eq!(fired.get(), 2, "unread data keeps a persistent callback firing");

    ps.fd_cb_clear(fd, Mode::READ);
    ps.run_one(Some(Duration::from_millis(50)));
    assert_eq!(fired.get(), 2, "cleared callback must not fire");
}

#[test]
fn write_readiness_dispatches_after_read() {
    let mut ps = PollSet::new().expect("failed to create pollset");

    let (mut writer, reader) = UnixStream::pair().expect("failed to create socket pair");
    reader
        .set_nonblocking(true)
        .expect("failed to set non-blocking");
    let fd = reader.as_raw_fd();

    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    let read_order = Rc::clone(&order);
    let write_order = Rc::clone(&order);

    ps.fd_cb(fd, Mode::READ_ONESHOT, move |_| read_order.borrow_mut().push("read"));
    ps.fd_cb(fd, Mode::WRITE_ONESHOT, move |_| write_order.borrow_mut().push("write"));

    writer.write_all(&[1]).expect("write");
    ps.run_one(Some(Duration::from_millis(1000)));

    assert_eq!(
        order.borrow().as_slice(),
        &["read", "write"],
        "read dispatches before write for the same descriptor"
    );
}

#[test]
fn callbacks_can_register_more_work() {
    let mut ps = PollSet::new().expect("failed to create pollset");

    let (mut writer, reader) = UnixStream::pair().expect("failed to create socket pair");
    reader
        .set_nonblocking(true)
        .expect("failed to set non-blocking");
    let fd = reader.as_raw_fd();

    let done = Rc::new(Cell::new(false));
    let flag = Rc::clone(&done);
    ps.fd_cb(fd, Mode::READ_ONESHOT, move |ps| {
        // Chain a timer from inside a descriptor callback.
        let flag = Rc::clone(&flag);
        ps.timeout_in(Duration::from_millis(5), move |_| flag.set(true));
    });

    writer.write_all(&[1]).expect("write");
    while ps.pending() {
        ps.run_one(Some(Duration::from_millis(1000)));
    }
    assert!(done.get(), "timer scheduled by a callback should have fired");
}

#[test]
fn pending_tracks_registrations_and_queues() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    assert!(!ps.pending(), "a fresh pollset has nothing to drive");

    let (_writer, reader) = UnixStream::pair().expect("failed to create socket pair");
    let fd = reader.as_raw_fd();
    ps.fd_cb(fd, Mode::READ, |_| {});
    assert!(ps.pending());

    ps.fd_cb_clear(fd, Mode::READ);
    ps.run_one(Some(Duration::ZERO));
    assert!(!ps.pending(), "clearing the only descriptor empties the set");

    let mut t = ps.timeout_in(Duration::from_millis(10_000), |_| {});
    assert!(ps.pending());
    ps.timeout_cancel(&mut t);
    assert!(!ps.pending());
}

#[test]
fn clearing_an_unknown_descriptor_is_a_noop() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    ps.fd_cb_clear(12345, Mode::READ | Mode::WRITE);
    ps.run_one(Some(Duration::ZERO));
    assert!(!ps.pending());
}

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use vigilis::{PollSet, Timeout};

fn drive_until_idle(ps: &mut PollSet) {
    while ps.pending() {
        ps.run_one(None);
    }
}

#[test]
fn timers_fire_in_deadline_order() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let order = Rc::new(RefCell::new(Vec::new()));
    let now = PollSet::now_ms();

    for delay in [10i64, 20, 15] {
        let order = Rc::clone(&order);
        ps.timeout_at(now + delay, move |_| order.borrow_mut().push(delay));
    }

    drive_until_idle(&mut ps);
    assert_eq!(order.borrow().as_slice(), &[10, 15, 20]);
}

#[test]
fn equal_deadlines_fire_in_scheduling_order() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let order = Rc::new(RefCell::new(Vec::new()));
    let at = PollSet::now_ms() + 20;

    for id in 0..4 {
        let order = Rc::clone(&order);
        ps.timeout_at(at, move |_| order.borrow_mut().push(id));
    }

    drive_until_idle(&mut ps);
    assert_eq!(order.borrow().as_slice(), &[0, 1, 2, 3]);
}

#[test]
fn cancelled_timer_never_fires() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let fired = Rc::new(RefCell::new(false));

    let flag = Rc::clone(&fired);
    let mut t = ps.timeout_in(Duration::from_millis(30), move |_| *flag.borrow_mut() = true);
    assert!(!t.is_null());

    ps.timeout_cancel(&mut t);
    assert!(t.is_null(), "cancellation must null the handle");

    // Wait past the original deadline to prove the callback is gone.
    let deadline = Instant::now() + Duration::from_millis(80);
    while Instant::now() < deadline {
        ps.run_one(Some(Duration::from_millis(10)));
    }
    assert!(!*fired.borrow(), "a cancelled timer must not fire");
}

#[test]
fn cancelling_a_null_handle_is_a_noop() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let mut t = Timeout::null();
    ps.timeout_cancel(&mut t);
    ps.timeout_cancel(&mut t);
    assert!(t.is_null());
}

#[test]
fn reschedule_moves_the_deadline_and_keeps_the_callback() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let fired_at = Rc::new(RefCell::new(None));

    let slot = Rc::clone(&fired_at);
    let start = Instant::now();
    let mut t = ps.timeout_in(Duration::from_millis(1000), move |_| {
        *slot.borrow_mut() = Some(start.elapsed());
    });

    // Pull the far deadline in close; the original callback must ride
    // along to the new entry.
    ps.timeout_reschedule_at(&mut t, PollSet::now_ms() + 50);
    assert!(!t.is_null());

    drive_until_idle(&mut ps);
    let elapsed = fired_at
        .borrow()
        .expect("rescheduled timer should have fired");
    assert!(
        elapsed >= Duration::from_millis(45),
        "fired too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_millis(500),
        "fired near the original deadline: {elapsed:?}"
    );
}

#[test]
fn timer_callback_may_reschedule_freely() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let count = Rc::new(RefCell::new(0u32));

    fn tick(ps: &mut PollSet, count: Rc<RefCell<u32>>) {
        *count.borrow_mut() += 1;
        if *count.borrow() < 3 {
            ps.timeout_in(Duration::from_millis(5), move |ps| tick(ps, count));
        }
    }

    let counter = Rc::clone(&count);
    ps.timeout_in(Duration::from_millis(5), move |ps| tick(ps, counter));

    drive_until_idle(&mut ps);
    assert_eq!(*count.borrow(), 3, "the chain should re-arm itself twice");
}

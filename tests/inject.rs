use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use vigilis::PollSet;

#[test]
fn injected_callbacks_run_in_fifo_order() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..16 {
        let order = Arc::clone(&order);
        ps.inject(move |_| order.lock().unwrap().push(i));
    }

    ps.run_one(Some(Duration::from_millis(1000)));
    assert_eq!(order.lock().unwrap().as_slice(), &(0..16).collect::<Vec<_>>()[..]);
}

#[test]
fn injection_under_load_preserves_per_thread_order() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 1000;

    let mut ps = PollSet::new().expect("failed to create pollset");
    let log: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|tid| {
            let injector = ps.injector();
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    let log = Arc::clone(&log);
                    injector.inject(move |_| log.lock().unwrap().push((tid, seq)));
                }
            })
        })
        .collect();

    while log.lock().unwrap().len() < (THREADS * PER_THREAD) as usize {
        ps.run_one(Some(Duration::from_millis(100)));
    }
    for handle in handles {
        handle.join().expect("injector thread panicked");
    }

    let log = log.lock().unwrap();
    assert_eq!(log.len(), (THREADS * PER_THREAD) as usize);

    let mut next_seq = [0u64; THREADS as usize];
    for &(tid, seq) in log.iter() {
        assert_eq!(
            seq, next_seq[tid as usize],
            "entries of thread {tid} arrived out of order"
        );
        next_seq[tid as usize] = seq + 1;
    }
}

#[test]
fn injector_outliving_the_engine_is_harmless() {
    let injector = {
        let ps = PollSet::new().expect("failed to create pollset");
        ps.injector()
    };
    // The engine is gone; the injection goes nowhere but must not
    // crash or touch recycled descriptors.
    injector.inject(|_| panic!("never runs"));
}

#[test]
fn a_panicking_callback_does_not_lose_the_rest_of_the_batch() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let log = Arc::new(Mutex::new(Vec::new()));

    let first = Arc::clone(&log);
    ps.inject(move |_| first.lock().unwrap().push(1));
    ps.inject(|_| panic!("callback failure mid-batch"));
    let third = Arc::clone(&log);
    ps.inject(move |_| third.lock().unwrap().push(3));

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        ps.run_one(Some(Duration::from_millis(1000)));
    }));
    assert!(outcome.is_err(), "the panic must propagate out of run_one");
    assert_eq!(log.lock().unwrap().as_slice(), &[1]);

    // The tail was re-injected with a wake; the next iteration runs it.
    ps.run_one(Some(Duration::from_millis(1000)));
    assert_eq!(log.lock().unwrap().as_slice(), &[1, 3]);
}

#[test]
fn a_wake_is_observed_no_later_than_the_next_iteration() {
    let mut ps = PollSet::new().expect("failed to create pollset");
    let hit = Arc::new(Mutex::new(0u32));

    let injector = ps.injector();
    let hit2 = Arc::clone(&hit);
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        injector.inject(move |_| *hit2.lock().unwrap() += 1);
    });

    // The loop is already parked in the wait when the wake arrives.
    ps.run_one(Some(Duration::from_millis(2000)));
    assert_eq!(*hit.lock().unwrap(), 1);
    handle.join().expect("injector thread panicked");
}

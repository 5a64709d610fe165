use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vigilis::PollSet;

fn main() -> std::io::Result<()> {
    let mut ps = PollSet::new()?;
    let done = Arc::new(AtomicBool::new(false));

    let injector = ps.injector();
    let finished = Arc::clone(&done);
    let worker = thread::spawn(move || {
        for i in 0..4 {
            injector.inject(move |_| println!("callback {i} running on the loop thread"));
            thread::sleep(Duration::from_millis(50));
        }
        // FIFO order makes this the last callback to run.
        injector.inject(move |_| finished.store(true, Ordering::SeqCst));
    });

    while !done.load(Ordering::SeqCst) {
        ps.run_one(None);
    }
    worker.join().expect("worker thread panicked");
    Ok(())
}

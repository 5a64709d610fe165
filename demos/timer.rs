use std::time::Duration;

use vigilis::PollSet;

fn main() -> std::io::Result<()> {
    let mut ps = PollSet::new()?;

    let start = PollSet::now_ms();
    ps.timeout_in(Duration::from_millis(100), move |ps| {
        println!("tick after {} ms", PollSet::now_ms() - start);
        ps.timeout_in(Duration::from_millis(100), move |_| {
            println!("tock after {} ms", PollSet::now_ms() - start);
        });
    });

    // A timer scheduled and cancelled before its deadline never runs.
    let mut doomed = ps.timeout_in(Duration::from_millis(50), |_| {
        println!("this line is never printed");
    });
    ps.timeout_cancel(&mut doomed);

    while ps.pending() {
        ps.run_one(None);
    }
    Ok(())
}

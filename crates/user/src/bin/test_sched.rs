// preemptive scheduling: three CPU-bound children never yield, yet
// the parent keeps seeing the tick counter advance and all children
// finish.
#![no_std]

use ulib::{ExitCode, println, sys};

const SPINNERS: usize = 3;

fn main() -> ExitCode {
    match run() {
        Ok(()) => {
            println!("test_sched: PASS");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_sched: FAIL {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn spin() -> ! {
    let start = sys::uptime().unwrap_or(0);
    let mut x = 0u64;
    // burn CPU without any system call in the inner loop; only the
    // timer interrupt can preempt this.
    loop {
        for _ in 0..5_000_000u64 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
        }
        let now = sys::uptime().unwrap_or(0);
        if now - start > 20 {
            core::hint::black_box(x);
            sys::exit(0)
        }
    }
}

fn run() -> Result<(), &'static str> {
    let mut pids = [0usize; SPINNERS];
    for slot in pids.iter_mut() {
        match sys::fork() {
            Ok(0) => spin(),
            Ok(pid) => *slot = pid,
            Err(_) => return Err("fork"),
        }
    }

    // the parent prints its pid once per tick for a while; ticks
    // must keep arriving even though the spinners never yield.
    let pid = sys::getpid().or(Err("getpid"))?;
    let mut last = sys::uptime().or(Err("uptime"))?;
    let mut seen = 0;
    while seen < 10 {
        let now = sys::uptime().or(Err("uptime"))?;
        if now != last {
            println!("test_sched: pid {} at tick {}", pid, now);
            last = now;
            seen += 1;
        }
    }

    for _ in 0..SPINNERS {
        let mut status: i32 = 0;
        if sys::wait(&mut status).is_err() || status != 0 {
            return Err("spinner did not finish cleanly");
        }
    }
    Ok(())
}

// init: the parent of everything. Ensures the console device
// exists, then keeps a shell running and reaps orphans.
#![no_std]

use ulib::{
    eprintln,
    fs::OpenOptions,
    println,
    process::{self, Command},
    sys::{self, Major},
};

fn main() -> sys::Result<()> {
    // stdin/stdout/stderr: fds 0, 1 and 2 on the console.
    loop {
        match OpenOptions::new().read(true).write(true).open("console") {
            Err(_) => {
                sys::mknod("console", Major::Console as usize, 0)?;
            }
            Ok(stdin) => {
                let stdout = stdin.try_clone()?;
                let stderr = stdin.try_clone()?;
                // keep all three open for every descendant.
                core::mem::forget(stdin);
                core::mem::forget(stdout);
                core::mem::forget(stderr);
                break;
            }
        }
    }

    loop {
        println!("init: starting sh");
        let mut sh = match Command::new("/sh").spawn() {
            Ok(child) => child,
            Err(e) => {
                eprintln!("init: cannot start sh: {}", e);
                let _ = sys::sleep(100);
                continue;
            }
        };
        loop {
            // this call to wait() returns if the shell exits,
            // or if a parentless process exits.
            let (pid, _status) = match process::wait_any() {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("init: wait returned an error: {}", e);
                    break;
                }
            };
            if pid == sh.pid() {
                // the shell exited; restart it.
                break;
            }
            // it was a reparented zombie; just keep reaping.
        }
    }
}

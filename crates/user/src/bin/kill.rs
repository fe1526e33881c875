#![no_std]

use ulib::{ExitCode, env, eprintln, sys};

fn main() -> ExitCode {
    let args = env::args();
    if args.len() < 2 {
        eprintln!("Usage: kill PID...");
        return ExitCode::FAILURE;
    }
    let mut failed = false;
    for arg in args.skip(1) {
        match arg.parse::<usize>() {
            Ok(pid) => {
                if let Err(e) = sys::kill(pid) {
                    eprintln!("kill: {}: {}", pid, e);
                    failed = true;
                }
            }
            Err(_) => {
                eprintln!("kill: bad pid {}", arg);
                failed = true;
            }
        }
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

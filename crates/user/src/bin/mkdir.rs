#![no_std]

use ulib::{ExitCode, env, eprintln, fs};

fn main() -> ExitCode {
    let args = env::args();
    if args.len() < 2 {
        eprintln!("Usage: mkdir DIR...");
        return ExitCode::FAILURE;
    }
    let mut failed = false;
    for arg in args.skip(1) {
        if let Err(e) = fs::create_dir(arg) {
            eprintln!("mkdir: {}: {}", arg, e);
            failed = true;
        }
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

#![no_std]

use ulib::{ExitCode, env, eprintln, fs};

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let (symbolic, a, b) = match (args.next(), args.next(), args.next()) {
        (Some("-s"), Some(a), Some(b)) => (true, a, b),
        (Some(a), Some(b), None) => (false, a, b),
        _ => {
            eprintln!("Usage: ln [-s] TARGET LINK");
            return ExitCode::FAILURE;
        }
    };
    let res = if symbolic {
        fs::symlink(a, b)
    } else {
        fs::hard_link(a, b)
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ln: {}: {}", b, e);
            ExitCode::FAILURE
        }
    }
}

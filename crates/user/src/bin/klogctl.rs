// klogctl: dump the kernel log, or change its thresholds.
//   klogctl            print the retained kernel log
//   klogctl LEVELS     set thresholds, e.g. "klogctl 3 2"
#![no_std]

use ulib::{ExitCode, env, eprintln, io::Write, stdio::stdout, sys};

fn main() -> ExitCode {
    let mut args = env::args().skip(1);

    match (args.next(), args.next()) {
        (None, _) => {
            let mut buf = [0u8; 16 * 1024];
            match sys::klogdump(&mut buf) {
                Ok(n) => {
                    let _ = stdout().write_all(&buf[..n]);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("klogctl: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        (Some(record), Some(console)) => {
            let (Ok(record), Ok(console)) = (record.parse(), console.parse()) else {
                eprintln!("klogctl: levels are 0=error 1=warn 2=info 3=debug");
                return ExitCode::FAILURE;
            };
            match sys::klogthreshold(record, console) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("klogctl: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        _ => {
            eprintln!("Usage: klogctl [RECORD CONSOLE]");
            ExitCode::FAILURE
        }
    }
}

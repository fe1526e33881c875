// run every test program in sequence and summarize.
#![no_std]

use ulib::{ExitCode, println, process::Command};

const TESTS: &[(&str, &[&str])] = &[
    ("/test_fs", &[]),
    ("/test_dir", &[]),
    ("/test_symlink", &[]),
    ("/test_pipe", &[]),
    ("/test_cow", &[]),
    ("/test_sched", &[]),
    ("/test_crash", &["1"]),
    ("/test_crash", &["2"]),
];

fn main() -> ExitCode {
    let mut failed = 0;
    for (path, args) in TESTS {
        let mut cmd = Command::new(path);
        for a in *args {
            cmd.arg(a);
        }
        match cmd.spawn().and_then(|mut c| c.wait()) {
            Ok(0) => (),
            Ok(status) => {
                println!("test_all: {} exited with {}", path, status);
                failed += 1;
            }
            Err(e) => {
                println!("test_all: {} failed to run: {}", path, e);
                failed += 1;
            }
        }
    }
    if failed == 0 {
        println!("test_all: ALL TESTS PASSED");
        ExitCode::SUCCESS
    } else {
        println!("test_all: {} test(s) FAILED", failed);
        ExitCode::FAILURE
    }
}

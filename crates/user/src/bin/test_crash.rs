// crash-recovery scenarios driven by the log's staged-abort hook.
//
//   test_crash 1   stop after the commit point; after recovery the
//                  file must exist with its contents.
//   test_crash 2   stop before the commit point; after recovery the
//                  file must not exist.
#![no_std]

use ulib::{
    ExitCode, env,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    println, sys,
};

const PATH: &str = "fs_crash";
const PAYLOAD: &[u8] = b"journal-data";

fn main() -> ExitCode {
    let stage = env::args()
        .nth(1)
        .and_then(|a| a.parse::<usize>().ok())
        .unwrap_or(0);
    if stage != 1 && stage != 2 {
        println!("Usage: test_crash 1|2");
        return ExitCode::FAILURE;
    }

    match run(stage) {
        Ok(()) => {
            println!("test_crash {}: PASS", stage);
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_crash {}: FAIL {}", stage, msg);
            ExitCode::FAILURE
        }
    }
}

fn run(stage: usize) -> Result<(), &'static str> {
    // leftovers from an earlier run would confuse the checks below.
    let _ = fs::remove_file(PATH);

    sys::logcrash(stage).or(Err("logcrash"))?;
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(PATH)
            .or(Err("create"))?;
        let _ = file.write(PAYLOAD);
        // close (drop) ends the transaction; the commit stops at
        // the staged point.
    }
    sys::logcrash(0).or(Err("logcrash clear"))?;

    // drop cached copies so reads after recovery see the disk.
    sys::cacheclear().or(Err("cacheclear"))?;
    sys::logrecover().or(Err("logrecover"))?;

    match stage {
        1 => {
            // the header made it out: recovery installs the
            // transaction.
            let mut file = File::open(PATH).or(Err("file missing after recovery"))?;
            let mut buf = [0u8; 32];
            let n = file.read(&mut buf).or(Err("read"))?;
            if &buf[..n] != PAYLOAD {
                return Err("content mismatch after recovery");
            }
            let _ = fs::remove_file(PATH);
            Ok(())
        }
        2 => {
            // the header never made it out: the transaction is gone.
            if File::open(PATH).is_ok() {
                let _ = fs::remove_file(PATH);
                return Err("file exists after discarded transaction");
            }
            Ok(())
        }
        _ => unreachable!(),
    }
}

// directory emptiness rules for unlink.
#![no_std]

use ulib::{ExitCode, fs, println, sys};

fn main() -> ExitCode {
    match run() {
        Ok(()) => {
            println!("test_dir: PASS");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_dir: FAIL {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), &'static str> {
    // clean up leftovers from an earlier run.
    let _ = fs::remove_file("/a/b");
    let _ = fs::remove_file("/a");

    fs::create_dir("/a").or(Err("mkdir /a"))?;
    fs::create_dir("/a/b").or(Err("mkdir /a/b"))?;

    match sys::unlink("/a") {
        Err(sys::Error::DirectoryNotEmpty) => (),
        Err(_) => return Err("unlink /a: wrong error"),
        Ok(()) => return Err("unlink of non-empty directory succeeded"),
    }

    fs::remove_file("/a/b").or(Err("unlink /a/b"))?;
    fs::remove_file("/a").or(Err("unlink emptied /a"))?;

    if fs::metadata("/a").is_ok() {
        return Err("/a still exists");
    }
    Ok(())
}

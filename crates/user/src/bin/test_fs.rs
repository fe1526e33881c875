// write a file, read it back, unlink it.
#![no_std]

use ulib::{
    ExitCode,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    println, sys,
};

const PATH: &str = "testfile";
const PAYLOAD: &[u8] = b"Hello, filesystem!";

fn main() -> ExitCode {
    match run() {
        Ok(()) => {
            println!("test_fs: PASS");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_fs: FAIL {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), &'static str> {
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(PATH)
            .or(Err("create"))?;
        let n = file.write(PAYLOAD).or(Err("write"))?;
        if n != PAYLOAD.len() {
            return Err("short write");
        }
    }

    {
        let mut file = File::open(PATH).or(Err("reopen"))?;
        let mut buf = [0u8; 64];
        let n = file.read(&mut buf).or(Err("read"))?;
        if n != PAYLOAD.len() {
            return Err("short read");
        }
        if &buf[..n] != PAYLOAD {
            return Err("payload mismatch");
        }
        // a second read hits end of file.
        let n = file.read(&mut buf).or(Err("read at eof"))?;
        if n != 0 {
            return Err("expected eof");
        }
    }

    fs::remove_file(PATH).or(Err("unlink"))?;
    if File::open(PATH).is_ok() {
        return Err("file survived unlink");
    }
    if sys::unlink(PATH) != Err(sys::Error::NotFound) {
        return Err("second unlink should fail");
    }
    Ok(())
}

// symbolic links: resolution to the target inode, and the depth
// bound on chains.
#![no_std]

extern crate alloc;

use alloc::format;

use ulib::{
    ExitCode,
    fs::{self, File, OpenOptions},
    io::{Read, Write},
    println, sys,
};

fn main() -> ExitCode {
    match run() {
        Ok(()) => {
            println!("test_symlink: PASS");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_symlink: FAIL {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn cleanup() {
    for i in 0..10 {
        let _ = fs::remove_file(format!("/sl{}", i));
    }
    let _ = fs::remove_file("/sl_target");
}

fn run() -> Result<(), &'static str> {
    cleanup();

    {
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .open("/sl_target")
            .or(Err("create target"))?;
        f.write(b"symlink payload").or(Err("write target"))?;
    }
    let target_ino = fs::metadata("/sl_target").or(Err("stat target"))?.inum();

    // a single link resolves to the same inode as the target.
    fs::symlink("/sl_target", "/sl0").or(Err("symlink"))?;
    let f = File::open("/sl0").or(Err("open link"))?;
    if f.metadata().or(Err("stat link"))?.inum() != target_ino {
        return Err("link resolves to a different inode");
    }
    drop(f);

    // a chain of 7 links still resolves...
    for i in 1..=7 {
        let next = if i == 1 {
            alloc::string::String::from("/sl_target")
        } else {
            format!("/sl{}", i - 1)
        };
        fs::symlink(next, format!("/sl{}", i)).or(Err("symlink chain"))?;
    }
    let mut f = File::open("/sl7").or(Err("open chain of 7"))?;
    let mut buf = [0u8; 32];
    let n = f.read(&mut buf).or(Err("read through chain"))?;
    if &buf[..n] != b"symlink payload" {
        return Err("chain read wrong data");
    }
    drop(f);

    // ...but a chain of 9 exceeds the depth bound.
    for i in 8..=9 {
        fs::symlink(format!("/sl{}", i - 1), format!("/sl{}", i)).or(Err("symlink chain"))?;
    }
    match File::open("/sl9") {
        Err(sys::Error::TooManyLinks) => (),
        Err(_) => return Err("deep chain: wrong error"),
        Ok(_) => return Err("deep chain resolved"),
    }

    cleanup();
    Ok(())
}

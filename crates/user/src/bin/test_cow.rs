// copy-on-write fork: the child scribbles on every page of a large
// buffer; the parent must still see its own bytes.
#![no_std]

use ulib::{ExitCode, println, sys};

const PGSIZE: usize = 4096;
const BYTES: usize = 4 * 1024 * 1024;

fn main() -> ExitCode {
    match run() {
        Ok(()) => {
            println!("test_cow: PASS");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_cow: FAIL {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), &'static str> {
    let base = sys::sbrk(BYTES as isize).or(Err("sbrk"))? as *mut u8;

    // fill with 'A' while still unshared.
    for i in 0..BYTES {
        unsafe { base.add(i).write(b'A') };
    }

    match sys::fork() {
        Ok(0) => {
            // child: write one distinct byte per page, then exit.
            let mut v: u8 = 0;
            for page in 0..(BYTES / PGSIZE) {
                unsafe { base.add(page * PGSIZE).write(v) };
                v = v.wrapping_add(1);
            }
            sys::exit(0)
        }
        Ok(_) => {
            let mut status: i32 = 0;
            sys::wait(&mut status).or(Err("wait"))?;
            if status != 0 {
                return Err("child failed");
            }
            // every parent byte is still 'A'.
            for i in 0..BYTES {
                if unsafe { base.add(i).read() } != b'A' {
                    return Err("parent memory changed by child write");
                }
            }
            // and the parent can write its pages without trouble.
            for page in 0..(BYTES / PGSIZE) {
                unsafe { base.add(page * PGSIZE).write(b'B') };
            }
            Ok(())
        }
        Err(_) => Err("fork"),
    }
}

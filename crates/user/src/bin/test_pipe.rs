// pipes: bytes flow in order from writer to reader, and EOF arrives
// when the write end closes.
#![no_std]

use ulib::{ExitCode, println, sys};

fn main() -> ExitCode {
    match run() {
        Ok(()) => {
            println!("test_pipe: PASS");
            ExitCode::SUCCESS
        }
        Err(msg) => {
            println!("test_pipe: FAIL {}", msg);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), &'static str> {
    let mut fds = [0usize; 2];
    sys::pipe(&mut fds).or(Err("pipe"))?;
    let (rd, wr) = (fds[0], fds[1]);

    match sys::fork() {
        Ok(0) => {
            let _ = sys::close(rd);
            let mut seq: u8 = 0;
            let mut buf = [0u8; 128];
            for _ in 0..16 {
                for b in buf.iter_mut() {
                    *b = seq;
                    seq = seq.wrapping_add(1);
                }
                if sys::write(wr, &buf).is_err() {
                    sys::exit(1)
                }
            }
            let _ = sys::close(wr);
            sys::exit(0)
        }
        Ok(_) => {
            let _ = sys::close(wr);
            let mut seq: u8 = 0;
            let mut total = 0;
            let mut buf = [0u8; 97]; // deliberately unaligned reads
            loop {
                let n = sys::read(rd, &mut buf).or(Err("read"))?;
                if n == 0 {
                    break;
                }
                for &b in &buf[..n] {
                    if b != seq {
                        return Err("byte out of order");
                    }
                    seq = seq.wrapping_add(1);
                }
                total += n;
            }
            if total != 16 * 128 {
                return Err("wrong byte count");
            }
            let mut status: i32 = 0;
            sys::wait(&mut status).or(Err("wait"))?;
            if status != 0 {
                return Err("writer failed");
            }
            Ok(())
        }
        Err(_) => Err("fork"),
    }
}

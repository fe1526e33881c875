// Console input and output, to the uart.
// Reads are raw byte streams.
// Implements special input characters:
//   newline -- end of line
//   control-h -- backspace
//   control-u -- kill line
//   control-d -- end of file
//   control-p -- print process list

use core::num::Wrapping;

use crate::error::{Error::*, Result};
use crate::file::{DEVSW, Device, Major};
use crate::proc::{Cpus, dump, either_copyin, either_copyout, sleep, wakeup};
use crate::spinlock::Mutex;
use crate::uart;
use crate::vm::VirtAddr;

pub static CONS: Mutex<Cons> = Mutex::new(Cons::new(), "cons");

const BS: u8 = 0x08;

// Control-x
const fn ctrl(x: u8) -> u8 {
    x - b'@'
}

const INPUT_BUF_SIZE: usize = 128;

pub struct Cons {
    buf: [u8; INPUT_BUF_SIZE],
    r: Wrapping<usize>, // Read index
    w: Wrapping<usize>, // Write index
    e: Wrapping<usize>, // Edit index
}

impl Cons {
    const fn new() -> Cons {
        Cons {
            buf: [0; INPUT_BUF_SIZE],
            r: Wrapping(0),
            w: Wrapping(0),
            e: Wrapping(0),
        }
    }
}

impl Device for Mutex<Cons> {
    // user read()s from the console go here.
    // copy (up to) a whole input line to dst.
    fn read(&self, mut dst: VirtAddr, mut n: usize) -> Result<usize> {
        let mut cons_guard = self.lock();
        let p = Cpus::myproc().unwrap();

        let target = n;
        while n > 0 {
            // wait until the interrupt handler has put some input
            // into CONS.buf.
            while cons_guard.r == cons_guard.w {
                if p.inner.lock().killed {
                    return Err(Interrupted);
                }
                cons_guard = sleep(&cons_guard.r as *const _ as usize, cons_guard);
            }
            let c = cons_guard.buf[cons_guard.r.0 % INPUT_BUF_SIZE];
            cons_guard.r += Wrapping(1);

            if c == ctrl(b'D') {
                // end of file
                if n < target {
                    // Save ^D for next time, to make sure caller
                    // gets a 0-byte result.
                    cons_guard.r -= Wrapping(1);
                }
                break;
            }

            // copy the input byte to the user-space buffer.
            either_copyout(dst, &c)?;

            dst += 1;
            n -= 1;

            if c == b'\n' {
                // a whole line has arrived, return to the
                // user-level read().
                break;
            }
        }

        Ok(target - n)
    }

    // user write()s to the console go here.
    fn write(&self, mut src: VirtAddr, n: usize) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }

        let mut buf = [0u8; 128];
        let mut written = 0usize;
        while written < n {
            let m = core::cmp::min(buf.len(), n - written);
            either_copyin(&mut buf[..m], src)?;

            for &b in &buf[..m] {
                uart::UART.putc(b);
            }

            written += m;
            src += m;
        }
        Ok(written)
    }

    fn major(&self) -> Major {
        Major::Console
    }
}

impl Mutex<Cons> {
    // the console input interrupt handler.
    // uart.intr() calls this for each input character.
    // do erase/kill processing, append to cons.buf,
    // wake up read() if a whole line has arrived.
    pub fn intr(&self, c: u8) {
        let mut cons_guard = self.lock();
        match c {
            // Print process list.
            m if m == ctrl(b'P') => dump(),
            // Kill line.
            m if m == ctrl(b'U') => {
                while cons_guard.e != cons_guard.w
                    && cons_guard.buf[(cons_guard.e - Wrapping(1)).0 % INPUT_BUF_SIZE] != b'\n'
                {
                    cons_guard.e -= Wrapping(1);
                    putc(ctrl(b'H'));
                }
            }
            // Backspace or delete.
            m if m == ctrl(b'H') || m == b'\x7f' => {
                if cons_guard.e != cons_guard.w {
                    cons_guard.e -= Wrapping(1);
                    putc(ctrl(b'H'));
                }
            }
            _ => {
                if c != 0 && (cons_guard.e - cons_guard.r).0 < INPUT_BUF_SIZE {
                    let c = if c == b'\r' { b'\n' } else { c };

                    // echo back to the user.
                    putc(c);

                    // store for consumption by read().
                    let e_idx = cons_guard.e.0 % INPUT_BUF_SIZE;
                    cons_guard.buf[e_idx] = c;
                    cons_guard.e += Wrapping(1);

                    if c == b'\n'
                        || c == ctrl(b'D')
                        || (cons_guard.e - cons_guard.r).0 == INPUT_BUF_SIZE
                    {
                        // wake up read() if a whole line (or
                        // end-of-file) has arrived.
                        cons_guard.w = cons_guard.e;
                        wakeup(&cons_guard.r as *const _ as usize);
                    }
                }
            }
        }
    }
}

pub fn init() {
    unsafe { uart::init() }
    DEVSW.set(Major::Console, &CONS).unwrap();
}

// send one character to the uart.
// called by printf(), and to echo input characters,
// but not from write().
pub fn putc(c: u8) {
    if c == ctrl(b'H') {
        // overwrite with a space.
        uart::putc_sync(BS);
        uart::putc_sync(b' ');
        uart::putc_sync(BS);
    } else {
        uart::putc_sync(c);
    }
}

// formatted console output -- println! and friends.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::console;
use crate::spinlock::Mutex;

// lock to avoid interleaving concurrent println!'s.
static PR: Mutex<Writer> = Mutex::new(Writer, "pr");

// set once a panic starts; lets the panicking CPU print freely.
pub static PANICKED: AtomicBool = AtomicBool::new(false);

struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            console::putc(b);
        }
        Ok(())
    }
}

pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;
    if PANICKED.load(Ordering::Relaxed) {
        // skip the lock; the machine is going down anyway.
        let _ = Writer.write_fmt(args);
    } else {
        let _ = PR.lock().write_fmt(args);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}

pub fn panic_inner(info: &core::panic::PanicInfo<'_>) -> ! {
    PANICKED.store(true, Ordering::Relaxed);
    println!("panic: {}", info);
    #[cfg(test)]
    crate::test::exit_qemu(crate::test::Outcome::Fail);
    loop {
        core::hint::spin_loop()
    }
}

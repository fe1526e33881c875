// Leveled kernel log.
//
// Records go into a fixed ring buffer; two thresholds decide what is
// retained and what is echoed to the console. klog_dump() hands the
// retained bytes to user space oldest-first.

use crate::param::KLOG_BUF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl Level {
    pub fn from_usize(n: usize) -> Option<Level> {
        match n {
            0 => Some(Self::Error),
            1 => Some(Self::Warn),
            2 => Some(Self::Info),
            3 => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Error => "E",
            Self::Warn => "W",
            Self::Info => "I",
            Self::Debug => "D",
        }
    }
}

// Byte ring; w only grows, the window is the last KLOG_BUF bytes.
pub struct Ring {
    buf: [u8; KLOG_BUF],
    w: usize,
}

impl Ring {
    pub const fn new() -> Self {
        Self {
            buf: [0; KLOG_BUF],
            w: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.buf[self.w % KLOG_BUF] = b;
            self.w += 1;
        }
    }

    pub fn len(&self) -> usize {
        core::cmp::min(self.w, KLOG_BUF)
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0
    }

    // copy up to dst.len() bytes starting at offset `off` from the
    // oldest retained byte; returns the number copied.
    pub fn copy_out(&self, off: usize, dst: &mut [u8]) -> usize {
        let len = self.len();
        if off >= len {
            return 0;
        }
        let start = self.w - len;
        let n = core::cmp::min(dst.len(), len - off);
        for (i, d) in dst.iter_mut().take(n).enumerate() {
            *d = self.buf[(start + off + i) % KLOG_BUF];
        }
        n
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(target_os = "none", feature = "kernel"))]
mod front {
    use core::fmt::{self, Write};
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::{Level, Ring};
    use crate::error::Result;
    use crate::printf::_print;
    use crate::spinlock::Mutex;
    use crate::vm::VirtAddr;

    struct Klog {
        ring: Ring,
        record: Level,
        console: Level,
    }

    static KLOG: Mutex<Klog> = Mutex::new(
        Klog {
            ring: Ring::new(),
            record: Level::Info,
            console: Level::Info,
        },
        "klog",
    );

    // tick mirror readable without the tick lock; clockintr()
    // refreshes it.
    static TICKS_SNAPSHOT: AtomicUsize = AtomicUsize::new(0);

    pub fn tick(now: usize) {
        TICKS_SNAPSHOT.store(now, Ordering::Relaxed);
    }

    struct RingWriter<'a>(&'a mut Ring);

    impl fmt::Write for RingWriter<'_> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.push(s.as_bytes());
            Ok(())
        }
    }

    pub fn log(level: Level, args: fmt::Arguments<'_>) {
        let now = TICKS_SNAPSHOT.load(Ordering::Relaxed);
        let echo;
        {
            let mut guard = KLOG.lock();
            if level <= guard.record {
                let _ = write!(RingWriter(&mut guard.ring), "[{} {}] {}\n", level.tag(), now, args);
            }
            echo = level <= guard.console;
        }
        if echo {
            _print(format_args!("[{} {}] {}\n", level.tag(), now, args));
        }
    }

    pub fn set_threshold(record: Level, console: Level) {
        let mut guard = KLOG.lock();
        guard.record = record;
        guard.console = console;
    }

    // copy the retained log to user space; returns bytes written.
    pub fn dump(mut dst: VirtAddr, n: usize) -> Result<usize> {
        let mut copied = 0;
        let mut chunk = [0u8; 256];
        while copied < n {
            let want = core::cmp::min(chunk.len(), n - copied);
            let got = {
                let guard = KLOG.lock();
                guard.ring.copy_out(copied, &mut chunk[..want])
            };
            if got == 0 {
                break;
            }
            crate::proc::either_copyout(dst, &chunk[..got])?;
            dst += got;
            copied += got;
        }
        Ok(copied)
    }
}

#[cfg(all(target_os = "none", feature = "kernel"))]
pub use front::{dump, log, set_threshold, tick};

#[cfg(all(target_os = "none", feature = "kernel"))]
#[macro_export]
macro_rules! klog {
    ($lvl:expr, $($arg:tt)*) => {
        $crate::klog::log($lvl, core::format_args!($($arg)*))
    };
}

#[cfg(all(target_os = "none", feature = "kernel"))]
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Info, $($arg)*) };
}

#[cfg(all(target_os = "none", feature = "kernel"))]
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Warn, $($arg)*) };
}

#[cfg(all(target_os = "none", feature = "kernel"))]
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::Level::Error, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_retains_last_window() {
        let mut ring = Ring::new();
        ring.push(b"hello");
        let mut out = [0u8; 8];
        assert_eq!(ring.copy_out(0, &mut out), 5);
        assert_eq!(&out[..5], b"hello");

        // overflow the window; only the tail survives.
        for _ in 0..crate::param::KLOG_BUF {
            ring.push(b"x");
        }
        ring.push(b"tail");
        assert_eq!(ring.len(), crate::param::KLOG_BUF);
        let mut out = [0u8; 4];
        let off = ring.len() - 4;
        assert_eq!(ring.copy_out(off, &mut out), 4);
        assert_eq!(&out, b"tail");
    }

    #[test]
    fn copy_out_past_end_is_empty() {
        let mut ring = Ring::new();
        ring.push(b"abc");
        let mut out = [0u8; 4];
        assert_eq!(ring.copy_out(3, &mut out), 0);
        assert_eq!(ring.copy_out(2, &mut out), 1);
        assert_eq!(out[0], b'c');
    }

    #[test]
    fn level_order() {
        assert!(Level::Error < Level::Warn);
        assert!(Level::Info < Level::Debug);
        assert_eq!(Level::from_usize(2), Some(Level::Info));
        assert_eq!(Level::from_usize(9), None);
    }
}

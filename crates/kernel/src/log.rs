// Simple logging that allows concurrent FS system calls.
//
// A log transaction contains the updates of multiple FS system
// calls. The logging system only commits when there are no FS
// system calls active. Thus there is never any reasoning required
// about whether a commit might write an uncommitted system call's
// updates to disk.
//
// A system call should call begin_op()/end_op() to mark its start
// and end. Usually begin_op() just increments the count of in-
// progress FS system calls and returns. But if it thinks the log is
// close to running out, it sleeps until the last outstanding end_op()
// commits.
//
// The log is a physical re-do log containing disk blocks. The
// on-disk log format:
//   header block, containing block #s for blocks A, B, C, ...
//   block A
//   block B
//   block C
//   ...
// Log appends are synchronous.
//
// For crash-recovery testing, a staged abort simulates losing power
// inside a commit. While a stage is armed, end_op() stops
// committing, so everything up to the simulated crash accumulates
// as one pending transaction; clearing the stage runs that commit
// and stops it at the staged point. Stopping after the log blocks
// but before the header makes the transaction disappear on
// recovery; stopping right after the header leaves recovery to
// finish the install.

use crate::bio::{BCACHE, BufGuard};
use crate::defs::AsBytes;
use crate::fs::SuperBlock;
use crate::param::{LOGSIZE, MAXOPBLOCKS};
use crate::proc;
use crate::spinlock::Mutex;

pub static LOG: Log = Log::new();

// how many data blocks one committed transaction can hold.
const LOGDATA: usize = LOGSIZE - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCrashStage {
    None = 0,
    // stop after the commit point; install is left for recovery.
    AfterCommit = 1,
    // stop before the commit point; the transaction is lost.
    AfterLog = 2,
}

impl LogCrashStage {
    pub fn from_usize(n: usize) -> Option<Self> {
        match n {
            0 => Some(Self::None),
            1 => Some(Self::AfterCommit),
            2 => Some(Self::AfterLog),
            _ => None,
        }
    }
}

// contents of the log's first block, on disk and in memory.
#[derive(Clone, Copy)]
#[repr(C)]
struct LogHeader {
    n: u32,
    block: [u32; LOGDATA],
}

unsafe impl AsBytes for LogHeader {}

struct LogState {
    start: u32,
    size: u32,
    dev: u32,
    outstanding: usize, // how many FS sys calls are executing.
    committing: bool,   // in commit(), please wait.
    crash_stage: LogCrashStage,
    header: LogHeader,
}

pub struct Log {
    state: Mutex<LogState>,
}

impl Log {
    const fn new() -> Self {
        Self {
            state: Mutex::new(
                LogState {
                    start: 0,
                    size: 0,
                    dev: 0,
                    outstanding: 0,
                    committing: false,
                    crash_stage: LogCrashStage::None,
                    header: LogHeader {
                        n: 0,
                        block: [0; LOGDATA],
                    },
                },
                "log",
            ),
        }
    }

    pub fn init(&self, dev: u32, sb: &SuperBlock) {
        assert!(
            core::mem::size_of::<LogHeader>() < crate::fs::BSIZE,
            "log: header too big"
        );
        assert!(sb.nlog as usize >= LOGSIZE, "log: on-disk log too small");
        {
            let mut state = self.state.lock();
            state.start = sb.logstart;
            state.size = sb.nlog;
            state.dev = dev;
        }
        self.recover();
    }

    // recover the file system from the on-disk log: install any
    // committed transaction and clear the header.
    pub fn recover(&self) {
        let (dev, start, pending) = {
            let mut state = self.state.lock();
            assert!(!state.committing, "log: recover during commit");
            // whatever an interrupted transaction left in memory is
            // void; disk is the only truth here.
            let pending = state.header;
            state.outstanding = 0;
            state.header.n = 0;
            state.crash_stage = LogCrashStage::None;
            (state.dev, state.start, pending)
        };

        // a transaction that never reached its commit may still
        // hold cache pins; give them back.
        for i in 0..pending.n as usize {
            let b = BCACHE.read(dev, pending.block[i]);
            b.unpin();
        }

        let header = read_head(dev, start);
        install_trans(dev, start, &header, true);
        // clear the log.
        write_head(
            dev,
            start,
            &LogHeader {
                n: 0,
                block: [0; LOGDATA],
            },
        );
    }

    // called at the start of each FS system call.
    pub fn begin_op(&self) {
        let mut state = self.state.lock();
        loop {
            if state.committing {
                state = proc::sleep(self as *const _ as usize, state);
            } else if state.header.n as usize + (state.outstanding + 1) * MAXOPBLOCKS > LOGDATA {
                // this op might exhaust log space; wait for commit.
                state = proc::sleep(self as *const _ as usize, state);
            } else {
                state.outstanding += 1;
                break;
            }
        }
    }

    // called at the end of each FS system call.
    // commits if this was the last outstanding operation.
    pub fn end_op(&self) {
        let mut do_commit = false;
        {
            let mut state = self.state.lock();
            assert!(state.outstanding > 0, "end_op outside of transaction");
            state.outstanding -= 1;
            assert!(!state.committing, "end_op while committing");
            if state.outstanding == 0 && state.crash_stage == LogCrashStage::None {
                do_commit = true;
                state.committing = true;
            } else {
                // begin_op() may be waiting for log space, and
                // decrementing outstanding has decreased the amount
                // of reserved space. With a crash stage armed
                // nothing commits; the blocks pile up as the one
                // transaction the simulated crash will interrupt.
                proc::wakeup(self as *const _ as usize);
            }
        }

        if do_commit {
            // call commit without holding the lock, since commit
            // sleeps on disk I/O.
            self.commit(LogCrashStage::None);
            let mut state = self.state.lock();
            state.committing = false;
            drop(state);
            proc::wakeup(self as *const _ as usize);
        }
    }

    // Caller has modified b.data and is done with the buffer.
    // Record the block number and pin the buffer in the cache by
    // increasing refcnt; commit()/write_log() will do the disk
    // write.
    //
    // This replaces a direct buffer write; a usual use is:
    //   let mut b = BCACHE.read(...);
    //   modify b.data
    //   LOG.write(&b);
    pub fn write(&self, b: &BufGuard) {
        let mut state = self.state.lock();
        assert!((state.header.n as usize) < LOGDATA, "too big a transaction");
        assert!(state.outstanding >= 1, "log write outside of transaction");

        let n = state.header.n as usize;
        let mut absorbed = false;
        for i in 0..n {
            if state.header.block[i] == b.blockno() {
                // log absorption: one slot per block per transaction.
                absorbed = true;
                break;
            }
        }
        if !absorbed {
            state.header.block[n] = b.blockno();
            state.header.n += 1;
            b.pin();
        }
    }

    // Arm or clear the staged-crash hook. Clearing a previously
    // armed stage plays the interrupted commit: the pending
    // transaction is written out only as far as the stage allows,
    // then dropped from memory, exactly as if the machine had died
    // there.
    pub fn set_crash_stage(&self, stage: LogCrashStage) {
        let prev;
        {
            let mut state = self.state.lock();
            prev = state.crash_stage;
            state.crash_stage = stage;
            if prev == LogCrashStage::None || stage != LogCrashStage::None {
                return;
            }
            assert!(!state.committing, "log: crash stage during commit");
            assert!(state.outstanding == 0, "log: crash stage inside op");
            state.committing = true;
        }

        self.commit(prev);
        let mut state = self.state.lock();
        state.committing = false;
        drop(state);
        proc::wakeup(self as *const _ as usize);
    }

    fn commit(&self, crash: LogCrashStage) {
        // committing is set, so the header is ours to read without
        // the lock.
        let (dev, start, header) = {
            let state = self.state.lock();
            (state.dev, state.start, state.header)
        };
        if header.n == 0 {
            return;
        }

        // 1: copy modified blocks from the cache into the log region.
        write_log(dev, start, &header);
        if crash == LogCrashStage::AfterLog {
            self.abort(&header);
            return;
        }

        // 2: write the header to disk -- the real commit.
        write_head(dev, start, &header);
        if crash == LogCrashStage::AfterCommit {
            self.abort(&header);
            return;
        }

        // 3: install writes to their home locations.
        install_trans(dev, start, &header, false);

        // 4: erase the transaction from the log.
        let empty = LogHeader {
            n: 0,
            block: [0; LOGDATA],
        };
        write_head(dev, start, &empty);
        let mut state = self.state.lock();
        state.header.n = 0;
    }

    // a staged crash: drop the in-memory transaction as a real
    // crash would. Pinned buffers are released so the cache stays
    // usable; their contents are stale relative to disk until
    // recover() runs.
    fn abort(&self, header: &LogHeader) {
        let dev = {
            let mut state = self.state.lock();
            state.header.n = 0;
            state.dev
        };
        for i in 0..header.n as usize {
            let b = BCACHE.read(dev, header.block[i]);
            b.unpin();
        }
    }
}

fn read_head(dev: u32, start: u32) -> LogHeader {
    let buf = BCACHE.read(dev, start);
    let mut header = LogHeader {
        n: 0,
        block: [0; LOGDATA],
    };
    let len = core::mem::size_of::<LogHeader>();
    header.as_bytes_mut().copy_from_slice(&buf[..len]);
    header
}

// write the in-memory log header to disk.
fn write_head(dev: u32, start: u32, header: &LogHeader) {
    let mut buf = BCACHE.read(dev, start);
    let len = core::mem::size_of::<LogHeader>();
    buf[..len].copy_from_slice(header.as_bytes());
    buf.write();
}

// copy committed blocks from the log region to their home
// locations.
fn install_trans(dev: u32, start: u32, header: &LogHeader, recovering: bool) {
    for i in 0..header.n as usize {
        let lbuf = BCACHE.read(dev, start + 1 + i as u32); // log block
        let mut dbuf = BCACHE.read(dev, header.block[i]); // dst
        dbuf.copy_from_slice(&lbuf[..]);
        dbuf.write(); // write dst to disk
        if !recovering {
            dbuf.unpin();
        }
    }
}

// copy modified blocks from the cache to the log region.
fn write_log(dev: u32, start: u32, header: &LogHeader) {
    for i in 0..header.n as usize {
        let mut to = BCACHE.read(dev, start + 1 + i as u32); // log block
        let from = BCACHE.read(dev, header.block[i]); // cache block
        to.copy_from_slice(&from[..]);
        to.write();
    }
}

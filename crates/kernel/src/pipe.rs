use alloc::sync::Arc;

use crate::error::{Error::*, Result};
use crate::fcntl::OMode;
use crate::file::{FTABLE, FType, File};
use crate::proc::{self, Cpus, either_copyin, either_copyout};
use crate::spinlock::Mutex;
use crate::vm::VirtAddr;

const PIPESIZE: usize = 512;

#[derive(Debug)]
struct PipeInner {
    data: [u8; PIPESIZE],
    nread: usize,    // number of bytes read
    nwrite: usize,   // number of bytes written
    readopen: bool,  // read fd is still open
    writeopen: bool, // write fd is still open
}

// One end's handle on a pipe; both Files of a pipe pair share the
// same inner ring.
#[derive(Debug, Clone)]
pub struct Pipe {
    inner: Arc<Mutex<PipeInner>>,
}

impl Pipe {
    // Allocate a pipe and the two Files viewing it.
    pub fn alloc() -> Result<(File, File)> {
        let inner = Arc::new(Mutex::new(
            PipeInner {
                data: [0; PIPESIZE],
                nread: 0,
                nwrite: 0,
                readopen: true,
                writeopen: true,
            },
            "pipe",
        ));
        let rf = FTABLE.alloc(
            OMode::from_usize(crate::fcntl::omode::RDONLY),
            FType::Pipe(Pipe {
                inner: Arc::clone(&inner),
            }),
        )?;
        let wf = FTABLE.alloc(
            OMode::from_usize(crate::fcntl::omode::WRONLY),
            FType::Pipe(Pipe { inner }),
        )?;
        Ok((rf, wf))
    }

    pub fn write(&self, src: VirtAddr, n: usize) -> Result<usize> {
        let p = Cpus::myproc().unwrap();
        let mut i = 0;
        let mut guard = self.inner.lock();
        while i < n {
            if !guard.readopen || p.inner.lock().killed {
                return Err(BrokenPipe);
            }
            if guard.nwrite == guard.nread + PIPESIZE {
                // pipe is full; wait for a reader.
                proc::wakeup(&guard.nread as *const _ as usize);
                let chan = &guard.nwrite as *const _ as usize;
                guard = proc::sleep(chan, guard);
                continue;
            }
            let mut byte = 0u8;
            either_copyin(&mut byte, src + i)?;
            let w = guard.nwrite % PIPESIZE;
            guard.data[w] = byte;
            guard.nwrite += 1;
            i += 1;
        }
        proc::wakeup(&guard.nread as *const _ as usize);
        Ok(i)
    }

    pub fn read(&self, dst: VirtAddr, n: usize) -> Result<usize> {
        let p = Cpus::myproc().unwrap();
        let mut guard = self.inner.lock();
        while guard.nread == guard.nwrite && guard.writeopen {
            // pipe is empty; wait for a writer or EOF.
            if p.inner.lock().killed {
                return Err(Interrupted);
            }
            let chan = &guard.nread as *const _ as usize;
            guard = proc::sleep(chan, guard);
        }
        let mut i = 0;
        while i < n && guard.nread != guard.nwrite {
            let r = guard.nread % PIPESIZE;
            let byte = guard.data[r];
            if either_copyout(dst + i, &byte).is_err() {
                break;
            }
            guard.nread += 1;
            i += 1;
        }
        proc::wakeup(&guard.nwrite as *const _ as usize);
        Ok(i)
    }

    // called when the last File for one end goes away.
    pub fn close(&self, writable: bool) {
        let mut guard = self.inner.lock();
        if writable {
            guard.writeopen = false;
            proc::wakeup(&guard.nread as *const _ as usize);
        } else {
            guard.readopen = false;
            proc::wakeup(&guard.nwrite as *const _ as usize);
        }
    }
}

// Buffer cache.
//
// The buffer cache is a fixed pool of NBUF block-sized buffers
// indexed two ways: a doubly-linked LRU list (head = most recently
// used) that eviction scans from the tail, and a hash table keyed by
// (dev, blockno) that lookups walk. Both indices live behind one
// spinlock and link buffers by pool index; the buffer contents sit
// behind a per-buffer sleeplock so disk I/O happens without the
// spinlock held.
//
// Interface:
// * To get a buffer for a particular disk block, call read().
// * After changing buffer data, call write() to flush it to disk.
// * When done with the buffer, drop the guard; it goes back on the
//   LRU list once the last reference is gone.
// * pin()/unpin() adjust the reference count without an open guard,
//   so the log can keep modified buffers resident until commit.

use core::ops::{Deref, DerefMut, Drop};

use crate::fs::BSIZE;
use crate::param::{BUF_HASH, NBUF};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::virtio_disk::DISK;
use crate::array;

pub static BCACHE: Bcache = Bcache::new();

// index used as "none" in the links below, and as the LRU sentinel.
const NIL: usize = NBUF;

#[derive(Debug)]
pub struct BufData {
    pub data: [u8; BSIZE],
    valid: bool, // has data been read from disk?
}

impl BufData {
    const fn new() -> Self {
        Self {
            data: [0; BSIZE],
            valid: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Meta {
    dev: u32,
    blockno: u32,
    refcnt: usize,
    hashed: bool, // present in some hash bucket?
}

#[derive(Debug)]
struct Ctrl {
    meta: [Meta; NBUF],
    // LRU list links; index NBUF is the sentinel.
    prev: [usize; NBUF + 1],
    next: [usize; NBUF + 1],
    // hash index: bucket heads and per-buffer chain links.
    buckets: [usize; BUF_HASH],
    hnext: [usize; NBUF],
}

#[derive(Debug)]
pub struct Bcache {
    ctrl: Mutex<Ctrl>,
    bufs: [SleepLock<BufData>; NBUF],
}

const fn hash(dev: u32, blockno: u32) -> usize {
    (dev as usize).wrapping_mul(31).wrapping_add(blockno as usize) % BUF_HASH
}

impl Ctrl {
    const fn new() -> Self {
        Self {
            meta: [Meta {
                dev: 0,
                blockno: 0,
                refcnt: 0,
                hashed: false,
            }; NBUF],
            prev: [0; NBUF + 1],
            next: [0; NBUF + 1],
            buckets: [NIL; BUF_HASH],
            hnext: [NIL; NBUF],
        }
    }

    // unlink idx from the LRU list.
    fn lru_remove(&mut self, idx: usize) {
        let (p, n) = (self.prev[idx], self.next[idx]);
        self.next[p] = n;
        self.prev[n] = p;
    }

    // insert idx right after the sentinel: most recently used.
    fn lru_push_front(&mut self, idx: usize) {
        let first = self.next[NIL];
        self.next[NIL] = idx;
        self.prev[idx] = NIL;
        self.next[idx] = first;
        self.prev[first] = idx;
    }

    fn hash_insert(&mut self, idx: usize) {
        let b = hash(self.meta[idx].dev, self.meta[idx].blockno);
        self.hnext[idx] = self.buckets[b];
        self.buckets[b] = idx;
        self.meta[idx].hashed = true;
    }

    fn hash_remove(&mut self, idx: usize) {
        let b = hash(self.meta[idx].dev, self.meta[idx].blockno);
        let mut cur = self.buckets[b];
        if cur == idx {
            self.buckets[b] = self.hnext[idx];
        } else {
            while cur != NIL {
                if self.hnext[cur] == idx {
                    self.hnext[cur] = self.hnext[idx];
                    break;
                }
                cur = self.hnext[cur];
            }
            assert!(cur != NIL, "bcache: hash chain corrupt");
        }
        self.hnext[idx] = NIL;
        self.meta[idx].hashed = false;
    }

    fn lookup(&self, dev: u32, blockno: u32) -> Option<usize> {
        let mut cur = self.buckets[hash(dev, blockno)];
        while cur != NIL {
            let m = &self.meta[cur];
            if m.dev == dev && m.blockno == blockno {
                return Some(cur);
            }
            cur = self.hnext[cur];
        }
        None
    }
}

impl Bcache {
    const fn new() -> Self {
        Self {
            ctrl: Mutex::new(Ctrl::new(), "bcache"),
            bufs: array![SleepLock::new(BufData::new(), "buffer"); NBUF],
        }
    }

    // Look through the buffer cache for block on device dev. If not
    // found, recycle the least recently used unreferenced buffer. In
    // either case, return a guard holding the buffer's sleeplock
    // with valid contents.
    pub fn read(&'static self, dev: u32, blockno: u32) -> BufGuard {
        let idx;
        let mut fresh = false;
        {
            let mut ctrl = self.ctrl.lock();
            match ctrl.lookup(dev, blockno) {
                Some(i) => {
                    ctrl.meta[i].refcnt += 1;
                    idx = i;
                }
                None => {
                    // not cached; recycle from the cold end of the
                    // LRU list.
                    let mut cur = ctrl.prev[NIL];
                    loop {
                        assert!(cur != NIL, "bcache: no buffers");
                        if ctrl.meta[cur].refcnt == 0 {
                            break;
                        }
                        cur = ctrl.prev[cur];
                    }
                    if ctrl.meta[cur].hashed {
                        ctrl.hash_remove(cur);
                    }
                    ctrl.meta[cur].dev = dev;
                    ctrl.meta[cur].blockno = blockno;
                    ctrl.meta[cur].refcnt = 1;
                    ctrl.hash_insert(cur);
                    // refcnt was 0, so nobody holds the sleeplock.
                    unsafe { self.bufs[cur].get_mut().valid = false };
                    idx = cur;
                    fresh = true;
                }
            }
        }
        let guard = self.bufs[idx].lock();
        let mut b = BufGuard {
            idx,
            dev,
            blockno,
            guard: Some(guard),
        };
        if fresh || !b.guard().valid {
            DISK.rw(&mut b, false);
            b.guard_mut().valid = true;
        }
        b
    }

    // extra reference so the buffer survives with no open guard.
    fn pin(&self, idx: usize) {
        let mut ctrl = self.ctrl.lock();
        ctrl.meta[idx].refcnt += 1;
    }

    fn unpin(&self, idx: usize) {
        let mut ctrl = self.ctrl.lock();
        assert!(ctrl.meta[idx].refcnt > 0, "bcache: unpin");
        ctrl.meta[idx].refcnt -= 1;
        if ctrl.meta[idx].refcnt == 0 {
            ctrl.lru_remove(idx);
            ctrl.lru_push_front(idx);
        }
    }

    // Forget cached contents of every unreferenced buffer, forcing
    // the next read() of each block to go to the disk. Busy buffers
    // (including everything the log has pinned) are left alone.
    pub fn invalidate(&self) {
        let ctrl = self.ctrl.lock();
        for idx in 0..NBUF {
            if ctrl.meta[idx].refcnt == 0 {
                unsafe { self.bufs[idx].get_mut().valid = false };
            }
        }
    }
}

pub fn init() {
    let mut ctrl = BCACHE.ctrl.lock();
    // form the LRU list out of all the buffers.
    ctrl.prev[NIL] = NIL;
    ctrl.next[NIL] = NIL;
    for idx in 0..NBUF {
        ctrl.lru_push_front(idx);
    }
}

// A locked buffer. Dropping it releases the sleeplock and the cache
// reference.
pub struct BufGuard {
    idx: usize,
    dev: u32,
    blockno: u32,
    guard: Option<SleepLockGuard<'static, BufData>>,
}

impl BufGuard {
    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    fn guard(&self) -> &BufData {
        self.guard.as_ref().unwrap()
    }

    fn guard_mut(&mut self) -> &mut BufData {
        self.guard.as_mut().unwrap()
    }

    // write the buffer's contents to disk.
    pub fn write(&mut self) {
        DISK.rw(self, true);
    }

    pub fn pin(&self) {
        BCACHE.pin(self.idx);
    }

    pub fn unpin(&self) {
        BCACHE.unpin(self.idx);
    }
}

impl Deref for BufGuard {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.guard().data
    }
}

impl DerefMut for BufGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard_mut().data
    }
}

impl Drop for BufGuard {
    fn drop(&mut self) {
        // release the sleeplock before touching the cache index.
        self.guard.take();
        BCACHE.unpin(self.idx);
    }
}

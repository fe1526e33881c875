// driver for qemu's virtio disk device (legacy MMIO interface).
// qemu presents it on the virt machine at VIRTIO0.
//
// The driver is synchronous: rw() queues one request, tells the
// device, and sleeps until the completion interrupt marks it done.

use core::ptr;
use core::sync::atomic::{Ordering, fence};

use crate::bio::BufGuard;
use crate::fs::BSIZE;
use crate::memlayout::VIRTIO0;
use crate::proc;
use crate::spinlock::Mutex;

pub static DISK: Disk = Disk::new();

// virtio mmio control registers, mapped starting at VIRTIO0.
// from qemu virtio_mmio.h
const VIRTIO_MMIO_MAGIC_VALUE: usize = 0x000; // 0x74726976
const VIRTIO_MMIO_VERSION: usize = 0x004; // version; 1 is legacy
const VIRTIO_MMIO_DEVICE_ID: usize = 0x008; // device type; 2 is disk
const VIRTIO_MMIO_VENDOR_ID: usize = 0x00c; // 0x554d4551
const VIRTIO_MMIO_DEVICE_FEATURES: usize = 0x010;
const VIRTIO_MMIO_DRIVER_FEATURES: usize = 0x020;
const VIRTIO_MMIO_GUEST_PAGE_SIZE: usize = 0x028; // page size for PFN, write-only
const VIRTIO_MMIO_QUEUE_SEL: usize = 0x030; // select queue, write-only
const VIRTIO_MMIO_QUEUE_NUM_MAX: usize = 0x034; // max size of current queue, read-only
const VIRTIO_MMIO_QUEUE_NUM: usize = 0x038; // size of current queue, write-only
const VIRTIO_MMIO_QUEUE_PFN: usize = 0x040; // physical page number for queue, read/write
const VIRTIO_MMIO_QUEUE_NOTIFY: usize = 0x050; // write-only
const VIRTIO_MMIO_INTERRUPT_STATUS: usize = 0x060; // read-only
const VIRTIO_MMIO_INTERRUPT_ACK: usize = 0x064; // write-only
const VIRTIO_MMIO_STATUS: usize = 0x070; // read/write

// status register bits, from qemu virtio_config.h
const VIRTIO_CONFIG_S_ACKNOWLEDGE: u32 = 1;
const VIRTIO_CONFIG_S_DRIVER: u32 = 2;
const VIRTIO_CONFIG_S_DRIVER_OK: u32 = 4;
const VIRTIO_CONFIG_S_FEATURES_OK: u32 = 8;

// device feature bits
const VIRTIO_BLK_F_RO: u32 = 5; // Disk is read-only
const VIRTIO_BLK_F_SCSI: u32 = 7; // Supports scsi command passthru
const VIRTIO_BLK_F_CONFIG_WCE: u32 = 11; // Writeback mode available in config
const VIRTIO_BLK_F_MQ: u32 = 12; // support more than one vq
const VIRTIO_F_ANY_LAYOUT: u32 = 27;
const VIRTIO_RING_F_INDIRECT_DESC: u32 = 28;
const VIRTIO_RING_F_EVENT_IDX: u32 = 29;

// this many virtio descriptors. must be a power of two.
const NUM: usize = 8;

// a single descriptor, from the spec.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct VirtqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

const VRING_DESC_F_NEXT: u16 = 1; // chained with another descriptor
const VRING_DESC_F_WRITE: u16 = 2; // device writes (vs reads)

// the entire avail ring, from the spec.
#[derive(Debug)]
#[repr(C)]
struct VirtqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; NUM],
    unused: u16,
}

// one entry in the used ring, with which the device tells the
// driver about completed requests.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct VirtqUsedElem {
    id: u32, // index of start of completed descriptor chain
    len: u32,
}

#[derive(Debug)]
#[repr(C)]
struct VirtqUsed {
    flags: u16,
    idx: u16,
    ring: [VirtqUsedElem; NUM],
}

// the format of the first descriptor in a disk request. to be
// followed by two more descriptors containing the block, and a
// one-byte status.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
struct VirtioBlkReq {
    typ: u32, // VIRTIO_BLK_T_IN or ..._OUT
    reserved: u32,
    sector: u64,
}

const VIRTIO_BLK_T_IN: u32 = 0; // read the disk
const VIRTIO_BLK_T_OUT: u32 = 1; // write the disk

// the virtqueue pages plus driver bookkeeping; all protected by the
// DISK spinlock.
#[repr(C, align(4096))]
struct DiskInner {
    // the first region is pages of memory shared with the device:
    // the descriptor table, the avail ring, then (on its own page)
    // the used ring. allocated statically so their physical
    // addresses are simply their kernel addresses.
    desc: [VirtqDesc; NUM],
    avail: VirtqAvail,
    pad: Pad,
    used: VirtqUsed,

    // our own book-keeping.
    free: [bool; NUM], // is a descriptor free?
    used_idx: u16,     // we've looked this far in used.ring.

    // the request headers, one per in-flight descriptor chain, and
    // per-chain completion state.
    ops: [VirtioBlkReq; NUM],
    status: [u8; NUM],
    done: [bool; NUM],
}

// push the used ring onto its own page, as the legacy interface
// requires.
#[repr(C, align(4096))]
struct Pad();

pub struct Disk {
    inner: Mutex<DiskInner>,
}

#[inline]
fn reg_read(r: usize) -> u32 {
    unsafe { ptr::read_volatile((VIRTIO0 + r) as *const u32) }
}

#[inline]
fn reg_write(r: usize, v: u32) {
    unsafe { ptr::write_volatile((VIRTIO0 + r) as *mut u32, v) }
}

impl Disk {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(
                DiskInner {
                    desc: [VirtqDesc {
                        addr: 0,
                        len: 0,
                        flags: 0,
                        next: 0,
                    }; NUM],
                    avail: VirtqAvail {
                        flags: 0,
                        idx: 0,
                        ring: [0; NUM],
                        unused: 0,
                    },
                    pad: Pad(),
                    used: VirtqUsed {
                        flags: 0,
                        idx: 0,
                        ring: [VirtqUsedElem { id: 0, len: 0 }; NUM],
                    },
                    free: [true; NUM],
                    used_idx: 0,
                    ops: [VirtioBlkReq {
                        typ: 0,
                        reserved: 0,
                        sector: 0,
                    }; NUM],
                    status: [0; NUM],
                    done: [false; NUM],
                },
                "virtio_disk",
            ),
        }
    }
}

pub fn init() {
    assert!(
        reg_read(VIRTIO_MMIO_MAGIC_VALUE) == 0x7472_6976
            && reg_read(VIRTIO_MMIO_VERSION) == 1
            && reg_read(VIRTIO_MMIO_DEVICE_ID) == 2
            && reg_read(VIRTIO_MMIO_VENDOR_ID) == 0x554d_4551,
        "could not find virtio disk"
    );

    let mut status: u32 = 0;
    status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
    reg_write(VIRTIO_MMIO_STATUS, status);
    status |= VIRTIO_CONFIG_S_DRIVER;
    reg_write(VIRTIO_MMIO_STATUS, status);

    // negotiate features
    let mut features = reg_read(VIRTIO_MMIO_DEVICE_FEATURES);
    features &= !(1 << VIRTIO_BLK_F_RO);
    features &= !(1 << VIRTIO_BLK_F_SCSI);
    features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
    features &= !(1 << VIRTIO_BLK_F_MQ);
    features &= !(1 << VIRTIO_F_ANY_LAYOUT);
    features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
    features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
    reg_write(VIRTIO_MMIO_DRIVER_FEATURES, features);

    // tell device that feature negotiation is complete.
    status |= VIRTIO_CONFIG_S_FEATURES_OK;
    reg_write(VIRTIO_MMIO_STATUS, status);

    // tell device we're completely ready.
    status |= VIRTIO_CONFIG_S_DRIVER_OK;
    reg_write(VIRTIO_MMIO_STATUS, status);

    reg_write(VIRTIO_MMIO_GUEST_PAGE_SIZE, crate::riscv::PGSIZE as u32);

    // initialize queue 0.
    reg_write(VIRTIO_MMIO_QUEUE_SEL, 0);
    let max = reg_read(VIRTIO_MMIO_QUEUE_NUM_MAX);
    assert!(max != 0, "virtio disk has no queue 0");
    assert!(max >= NUM as u32, "virtio disk max queue too short");
    reg_write(VIRTIO_MMIO_QUEUE_NUM, NUM as u32);

    // write the physical page number of the first page of the
    // queue's memory.
    let inner = unsafe { DISK.inner.get_mut() };
    let pfn = (inner as *const DiskInner as usize) >> crate::riscv::PGSHIFT;
    reg_write(VIRTIO_MMIO_QUEUE_PFN, pfn as u32);
}

impl DiskInner {
    // find a free descriptor, mark it non-free, return its index.
    fn alloc_desc(&mut self) -> Option<usize> {
        for (i, f) in self.free.iter_mut().enumerate() {
            if *f {
                *f = false;
                return Some(i);
            }
        }
        None
    }

    fn free_desc(&mut self, i: usize) {
        assert!(!self.free[i], "virtio: free_desc");
        self.desc[i] = VirtqDesc::default();
        self.free[i] = true;
    }

    // allocate three descriptors (they need not be contiguous).
    // disk transfers always use three: one for the request header,
    // one for the data, one for the one-byte status result.
    fn alloc3_desc(&mut self) -> Option<[usize; 3]> {
        let mut idx = [0; 3];
        for i in 0..3 {
            match self.alloc_desc() {
                Some(d) => idx[i] = d,
                None => {
                    for d in &idx[..i] {
                        self.free_desc(*d);
                    }
                    return None;
                }
            }
        }
        Some(idx)
    }
}

impl Disk {
    pub fn rw(&self, b: &mut BufGuard, write: bool) {
        // the spec's blk section says the sector unit is 512 bytes.
        let sector = b.blockno() as u64 * (BSIZE / 512) as u64;

        let mut inner = self.inner.lock();

        // allocate the three descriptors.
        let idx;
        loop {
            match inner.alloc3_desc() {
                Some(i) => {
                    idx = i;
                    break;
                }
                None => {
                    // wait for free() to wake us up.
                    let chan = &inner.free as *const _ as usize;
                    inner = proc::sleep(chan, inner);
                }
            }
        }

        // format the three descriptors.
        {
            let d = &mut *inner;

            d.ops[idx[0]] = VirtioBlkReq {
                typ: if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN },
                reserved: 0,
                sector,
            };

            d.desc[idx[0]] = VirtqDesc {
                addr: &d.ops[idx[0]] as *const _ as u64,
                len: core::mem::size_of::<VirtioBlkReq>() as u32,
                flags: VRING_DESC_F_NEXT,
                next: idx[1] as u16,
            };

            d.desc[idx[1]] = VirtqDesc {
                addr: b.as_ptr() as u64,
                len: BSIZE as u32,
                flags: if write { 0 } else { VRING_DESC_F_WRITE } | VRING_DESC_F_NEXT,
                next: idx[2] as u16,
            };

            d.status[idx[0]] = 0xff; // device writes 0 on success
            d.desc[idx[2]] = VirtqDesc {
                addr: &d.status[idx[0]] as *const _ as u64,
                len: 1,
                flags: VRING_DESC_F_WRITE,
                next: 0,
            };

            // record that this chain is in flight.
            d.done[idx[0]] = false;

            // tell the device the first index in our chain of
            // descriptors.
            let avail_idx = d.avail.idx as usize % NUM;
            d.avail.ring[avail_idx] = idx[0] as u16;

            fence(Ordering::SeqCst);

            // tell the device another avail ring entry is available.
            d.avail.idx = d.avail.idx.wrapping_add(1);
        }

        fence(Ordering::SeqCst);

        reg_write(VIRTIO_MMIO_QUEUE_NOTIFY, 0); // value is queue number

        // wait for intr() to say the request has finished.
        while !inner.done[idx[0]] {
            let chan = &inner.done[idx[0]] as *const _ as usize;
            inner = proc::sleep(chan, inner);
        }

        // disk consistency cannot be assumed after a transfer error.
        let status = unsafe { ptr::read_volatile(&inner.status[idx[0]]) };
        assert!(status == 0, "virtio_disk: i/o error");

        for d in idx {
            inner.free_desc(d);
        }
        proc::wakeup(&inner.free as *const _ as usize);
    }

    pub fn intr(&self) {
        let mut inner = self.inner.lock();

        // the device won't raise another interrupt until we tell it
        // we've seen this one, which the following line does. this
        // may race with the device writing new entries to the used
        // ring, in which case we may process the new completion
        // entries in this interrupt, and have nothing to do in the
        // next interrupt, which is harmless.
        reg_write(
            VIRTIO_MMIO_INTERRUPT_ACK,
            reg_read(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3,
        );

        fence(Ordering::SeqCst);

        // the device increments used.idx when it adds an entry to
        // the used ring; read device-written memory volatilely.
        while inner.used_idx != unsafe { ptr::read_volatile(&inner.used.idx) } {
            fence(Ordering::SeqCst);
            let slot = inner.used_idx as usize % NUM;
            let id = unsafe { ptr::read_volatile(&inner.used.ring[slot]) }.id as usize;

            inner.done[id] = true;
            proc::wakeup(&inner.done[id] as *const _ as usize);

            inner.used_idx = inner.used_idx.wrapping_add(1);
        }
    }
}

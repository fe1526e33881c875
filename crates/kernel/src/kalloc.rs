// Physical memory management.
//
// One buddy arena serves every allocation the kernel makes after
// boot, from small Box'd objects up to whole user frames and kernel
// stacks; its memory is the RAM between the end of the kernel image
// and PHYSTOP. The same lock also guards a table with one reference
// count per page frame, which copy-on-write fork uses to share
// frames between address spaces: vm::free_frame returns a frame to
// the arena exactly when release() says the last reference is gone.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::buddy::BuddyAllocator;
use crate::memlayout::{KERNBASE, PHYSTOP};
use crate::riscv::PGSIZE;
use crate::spinlock::Mutex;

unsafe extern "C" {
    // first address after the kernel image, defined by kernel.ld.
    static mut end: [u8; 0];
}

const NFRAME: usize = (PHYSTOP - KERNBASE) / PGSIZE;

#[global_allocator]
pub static KMEM: Kmem = Kmem {
    inner: Mutex::new(
        KmemInner {
            buddy: BuddyAllocator::new(),
            refs: [0; NFRAME],
        },
        "kmem",
    ),
};

pub struct Kmem {
    inner: Mutex<KmemInner>,
}

struct KmemInner {
    buddy: BuddyAllocator,
    // copy-on-write sharing counts, one per frame in
    // [KERNBASE, PHYSTOP), indexed by physical page number. Zero
    // means the frame is not a tracked user frame at all.
    refs: [u16; NFRAME],
}

#[alloc_error_handler]
fn on_oom(layout: Layout) -> ! {
    panic!("kmem: allocation of {} bytes failed", layout.size())
}

unsafe impl GlobalAlloc for Kmem {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.inner.lock().buddy.alloc(layout) {
            Some(p) => p.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.lock().buddy.dealloc(ptr, layout)
    }
}

impl Kmem {
    // table slot for pa, which must be a page frame the arena owns.
    fn frame_index(pa: usize) -> usize {
        assert!(pa.is_multiple_of(PGSIZE), "kmem: {pa:#x} is not a frame");
        assert!(
            (KERNBASE..PHYSTOP).contains(&pa),
            "kmem: frame {pa:#x} out of range"
        );
        (pa - KERNBASE) / PGSIZE
    }

    // start tracking a freshly allocated user frame; it enters with
    // exactly one reference.
    pub fn track(&self, pa: usize) {
        let idx = Self::frame_index(pa);
        let mut inner = self.inner.lock();
        assert!(inner.refs[idx] == 0, "kmem: frame {pa:#x} already tracked");
        inner.refs[idx] = 1;
    }

    // another mapping now shares the frame.
    pub fn retain(&self, pa: usize) {
        let idx = Self::frame_index(pa);
        let mut inner = self.inner.lock();
        let n = inner.refs[idx];
        assert!(n > 0, "kmem: retain of untracked frame {pa:#x}");
        inner.refs[idx] = n.checked_add(1).expect("kmem: sharing count overflow");
    }

    // drop one reference and return how many remain; at zero the
    // caller owns the frame again and is expected to free it.
    pub fn release(&self, pa: usize) -> u16 {
        let idx = Self::frame_index(pa);
        let mut inner = self.inner.lock();
        let n = inner.refs[idx];
        assert!(n > 0, "kmem: release of untracked frame {pa:#x}");
        inner.refs[idx] = n - 1;
        inner.refs[idx]
    }

    // how many mappings share the frame right now.
    pub fn holders(&self, pa: usize) -> u16 {
        let idx = Self::frame_index(pa);
        self.inner.lock().refs[idx]
    }
}

// Give the arena everything between the kernel image and PHYSTOP.
pub fn init() {
    let heap_start = unsafe { &raw const end } as usize;
    KMEM.inner
        .lock()
        .buddy
        .init(heap_start, PHYSTOP)
        .expect("kmem: bad arena");
}

pub fn free_pages() -> usize {
    KMEM.inner.lock().buddy.free_bytes() / PGSIZE
}

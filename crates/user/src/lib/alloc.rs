// User-space heap: the classic K&R first-fit free list over sbrk(),
// with 16-byte header units so everything stays 16-byte aligned.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::mutex::Mutex;
use crate::sys;

#[global_allocator]
static ALLOCATOR: UserAllocator = UserAllocator {
    state: Mutex::new(Heap { freep: ptr::null_mut() }),
};

const UNIT: usize = 16;
// grow the heap by at least this many units at a time.
const MIN_GROW: usize = 4096 / UNIT;

#[repr(C, align(16))]
struct Header {
    next: *mut Header,
    size: usize, // in header units, including this header
}

struct Heap {
    freep: *mut Header,
}

unsafe impl Send for Heap {}

struct UserAllocator {
    state: Mutex<Heap>,
}

impl Heap {
    unsafe fn free(&mut self, block: *mut Header) {
        unsafe {
            if self.freep.is_null() {
                // first free: make a one-element circular list.
                (*block).next = block;
                self.freep = block;
                return;
            }
            // walk to the insertion point, keeping the list sorted
            // by address so adjacent blocks can coalesce.
            let mut p = self.freep;
            while !(block > p && block < (*p).next) {
                if p >= (*p).next && (block > p || block < (*p).next) {
                    break; // at one end of the arena
                }
                p = (*p).next;
            }
            if (p as usize) + (*p).size * UNIT == block as usize {
                // join with the lower neighbor.
                (*p).size += (*block).size;
            } else {
                (*block).next = (*p).next;
                (*p).next = block;
                p = block;
            }
            let upper = (*p).next;
            if (p as usize) + (*p).size * UNIT == upper as usize {
                // join with the upper neighbor.
                (*p).size += (*upper).size;
                (*p).next = (*upper).next;
            }
            self.freep = p;
        }
    }

    unsafe fn morecore(&mut self, nunits: usize) -> bool {
        let nunits = core::cmp::max(nunits, MIN_GROW);
        let Ok(addr) = sys::sbrk((nunits * UNIT) as isize) else {
            return false;
        };
        let block = addr as *mut Header;
        unsafe {
            (*block).size = nunits;
            self.free(block);
        }
        true
    }

    unsafe fn malloc(&mut self, nunits: usize) -> *mut u8 {
        unsafe {
            loop {
                if self.freep.is_null() {
                    if !self.morecore(nunits) {
                        return ptr::null_mut();
                    }
                    continue;
                }
                let mut prev = self.freep;
                let mut p = (*prev).next;
                loop {
                    if (*p).size >= nunits {
                        if (*p).size == nunits {
                            if p == (*p).next {
                                // last block on the list.
                                self.freep = ptr::null_mut();
                            } else {
                                (*prev).next = (*p).next;
                                self.freep = prev;
                            }
                        } else {
                            // carve the tail off a bigger block.
                            (*p).size -= nunits;
                            let tail = (p as usize + (*p).size * UNIT) as *mut Header;
                            (*tail).size = nunits;
                            p = tail;
                            self.freep = prev;
                        }
                        return p.add(1) as *mut u8;
                    }
                    if p == self.freep {
                        // wrapped around: nothing big enough.
                        break;
                    }
                    prev = p;
                    p = (*p).next;
                }
                if !self.morecore(nunits) {
                    return ptr::null_mut();
                }
            }
        }
    }
}

fn units_for(layout: Layout) -> Option<usize> {
    if layout.align() > UNIT {
        return None;
    }
    Some(layout.size().div_ceil(UNIT) + 1)
}

unsafe impl GlobalAlloc for UserAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let Some(nunits) = units_for(layout) else {
            return ptr::null_mut();
        };
        unsafe { self.state.lock().malloc(nunits) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let block = unsafe { (ptr as *mut Header).sub(1) };
        unsafe { self.state.lock().free(block) }
    }
}

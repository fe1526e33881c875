// Sv39 page tables, typed addresses, and the user/kernel address
// spaces built on them.
//
// A page table is one 4 KiB page of 512 PTEs; three levels of 9-bit
// indices translate a 39-bit virtual address. Uvm wraps a process's
// table, Kvm the kernel's single direct-mapped one. Physical frames
// for user memory are allocated as Page objects from the kernel
// allocator and tracked by kalloc's per-frame reference counts so
// copy-on-write forks can share them.

use alloc::boxed::Box;
use core::alloc::Layout;
use core::ops::{Add, AddAssign, Sub, SubAssign};

use crate::error::{Error::*, Result};
use crate::kalloc::KMEM;
use crate::memlayout::{
    KERNBASE, PHYSTOP, PLIC, SIFIVE_TEST, STACK_PAGE_NUM, TRAMPOLINE, UART0, VIRTIO0,
};
use crate::proc::PROCS;
use crate::riscv::registers::satp;
use crate::riscv::{PGSHIFT, PGSIZE, pgrounddown, pgroundup, pteflags::*, sfence_vma};
use crate::sync::OnceLock;
use crate::trampoline::trampoline;

pub static KVM: OnceLock<Kvm> = OnceLock::new();

unsafe extern "C" {
    // kernel.ld places these at the ends of the kernel text/image.
    static etext: [u8; 0];
}

pub trait Addr:
    Copy
    + Ord
    + From<usize>
    + Add<usize, Output = Self>
    + AddAssign<usize>
    + Sub<Self, Output = usize>
{
    const MAXVA: usize = 1 << (9 + 9 + 9 + 12 - 1);

    fn into_usize(self) -> usize;
    fn get(&self) -> &usize;

    fn is_aligned(&self) -> bool {
        self.get().is_multiple_of(PGSIZE)
    }

    fn rounddown(&mut self);
    fn roundup(&mut self);
}

macro_rules! define_addr {
    ($name:ident) => {
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }
        }

        impl From<usize> for $name {
            fn from(addr: usize) -> Self {
                Self(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;
            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl AddAssign<usize> for $name {
            fn add_assign(&mut self, rhs: usize) {
                self.0 += rhs;
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;
            fn sub(self, rhs: $name) -> usize {
                self.0 - rhs.0
            }
        }

        impl SubAssign<usize> for $name {
            fn sub_assign(&mut self, rhs: usize) {
                self.0 -= rhs;
            }
        }

        impl Addr for $name {
            fn into_usize(self) -> usize {
                self.0
            }

            fn get(&self) -> &usize {
                &self.0
            }

            fn rounddown(&mut self) {
                self.0 = pgrounddown(self.0);
            }

            fn roundup(&mut self) {
                self.0 = pgroundup(self.0);
            }
        }
    };
}

define_addr!(UVAddr);
define_addr!(KVAddr);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct PAddr(usize);

impl PAddr {
    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl From<usize> for PAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

// An address that either_copyin/either_copyout can interpret:
// user addresses go through the current page table, kernel and
// physical ones are direct.
#[derive(Debug, Clone, Copy)]
pub enum VirtAddr {
    User(UVAddr),
    Kernel(usize),
}

impl From<UVAddr> for VirtAddr {
    fn from(addr: UVAddr) -> Self {
        Self::User(addr)
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self {
        match self {
            Self::User(a) => Self::User(a + rhs),
            Self::Kernel(a) => Self::Kernel(a + rhs),
        }
    }
}

impl AddAssign<usize> for VirtAddr {
    fn add_assign(&mut self, rhs: usize) {
        *self = *self + rhs;
    }
}

// A frame of user memory or a kernel stack, allocated through the
// global allocator so it comes 4 KiB-aligned off the buddy.
#[repr(C, align(4096))]
pub struct Page([u8; PGSIZE]);

#[repr(C, align(4096))]
pub struct Stack([u8; PGSIZE * STACK_PAGE_NUM]);

pub trait PageAllocator: Sized {
    // Allocate one zeroed object; null becomes None.
    //
    // # Safety
    // The caller owns the raw allocation and must eventually free it
    // with Box::from_raw (directly or via unmap with do_free).
    unsafe fn try_new_zeroed() -> Option<*mut Self> {
        let p = unsafe { alloc::alloc::alloc_zeroed(Layout::new::<Self>()) } as *mut Self;
        if p.is_null() { None } else { Some(p) }
    }
}

impl PageAllocator for Page {}
impl PageAllocator for Stack {}

impl Clone for Page {
    fn clone(&self) -> Self {
        Page(self.0)
    }
}

// one Sv39 page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(usize);

const PTE_FLAG_MASK: usize = 0x3FF;

impl Pte {
    fn new(pa: PAddr, flags: usize) -> Self {
        assert!(flags & !PTE_FLAG_MASK == 0, "pte: flags out of range");
        Self(((pa.0 >> PGSHIFT) << 10) | flags)
    }

    pub fn is_v(&self) -> bool {
        self.0 & PTE_V != 0
    }

    pub fn is_r(&self) -> bool {
        self.0 & PTE_R != 0
    }

    pub fn is_w(&self) -> bool {
        self.0 & PTE_W != 0
    }

    pub fn is_u(&self) -> bool {
        self.0 & PTE_U != 0
    }

    pub fn is_cow(&self) -> bool {
        self.0 & PTE_COW != 0
    }

    // a PTE with any of R/W/X set maps a page; otherwise it points
    // at the next level of the tree.
    pub fn is_leaf(&self) -> bool {
        self.0 & (PTE_R | PTE_W | PTE_X) != 0
    }

    pub fn to_pa(&self) -> PAddr {
        PAddr((self.0 >> 10) << PGSHIFT)
    }

    pub fn flags(&self) -> usize {
        self.0 & PTE_FLAG_MASK
    }

    fn set(&mut self, pa: PAddr, flags: usize) {
        *self = Self::new(pa, flags);
    }

    fn set_flags(&mut self, flags: usize) {
        assert!(flags & !PTE_FLAG_MASK == 0, "pte: flags out of range");
        self.0 = (self.0 & !PTE_FLAG_MASK) | flags;
    }

    fn clear(&mut self) {
        self.0 = 0;
    }
}

#[repr(C, align(4096))]
pub struct RawPageTable([Pte; 512]);

impl PageAllocator for RawPageTable {}

// extract the three 9-bit page table indices from a virtual address.
#[inline]
const fn px(level: usize, va: usize) -> usize {
    (va >> (PGSHIFT + 9 * level)) & 0x1FF
}

// The table walk shared by Uvm and Kvm. Returns the address of the
// level-0 PTE for va, optionally allocating interior tables.
fn walk_raw<'a>(root: *mut RawPageTable, va: usize, alloc: bool) -> Option<&'a mut Pte> {
    assert!(va < UVAddr::MAXVA, "walk");
    let mut pagetable = root;
    for level in [2, 1] {
        let pte = unsafe { &mut (*pagetable).0[px(level, va)] };
        if pte.is_v() {
            assert!(!pte.is_leaf(), "walk: leaf in interior node");
            pagetable = pte.to_pa().0 as *mut RawPageTable;
        } else {
            if !alloc {
                return None;
            }
            let mem = unsafe { RawPageTable::try_new_zeroed() }?;
            pte.set(PAddr(mem as usize), PTE_V);
            pagetable = mem;
        }
    }
    Some(unsafe { &mut (*pagetable).0[px(0, va)] })
}

fn mappages_raw(
    root: *mut RawPageTable,
    va: usize,
    pa: usize,
    size: usize,
    perm: usize,
) -> Result<()> {
    assert!(va.is_multiple_of(PGSIZE), "mappages: va not aligned");
    assert!(size.is_multiple_of(PGSIZE), "mappages: size not aligned");
    assert!(size > 0, "mappages: size");

    let mut a = va;
    let mut pa = pa;
    let last = va + size - PGSIZE;
    loop {
        let pte = walk_raw(root, a, true).ok_or(OutOfMemory)?;
        assert!(!pte.is_v(), "mappages: remap");
        pte.set(PAddr(pa), perm | PTE_V);
        if a == last {
            break;
        }
        a += PGSIZE;
        pa += PGSIZE;
    }
    Ok(())
}

// Recursively free interior page-table pages. All leaf mappings
// must already have been removed.
fn freewalk(root: *mut RawPageTable) {
    for i in 0..512 {
        let pte = unsafe { &mut (*root).0[i] };
        if pte.is_v() && !pte.is_leaf() {
            freewalk(pte.to_pa().0 as *mut RawPageTable);
            pte.clear();
        } else if pte.is_v() {
            panic!("freewalk: leaf");
        }
    }
    unsafe { drop(Box::from_raw(root)) };
}

// a process's user page table.
#[derive(Debug)]
pub struct Uvm {
    root: *mut RawPageTable,
}

unsafe impl Send for Uvm {}

impl Uvm {
    // an empty user page table.
    pub fn create() -> Result<Uvm> {
        let root = unsafe { RawPageTable::try_new_zeroed() }.ok_or(OutOfMemory)?;
        Ok(Uvm { root })
    }

    pub fn as_satp(&self) -> usize {
        satp::make(self.root as usize)
    }

    pub fn walk(&mut self, va: UVAddr, alloc: bool) -> Option<&mut Pte> {
        walk_raw(self.root, va.into_usize(), alloc)
    }

    // Look up a user-accessible address; returns the physical page
    // base, or None if not mapped with PTE_U.
    pub fn walkaddr(&mut self, va: UVAddr) -> Option<PAddr> {
        if va.into_usize() >= UVAddr::MAXVA {
            return None;
        }
        let pte = self.walk(va, false)?;
        if !pte.is_v() || !pte.is_u() {
            return None;
        }
        Some(pte.to_pa())
    }

    // Create PTEs for virtual addresses starting at va that refer to
    // physical addresses starting at pa.
    pub fn mappages(&mut self, va: UVAddr, pa: PAddr, size: usize, perm: usize) -> Result<()> {
        mappages_raw(self.root, va.into_usize(), pa.0, size, perm)
    }

    // Remove npages of mappings starting from va, which must be
    // page-aligned and mapped. If do_free, drop a reference on each
    // frame and release those that reach zero.
    pub fn unmap(&mut self, va: UVAddr, npages: usize, do_free: bool) {
        self.try_unmap(va, npages, do_free).expect("uvmunmap")
    }

    pub fn try_unmap(&mut self, va: UVAddr, npages: usize, do_free: bool) -> Result<()> {
        if !va.is_aligned() {
            return Err(BadVirtAddr);
        }
        let mut a = va;
        for _ in 0..npages {
            let pte = self.walk(a, false).ok_or(BadVirtAddr)?;
            if !pte.is_v() {
                return Err(BadVirtAddr);
            }
            assert!(pte.is_leaf(), "unmap: not a leaf");
            let pa = pte.to_pa();
            pte.clear();
            if do_free {
                free_frame(pa);
            }
            a += PGSIZE;
        }
        sfence_vma();
        Ok(())
    }

    // Allocate PTEs and physical memory to grow the process from
    // oldsz to newsz; newsz need not be page aligned. Returns the
    // new size.
    pub fn alloc(&mut self, oldsz: usize, newsz: usize, xperm: usize) -> Result<usize> {
        if newsz < oldsz {
            return Ok(oldsz);
        }
        let oldsz = pgroundup(oldsz);
        let mut a = oldsz;
        while a < newsz {
            let Some(mem) = (unsafe { Page::try_new_zeroed() }) else {
                self.dealloc(a, oldsz);
                return Err(OutOfMemory);
            };
            if let Err(err) = self.mappages(
                UVAddr::from(a),
                PAddr(mem as usize),
                PGSIZE,
                PTE_R | PTE_U | xperm,
            ) {
                unsafe { drop(Box::from_raw(mem)) };
                self.dealloc(a, oldsz);
                return Err(err);
            }
            KMEM.track(mem as usize);
            a += PGSIZE;
        }
        Ok(newsz)
    }

    // Deallocate user pages to bring the process size from oldsz to
    // newsz, returning the new size.
    pub fn dealloc(&mut self, oldsz: usize, newsz: usize) -> usize {
        if newsz >= oldsz {
            return oldsz;
        }
        if pgroundup(newsz) < pgroundup(oldsz) {
            let npages = (pgroundup(oldsz) - pgroundup(newsz)) / PGSIZE;
            self.unmap(UVAddr::from(pgroundup(newsz)), npages, true);
        }
        newsz
    }

    // mark a PTE invalid for user access; used for the stack guard
    // page below the initial user stack.
    pub fn clear(&mut self, va: UVAddr) {
        let pte = self.walk(va, false).expect("uvmclear");
        pte.set_flags(pte.flags() & !PTE_U);
    }

    // Copy this address space into a fresh one for fork, sharing the
    // frames copy-on-write: writable user pages lose PTE_W and gain
    // PTE_COW in both parent and child, and every shared frame gains
    // a reference.
    pub fn copy(&mut self, child: &mut Uvm, sz: usize) -> Result<()> {
        let mut a = 0;
        while a < sz {
            let pte = self
                .walk(UVAddr::from(a), false)
                .expect("uvmcopy: pte should exist");
            assert!(pte.is_v(), "uvmcopy: page not present");
            let pa = pte.to_pa();
            let flags = if pte.is_w() && pte.is_u() {
                pte.set_flags((pte.flags() & !PTE_W) | PTE_COW);
                pte.flags()
            } else {
                pte.flags()
            };
            if let Err(err) = child.mappages(UVAddr::from(a), pa, PGSIZE, flags) {
                self.copy_rollback(child, a);
                return Err(err);
            }
            KMEM.retain(pa.0);
            a += PGSIZE;
        }
        sfence_vma();
        Ok(())
    }

    // Undo a partial copy(): release the child's mappings and give
    // the parent back write access to frames nobody shares anymore.
    fn copy_rollback(&mut self, child: &mut Uvm, done: usize) {
        if done > 0 {
            child.unmap(UVAddr::from(0), done / PGSIZE, true);
        }
        let mut a = 0;
        while a < done {
            let pte = self
                .walk(UVAddr::from(a), false)
                .expect("uvmcopy: rollback pte");
            if pte.is_cow() && KMEM.holders(pte.to_pa().0) == 1 {
                pte.set_flags((pte.flags() | PTE_W) & !PTE_COW);
            }
            a += PGSIZE;
        }
        sfence_vma();
    }

    // Resolve a store fault on a copy-on-write page: replace the
    // shared frame with a private writable copy. A frame with no
    // other reference is simply made writable again.
    pub fn resolve_cow(&mut self, va: UVAddr) -> Result<()> {
        let mut va = va;
        va.rounddown();
        if va.into_usize() >= UVAddr::MAXVA {
            return Err(BadVirtAddr);
        }
        let pte = self.walk(va, false).ok_or(BadVirtAddr)?;
        if !pte.is_v() || !pte.is_u() || !pte.is_cow() {
            return Err(BadVirtAddr);
        }
        let pa = pte.to_pa();

        if KMEM.holders(pa.0) == 1 {
            // sole owner; take the frame back.
            pte.set_flags((pte.flags() | PTE_W) & !PTE_COW);
            sfence_vma();
            return Ok(());
        }

        let flags = (pte.flags() | PTE_W) & !PTE_COW;
        let mem = unsafe { Page::try_new_zeroed() }.ok_or(OutOfMemory)?;
        unsafe {
            core::ptr::copy_nonoverlapping(pa.0 as *const u8, mem as *mut u8, PGSIZE);
        }
        let pte = self.walk(va, false).ok_or(BadVirtAddr)?;
        pte.set(PAddr(mem as usize), flags);
        KMEM.track(mem as usize);
        sfence_vma();
        free_frame(pa);
        Ok(())
    }

    // Copy from kernel to user.
    pub fn copyout<T: ?Sized + crate::defs::AsBytes>(
        &mut self,
        dst: UVAddr,
        src: &T,
    ) -> Result<()> {
        let bytes = src.as_bytes();
        let mut va = dst.into_usize();
        let mut copied = 0;
        while copied < bytes.len() {
            let va0 = pgrounddown(va);
            if va0 >= UVAddr::MAXVA {
                return Err(BadVirtAddr);
            }
            {
                let pte = self.walk(UVAddr::from(va0), false).ok_or(BadVirtAddr)?;
                if !pte.is_v() || !pte.is_u() {
                    return Err(BadVirtAddr);
                }
                if pte.is_cow() {
                    self.resolve_cow(UVAddr::from(va0))?;
                }
            }
            let pte = self.walk(UVAddr::from(va0), false).ok_or(BadVirtAddr)?;
            if !pte.is_w() {
                return Err(BadVirtAddr);
            }
            let pa = pte.to_pa().0;
            let off = va - va0;
            let n = core::cmp::min(PGSIZE - off, bytes.len() - copied);
            unsafe {
                core::ptr::copy_nonoverlapping(
                    bytes.as_ptr().add(copied),
                    (pa + off) as *mut u8,
                    n,
                );
            }
            copied += n;
            va = va0 + PGSIZE;
        }
        Ok(())
    }

    // Copy from user to kernel.
    pub fn copyin<T: ?Sized + crate::defs::AsBytes>(
        &mut self,
        dst: &mut T,
        src: UVAddr,
    ) -> Result<()> {
        let bytes = dst.as_bytes_mut();
        let mut va = src.into_usize();
        let mut copied = 0;
        while copied < bytes.len() {
            let va0 = pgrounddown(va);
            let pa = self.walkaddr(UVAddr::from(va0)).ok_or(BadVirtAddr)?.0;
            let off = va - va0;
            let n = core::cmp::min(PGSIZE - off, bytes.len() - copied);
            unsafe {
                core::ptr::copy_nonoverlapping(
                    (pa + off) as *const u8,
                    bytes.as_mut_ptr().add(copied),
                    n,
                );
            }
            copied += n;
            va = va0 + PGSIZE;
        }
        Ok(())
    }

    // Free user memory pages, then the page-table pages.
    pub fn free(mut self, sz: usize) {
        if sz > 0 {
            self.unmap(UVAddr::from(0), pgroundup(sz) / PGSIZE, true);
        }
        freewalk(self.root);
        self.root = core::ptr::null_mut();
        core::mem::forget(self);
    }
}

impl Drop for Uvm {
    fn drop(&mut self) {
        // an address space must be torn down with free(), which
        // knows its size; getting here is a leak in the making.
        panic!("uvm dropped without free")
    }
}

// drop one reference to a user frame, releasing it at zero.
fn free_frame(pa: PAddr) {
    if KMEM.release(pa.0) == 0 {
        unsafe { drop(Box::from_raw(pa.0 as *mut Page)) };
    }
}

// the kernel's direct-mapped page table.
pub struct Kvm {
    root: *mut RawPageTable,
}

unsafe impl Send for Kvm {}
unsafe impl Sync for Kvm {}

impl Kvm {
    fn make() -> Kvm {
        let root = unsafe { RawPageTable::try_new_zeroed() }.expect("kvm: no memory");
        let mut kvm = Kvm { root };

        let etext_addr = unsafe { etext.as_ptr() } as usize;

        // uart registers
        kvm.map(KVAddr::from(UART0), PAddr(UART0), PGSIZE, PTE_R | PTE_W);
        // virtio mmio disk interface
        kvm.map(KVAddr::from(VIRTIO0), PAddr(VIRTIO0), PGSIZE, PTE_R | PTE_W);
        // PLIC
        kvm.map(KVAddr::from(PLIC), PAddr(PLIC), 0x40_0000, PTE_R | PTE_W);
        // test device, for shutting down qemu
        kvm.map(
            KVAddr::from(SIFIVE_TEST),
            PAddr(SIFIVE_TEST),
            PGSIZE,
            PTE_R | PTE_W,
        );
        // map kernel text executable and read-only.
        kvm.map(
            KVAddr::from(KERNBASE),
            PAddr(KERNBASE),
            etext_addr - KERNBASE,
            PTE_R | PTE_X,
        );
        // map kernel data and the physical RAM we'll make use of.
        kvm.map(
            KVAddr::from(etext_addr),
            PAddr(etext_addr),
            PHYSTOP - etext_addr,
            PTE_R | PTE_W,
        );
        // map the trampoline to the highest virtual address in the
        // kernel.
        kvm.map(
            KVAddr::from(TRAMPOLINE),
            PAddr(trampoline as *const () as usize),
            PGSIZE,
            PTE_R | PTE_X,
        );
        kvm
    }

    pub fn map(&mut self, va: KVAddr, pa: PAddr, size: usize, perm: usize) {
        mappages_raw(self.root, va.into_usize(), pa.0, size, perm).expect("kvmmap");
    }

    pub fn as_satp(&self) -> usize {
        satp::make(self.root as usize)
    }
}

// Initialize the kernel page table and the per-process kernel
// stacks mapped high beneath the trampoline.
pub fn kinit() {
    KVM.set(Kvm::make()).ok().expect("kvm: double init");
    unsafe { PROCS.mapstacks() };
}

// Switch the hart to the kernel page table.
pub fn kinithart() {
    unsafe {
        satp::write(KVM.get().unwrap().as_satp());
    }
    sfence_vma();
}

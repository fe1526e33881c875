use alloc::string::String;
use alloc::sync::Arc;
use alloc::{boxed::Box, vec::Vec};
use core::arch::asm;
use core::cell::UnsafeCell;
use core::mem::size_of;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::defs::AsBytes;
use crate::elf::{self, ElfHdr, ProgHdr};
use crate::error::{Error::*, Result};
use crate::exec::flags2perm;
use crate::file::File;
use crate::fs::{self, Inode, Path};
use crate::log::LOG;
use crate::memlayout::{STACK_PAGE_NUM, TRAMPOLINE, TRAPFRAME, kstack};
use crate::param::{NCPU, NOFILE, NPROC, ROOTDEV};
use crate::riscv::{pgroundup, pteflags::*, *};
use crate::spinlock::{Mutex, MutexGuard};
use crate::swtch::swtch;
use crate::sync::{LazyLock, OnceLock};
use crate::trampoline::trampoline;
use crate::trap::usertrap_ret;
use crate::vm::{Addr, KVAddr, PAddr, PageAllocator, Stack, UVAddr, Uvm, VirtAddr};
use crate::{array, println};

pub static CPUS: Cpus = Cpus::new();

#[allow(clippy::redundant_closure)]
pub static PROCS: LazyLock<Procs> = LazyLock::new(|| Procs::new());
pub static INITPROC: OnceLock<Arc<Proc>> = OnceLock::new();

pub struct Cpus([UnsafeCell<Cpu>; NCPU]);
unsafe impl Sync for Cpus {}

// Per-CPU state
#[derive(Debug)]
pub struct Cpu {
    pub proc: Option<Arc<Proc>>, // The process running on this cpu, or None.
    pub context: Context,        // swtch() here to enter scheduler().
    pub noff: isize,             // Depth of lock_mycpu() nesting.
    pub intena: bool,            // Were interrupts enabled before lock_mycpu()?
}

impl Cpus {
    const fn new() -> Self {
        Self(array![UnsafeCell::new(Cpu::new()); NCPU])
    }

    // # Safety
    // Must be called with interrupts disabled,
    // to prevent race with process being moved
    // to a different CPU.
    #[inline]
    pub unsafe fn cpu_id() -> usize {
        let id;
        unsafe { asm!("mv {0}, tp", out(reg) id) };
        id
    }

    // Return this CPU's cpu struct.
    // # Safety
    // interrupts must be disabled.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn mycpu() -> *mut Cpu {
        let id = unsafe { Self::cpu_id() };
        CPUS.0[id].get()
    }

    // Return the current proc: Some(Arc<Proc>), or None if none.
    pub fn myproc() -> Option<Arc<Proc>> {
        let _intr_lock = Self::lock_mycpu("myproc");
        let c = unsafe { &*Self::mycpu() };
        c.proc.clone()
    }

    // disable interrupts on mycpu().
    // when every IntrLock has dropped, interrupts may recover
    // to the previous state.
    pub fn lock_mycpu(_name: &str) -> IntrLock {
        let old = intr_get();
        intr_off();
        unsafe { (*Self::mycpu()).locked(old) }
    }
}

impl Cpu {
    const fn new() -> Self {
        Self {
            proc: None,
            context: Context::new(),
            noff: 0,
            intena: false,
        }
    }

    fn locked(&mut self, old: bool) -> IntrLock {
        if self.noff == 0 {
            self.intena = old;
        }
        self.noff += 1;
        IntrLock
    }

    pub fn unlock(&mut self) {
        assert!(!intr_get(), "cpu unlock - interruptible");
        assert!(self.noff >= 1, "cpu unlock");
        self.noff -= 1;
        if self.noff == 0 && self.intena {
            intr_on()
        }
    }
}

#[derive(Debug)]
pub struct IntrLock;

impl Drop for IntrLock {
    fn drop(&mut self) {
        unsafe { (*Cpus::mycpu()).unlock() }
    }
}

// Saved registers for kernel context switches.
#[derive(Clone, Copy, Debug)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }

    pub fn write_zero(&mut self) {
        *self = Self::new();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// Per-process data for the trampoline.rs trap handling code, mapped
// at TRAPFRAME in the user page table, just below the trampoline
// page. Not mapped in the kernel page table. uservec in
// trampoline.rs saves user registers here, then reads kernel_sp,
// kernel_hartid and kernel_satp and jumps to the kernel_trap
// address (usertrap()). usertrap_ret() and userret in trampoline.rs
// run the sequence in reverse. The return path never unwinds the
// kernel call stack, so the trapframe also holds the callee-saved
// user registers s0-s11.
#[derive(Clone, Copy, Default, Debug)]
#[repr(C, align(4096))]
pub struct Trapframe {
    // 0
    pub kernel_satp: usize, // kernel page table
    // 8
    pub kernel_sp: usize, // top of process's kernel stack
    // 16
    pub kernel_trap: usize, // usertrap()
    // 24
    pub epc: usize, // saved user program counter
    // 32
    pub kernel_hartid: usize, // saved kernel tp
    // 40
    pub ra: usize,
    // 48
    pub sp: usize,
    // 56
    pub gp: usize,
    // 64
    pub tp: usize,
    // 72
    pub t0: usize,
    // 80
    pub t1: usize,
    // 88
    pub t2: usize,
    // 96
    pub s0: usize,
    // 104
    pub s1: usize,
    // 112
    pub a0: usize,
    // 120
    pub a1: usize,
    // 128
    pub a2: usize,
    // 136
    pub a3: usize,
    // 144
    pub a4: usize,
    // 152
    pub a5: usize,
    // 160
    pub a6: usize,
    // 168
    pub a7: usize,
    // 176
    pub s2: usize,
    // 184
    pub s3: usize,
    // 192
    pub s4: usize,
    // 200
    pub s5: usize,
    // 208
    pub s6: usize,
    // 216
    pub s7: usize,
    // 224
    pub s8: usize,
    // 232
    pub s9: usize,
    // 240
    pub s10: usize,
    // 248
    pub s11: usize,
    // 256
    pub t3: usize,
    // 264
    pub t4: usize,
    // 272
    pub t5: usize,
    // 280
    pub t6: usize,
}

#[derive(Debug)]
pub struct Procs {
    pub pool: [Arc<Proc>; NPROC],
    parents: Mutex<[Option<Arc<Proc>>; NPROC]>,
}
unsafe impl Sync for Procs {}

#[derive(Debug)]
pub struct Proc {
    // process table index.
    idx: usize,
    // lock must be held when using inner data:
    pub inner: Mutex<ProcInner>,
    // these are private to the process, so the lock need not be held.
    pub data: UnsafeCell<ProcData>,
}
unsafe impl Sync for Proc {}

// lock must be held when using these:
#[derive(Clone, Copy, Debug)]
pub struct ProcInner {
    pub state: ProcState, // Process state
    pub chan: usize,      // if non-zero, sleeping on chan
    pub killed: bool,     // if true, have been killed
    pub xstate: i32,      // Exit status to be returned to parent's wait
    pub pid: PId,         // Process ID
}

// These are private to the process, so the lock need not be held.
#[derive(Debug)]
pub struct ProcData {
    pub kstack: KVAddr,                    // Virtual address of kernel stack
    pub sz: usize,                         // Size of user memory (bytes)
    pub uvm: Option<Uvm>,                  // User page table
    pub trapframe: Option<Box<Trapframe>>, // data page for trampoline.rs
    pub context: Context,                  // swtch() here to run process
    pub name: String,                      // Process name (debugging)
    pub ofile: [Option<File>; NOFILE],     // Open files
    pub cwd: Option<Inode>,                // Current directory
}
unsafe impl Sync for ProcData {}
unsafe impl Send for ProcData {}

#[derive(PartialEq, Clone, Copy, Debug)]
pub enum ProcState {
    UNUSED,
    USED,
    SLEEPING,
    RUNNABLE,
    RUNNING,
    ZOMBIE,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PId(usize);

impl PId {
    fn alloc() -> Self {
        static NEXTID: AtomicUsize = AtomicUsize::new(1);
        PId(NEXTID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        let mut i = 0;
        Self {
            pool: core::iter::repeat_with(|| {
                let p = Arc::new(Proc::new(i));
                i += 1;
                p
            })
            .take(NPROC)
            .collect::<Vec<_>>()
            .try_into()
            .unwrap(),
            parents: Mutex::new(
                core::iter::repeat_with(|| None)
                    .take(NPROC)
                    .collect::<Vec<_>>()
                    .try_into()
                    .unwrap(),
                "parents",
            ),
        }
    }

    // Allocate STACK_PAGE_NUM pages for each process's kernel stack.
    // Map them high in memory, each followed by an unmapped guard
    // page.
    pub unsafe fn mapstacks(&self) {
        for (p, _) in self.pool.iter().enumerate() {
            let pa = unsafe { Stack::try_new_zeroed() }.expect("kstack") as usize;
            let va = kstack(p);
            unsafe {
                crate::vm::KVM
                    .get_mut()
                    .unwrap()
                    .map(va, pa.into(), PGSIZE * STACK_PAGE_NUM, PTE_R | PTE_W);
            }
        }
    }

    // Look in the process table for an UNUSED proc. If found,
    // initialize state required to run in the kernel, and return the
    // proc with its "proc" lock held. If there are no free procs, or
    // a memory allocation fails, return an error.
    fn alloc(&self) -> Result<(&Arc<Proc>, MutexGuard<'_, ProcInner>)> {
        for p in self.pool.iter() {
            let mut lock = p.inner.lock();
            match lock.state {
                ProcState::UNUSED => {
                    lock.pid = PId::alloc();
                    lock.state = ProcState::USED;

                    let data = p.data_mut();
                    // Allocate a trapframe page.
                    if let Ok(tf) = Box::<Trapframe>::try_new_zeroed() {
                        data.trapframe.replace(unsafe { tf.assume_init() });
                    } else {
                        p.free(lock);
                        return Err(OutOfMemory);
                    }

                    // An empty user page table.
                    match p.uvmcreate() {
                        Ok(uvm) => {
                            data.uvm.replace(uvm);
                            data.sz = 0;
                        }
                        Err(err) => {
                            p.free(lock);
                            return Err(err);
                        }
                    }

                    // Set up new context to start executing at
                    // fork_ret, which returns to user space.
                    data.context.write_zero();
                    data.context.ra = fork_ret as *const () as usize;
                    data.context.sp = data.kstack.into_usize() + PGSIZE * STACK_PAGE_NUM;
                    return Ok((p, lock));
                }
                _ => continue,
            }
        }
        Err(WouldBlock)
    }
}

// initialize the proc table at boot time.
pub fn init() {
    for (i, proc) in PROCS.pool.iter().enumerate() {
        proc.data_mut().kstack = kstack(i);
    }
}

impl Proc {
    fn new(idx: usize) -> Self {
        Self {
            idx,
            inner: Mutex::new(ProcInner::new(), "proc"),
            data: UnsafeCell::new(ProcData::new()),
        }
    }

    pub fn pid(&self) -> usize {
        self.inner.lock().pid.0
    }

    #[allow(clippy::mut_from_ref)]
    pub fn data(&self) -> &'static ProcData {
        unsafe { &*(self.data.get()) }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn data_mut(&self) -> &'static mut ProcData {
        unsafe { &mut *(self.data.get()) }
    }

    // free a proc structure and the data hanging from it, including
    // user pages. The caller passes in the held "proc" lock.
    fn free(&self, mut guard: MutexGuard<'_, ProcInner>) {
        let data = self.data_mut();
        if let Some(mut uvm) = data.uvm.take() {
            // the trampoline and trapframe mappings do not own their
            // frames; drop the mappings before the page walk is torn
            // down.
            let _ = uvm.try_unmap(TRAMPOLINE.into(), 1, false);
            let _ = uvm.try_unmap(TRAPFRAME.into(), 1, false);
            uvm.free(data.sz);
        }
        data.trapframe.take();
        data.sz = 0;
        data.name.clear();
        guard.pid = PId(0);
        guard.chan = 0;
        guard.killed = false;
        guard.xstate = 0;
        guard.state = ProcState::UNUSED;
    }

    // Create a user page table for this process, with no user
    // memory but with the trampoline and trapframe pages.
    pub fn uvmcreate(&self) -> Result<Uvm> {
        let mut uvm = Uvm::create()?;

        // map the trampoline code (for system call return) at the
        // highest user virtual address. only the supervisor uses it,
        // on the way to/from user space, so not PTE_U.
        if let Err(err) = uvm.mappages(
            UVAddr::from(TRAMPOLINE),
            PAddr::from(trampoline as *const () as usize),
            PGSIZE,
            PTE_R | PTE_X,
        ) {
            uvm.free(0);
            return Err(err);
        }

        let data = self.data();
        // map the trapframe page just below the trampoline page.
        if let Err(err) = uvm.mappages(
            UVAddr::from(TRAPFRAME),
            PAddr::from(data.trapframe.as_deref().unwrap() as *const _ as usize),
            PGSIZE,
            PTE_R | PTE_W,
        ) {
            uvm.unmap(UVAddr::from(TRAMPOLINE), 1, false);
            uvm.free(0);
            return Err(err);
        }

        Ok(uvm)
    }
}

impl ProcInner {
    const fn new() -> Self {
        Self {
            state: ProcState::UNUSED,
            chan: 0,
            killed: false,
            xstate: 0,
            pid: PId(0),
        }
    }
}

impl ProcData {
    fn new() -> Self {
        Self {
            kstack: KVAddr::from(0),
            sz: 0,
            uvm: None,
            trapframe: None,
            context: Context::new(),
            name: String::new(),
            ofile: array![None; NOFILE],
            cwd: None,
        }
    }
}

impl Default for ProcData {
    fn default() -> Self {
        Self::new()
    }
}

pub fn either_copyout<T: ?Sized + AsBytes>(dst: VirtAddr, src: &T) -> Result<()> {
    match dst {
        VirtAddr::User(addr) => {
            let p = Cpus::myproc().unwrap();
            let data = p.data_mut();
            data.uvm.as_mut().unwrap().copyout(addr, src)
        }
        VirtAddr::Kernel(addr) => {
            let src = src.as_bytes();
            let dst = unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, src.len()) };
            dst.copy_from_slice(src);
            Ok(())
        }
    }
}

pub fn either_copyin<T: ?Sized + AsBytes>(dst: &mut T, src: VirtAddr) -> Result<()> {
    match src {
        VirtAddr::User(addr) => {
            let p = Cpus::myproc().unwrap();
            let data = p.data_mut();
            data.uvm.as_mut().unwrap().copyin(dst, addr)
        }
        VirtAddr::Kernel(addr) => {
            let dst = dst.as_bytes_mut();
            let src = unsafe { core::slice::from_raw_parts(addr as *const u8, dst.len()) };
            dst.copy_from_slice(src);
            Ok(())
        }
    }
}

// Set up the first user process, from an embedded ELF image.
pub fn user_init(initcode: &'static [u8]) {
    let (p, ref mut guard) = PROCS.alloc().unwrap();
    INITPROC.set(p.clone()).ok().expect("user_init: twice");

    let data = p.data_mut();
    let uvm = data.uvm.as_mut().unwrap();

    // the embedded image has no alignment guarantee; parse it by
    // copying the headers out.
    let mut elf = ElfHdr::default();
    elf.as_bytes_mut()
        .copy_from_slice(&initcode[..size_of::<ElfHdr>()]);
    assert!(elf.is_valid(), "initcode is not an elf image");

    // Load the program into user memory.
    let mut off = elf.e_phoff;
    let mut sz = 0;
    for _ in 0..elf.e_phnum {
        let mut phdr = ProgHdr::default();
        phdr.as_bytes_mut()
            .copy_from_slice(&initcode[off..(off + size_of::<ProgHdr>())]);
        off += size_of::<ProgHdr>();
        if phdr.p_type != elf::PT_LOAD || phdr.p_fsize == 0 {
            continue;
        }
        assert!(phdr.p_msize >= phdr.p_fsize, "initcode: p_msize < p_fsize");
        let end_vaddr = phdr
            .p_vaddr
            .checked_add(phdr.p_msize)
            .expect("initcode: p_vaddr + p_msize overflow");
        let va = UVAddr::from(phdr.p_vaddr);
        assert!(va.is_aligned(), "initcode segment va not aligned");

        sz = uvm.alloc(sz, end_vaddr, flags2perm(phdr.p_flags)).unwrap();

        // text segments may be mapped without PTE_W, so load bytes
        // by writing to the physical pages directly.
        let src = initcode
            .get(phdr.p_offset..(phdr.p_offset + phdr.p_fsize))
            .expect("initcode: segment range");
        let mut i = 0usize;
        while i < phdr.p_fsize {
            let pa = uvm.walkaddr(va + i).unwrap();
            let n = core::cmp::min(PGSIZE, phdr.p_fsize - i);
            unsafe {
                core::ptr::copy_nonoverlapping(src.as_ptr().add(i), pa.into_usize() as *mut u8, n);
            }
            i += PGSIZE;
        }
    }

    // Allocate two pages at the next page boundary; make the first
    // inaccessible as a stack guard and use the second as the user
    // stack.
    sz = pgroundup(sz);
    sz = uvm.alloc(sz, sz + 2 * PGSIZE, PTE_W).unwrap();
    uvm.clear(From::from(sz - 2 * PGSIZE));

    // prepare for the very first "return" from kernel to user.
    data.sz = sz;
    let tf = data.trapframe.as_mut().unwrap();
    tf.epc = elf.e_entry; // user program counter
    tf.sp = sz; // user stack pointer

    data.name.push_str("initcode");
    guard.state = ProcState::RUNNABLE;
}

// Per-CPU process scheduler.
// The CPU calls scheduler() after setting itself up.
// Scheduler never returns. It loops, doing:
//  - choose a process to run, resuming the scan one past the slot
//    that ran last so every RUNNABLE process gets its turn.
//  - swtch to start running that process.
//  - eventually that process transfers control via swtch back to
//    the scheduler.
pub fn scheduler() -> ! {
    let c = unsafe { Cpus::mycpu() };
    let mut last = NPROC - 1;

    loop {
        // Avoid deadlock by ensuring that devices can interrupt.
        intr_on();

        // One clean sweep: visit every slot exactly once, starting
        // just past the slot that ran last when the sweep began.
        let start = last;
        let mut found = false;
        for off in 0..NPROC {
            let idx = (start + 1 + off) % NPROC;
            let p = &PROCS.pool[idx];
            let mut inner = p.inner.lock();
            if inner.state == ProcState::RUNNABLE {
                // Switch to the chosen process. It is the process's
                // job to release its lock and then reacquire it
                // before jumping back to us.
                inner.state = ProcState::RUNNING;
                last = idx;
                found = true;
                unsafe {
                    (*c).proc.replace(Arc::clone(p));
                    swtch(&mut (*c).context, &p.data().context);
                    // Process is done running for now.
                    // It should have changed its state before coming
                    // back.
                    (*c).proc.take();
                }
            }
        }
        if !found {
            // nothing to do; wait for an interrupt.
            intr_on();
            unsafe { asm!("wfi") };
        }
    }
}

// Switch to the scheduler. Must hold only the "proc" lock and have
// changed proc state. Saves and restores intena because intena is a
// property of this kernel thread, not this CPU.
fn sched<'a>(guard: MutexGuard<'a, ProcInner>, ctx: &mut Context) -> MutexGuard<'a, ProcInner> {
    unsafe {
        let c = &mut *Cpus::mycpu();
        assert!(guard.holding(), "sched proc lock");
        assert!(c.noff == 1, "sched locks");
        assert!(guard.state != ProcState::RUNNING, "sched running");
        assert!(!intr_get(), "sched interruptible");

        let intena = c.intena;
        // to scheduler
        swtch(ctx, &c.context);
        c.intena = intena;

        guard
    }
}

// Give up the CPU for one scheduling round.
pub fn yielding() {
    let p = Cpus::myproc().unwrap();
    let mut guard = p.inner.lock();
    guard.state = ProcState::RUNNABLE;
    let guard = sched(guard, &mut p.data_mut().context);
    drop(guard);
}

// A fork child's very first scheduling by scheduler() will swtch to
// fork_ret().
pub unsafe extern "C" fn fork_ret() -> ! {
    static mut FIRST: bool = true;

    // still holding the "proc" lock from scheduler.
    // force_unlock() because the guard lives on another stack.
    unsafe {
        Cpus::myproc().unwrap().inner.force_unlock();
    }

    if unsafe { FIRST } {
        // File system initialization must be run in the context of a
        // regular process (e.g., because it calls sleep), and thus
        // cannot be run from main().
        unsafe {
            FIRST = false;
        }
        fs::init(ROOTDEV);
        // the root directory becomes init's cwd; namei only works
        // after fs initialization.
        INITPROC.get().unwrap().data_mut().cwd = Some(Path::new("/").namei().unwrap());
    }
    unsafe { usertrap_ret() }
}

// Atomically release a lock and sleep on chan.
// Reacquires the lock when awakened.
pub fn sleep<T>(chan: usize, mutex_guard: MutexGuard<'_, T>) -> MutexGuard<'_, T> {
    // Must acquire the "proc" lock in order to change proc state and
    // then call sched. Once we hold it, we are guaranteed not to
    // miss any wakeup (wakeup locks the "proc" lock), so it's fine
    // to release the caller's lock here.
    let mutex;
    {
        let p = Cpus::myproc().expect("sleep outside process");
        let mut proc_lock = p.inner.lock();
        mutex = Mutex::unlock(mutex_guard);

        proc_lock.chan = chan;
        proc_lock.state = ProcState::SLEEPING;

        // to scheduler
        proc_lock = sched(proc_lock, &mut p.data_mut().context);

        // tidy up
        proc_lock.chan = 0;
    }
    // Reacquire original lock.
    mutex.lock()
}

// Wake up all processes sleeping on chan.
// Must be called without any "proc" lock.
pub fn wakeup(chan: usize) {
    let cur = Cpus::myproc();
    for p in PROCS.pool.iter() {
        if cur.as_ref().is_some_and(|cp| Arc::ptr_eq(p, cp)) {
            continue;
        }
        let mut guard = p.inner.lock();
        if guard.state == ProcState::SLEEPING && guard.chan == chan {
            guard.state = ProcState::RUNNABLE;
        }
    }
}

// Create a new process, copying the parent.
// Sets up the child kernel stack to return as if from fork().
pub fn fork() -> Result<usize> {
    let p = Cpus::myproc().unwrap();
    let p_data = p.data_mut();
    let (c, c_guard) = PROCS.alloc()?;
    let c_data = c.data_mut();

    // Copy user memory from parent to child, copy-on-write.
    let p_uvm = p_data.uvm.as_mut().unwrap();
    let c_uvm = c_data.uvm.as_mut().unwrap();
    if let Err(err) = p_uvm.copy(c_uvm, p_data.sz) {
        c.free(c_guard);
        return Err(err);
    }
    c_data.sz = p_data.sz;

    // copy saved user registers.
    let p_tf = p_data.trapframe.as_ref().unwrap();
    let c_tf = c_data.trapframe.as_mut().unwrap();
    c_tf.clone_from(p_tf);

    // Cause fork to return 0 in the child.
    c_tf.a0 = 0;

    // increment reference counts on open file descriptors.
    c_data.ofile.clone_from_slice(&p_data.ofile);
    c_data.cwd = p_data.cwd.clone();

    c_data.name.clear();
    c_data.name.push_str(&p_data.name);

    let pid = c_guard.pid;

    let c_inner = Mutex::unlock(c_guard);
    {
        let mut parents = PROCS.parents.lock();
        parents[c.idx] = Some(Arc::clone(&p));
    }
    c_inner.lock().state = ProcState::RUNNABLE;

    Ok(pid.0)
}

// Exit the current process. Does not return.
// An exited process remains in the zombie state until its parent
// calls wait().
pub fn exit(status: i32) -> ! {
    let p = Cpus::myproc().unwrap();
    assert!(!Arc::ptr_eq(&p, INITPROC.get().unwrap()), "init exiting");

    // Close all open files.
    let data = p.data_mut();
    for fd in data.ofile.iter_mut() {
        let _file = fd.take();
    }

    LOG.begin_op();
    {
        let _ip = data.cwd.take();
    }
    LOG.end_op();

    let mut proc_guard;
    {
        let mut parents = PROCS.parents.lock();
        // Pass p's abandoned children to init.
        let initproc = INITPROC.get().unwrap();
        let mut wake_init = false;
        for opp in parents.iter_mut() {
            let is_parent = opp.as_ref().is_some_and(|pp| Arc::ptr_eq(pp, &p));
            if is_parent {
                opp.replace(Arc::clone(initproc));
                wake_init = true;
            }
        }
        if wake_init {
            self::wakeup(Arc::as_ptr(initproc) as usize);
        }
        // Parent might be sleeping in wait().
        self::wakeup(Arc::as_ptr(parents[p.idx].as_ref().unwrap()) as usize);
        proc_guard = p.inner.lock();
        proc_guard.xstate = status;
        proc_guard.state = ProcState::ZOMBIE;
    }

    // jump into the scheduler, never to return.
    sched(proc_guard, &mut data.context);

    panic!("zombie exit");
}

// Wait for a child process to exit; copies its exit status to addr
// (unless null) and returns its pid.
pub fn wait(addr: UVAddr) -> Result<usize> {
    let p = Cpus::myproc().unwrap();
    let mut parents = PROCS.parents.lock();

    loop {
        // Scan through the table looking for exited children.
        let mut havekids = false;
        for c in PROCS.pool.iter() {
            match parents[c.idx] {
                Some(ref pp) if Arc::ptr_eq(pp, &p) => {
                    // make sure the child isn't still in exit() or
                    // swtch().
                    let c_guard = c.inner.lock();
                    havekids = true;
                    if c_guard.state == ProcState::ZOMBIE {
                        // Found one.
                        let pid = c_guard.pid.0;
                        if addr.into_usize() != 0 {
                            let data = p.data_mut();
                            data.uvm
                                .as_mut()
                                .unwrap()
                                .copyout(addr, &c_guard.xstate)?;
                        }
                        c.free(c_guard);
                        parents[c.idx].take();
                        return Ok(pid);
                    }
                }
                _ => continue,
            }
        }

        // No point waiting if we don't have any children.
        if !havekids || p.inner.lock().killed {
            return Err(NoChildProcesses);
        }

        // wait for a child to exit.
        parents = sleep(Arc::as_ptr(&p) as usize, parents);
    }
}

// Kill the process with the given pid. The victim won't exit until
// it tries to return to user space (see usertrap in trap.rs).
pub fn kill(pid: usize) -> Result<()> {
    for p in PROCS.pool.iter() {
        let mut guard = p.inner.lock();
        if guard.pid.0 == pid && guard.state != ProcState::UNUSED {
            guard.killed = true;
            if guard.state == ProcState::SLEEPING {
                // Wake process from sleep().
                guard.state = ProcState::RUNNABLE;
            }
            return Ok(());
        }
    }
    Err(NoSuchProcess)
}

// Grow or shrink user memory by n bytes, for sbrk.
pub fn grow(n: isize) -> Result<()> {
    use core::cmp::Ordering;
    let p = Cpus::myproc().unwrap();
    let data = p.data_mut();
    let mut sz = data.sz;
    let uvm = data.uvm.as_mut().unwrap();

    match n.cmp(&0) {
        Ordering::Greater => {
            let newsz = sz.checked_add(n as usize).ok_or(InvalidArgument)?;
            if newsz >= TRAPFRAME {
                return Err(NoBufferSpace);
            }
            sz = uvm.alloc(sz, newsz, PTE_W)?;
        }
        Ordering::Less => {
            let shrink = (-n) as usize;
            if shrink > sz {
                return Err(InvalidArgument);
            }
            sz = uvm.dealloc(sz, sz - shrink);
        }
        _ => (),
    }
    data.sz = sz;
    Ok(())
}

// Print a process listing to the console, for debugging.
// Runs when a user types ^P on the console.
// No lock, to avoid wedging a stuck machine further.
pub fn dump() {
    println!("");
    for proc in PROCS.pool.iter() {
        let inner = unsafe { proc.inner.get_mut() };
        let data = unsafe { &(*proc.data.get()) };
        if inner.state != ProcState::UNUSED {
            println!(
                "pid: {:?} state: {:?} name: {:?} chan: {}",
                inner.pid, inner.state, data.name, inner.chan
            );
        }
    }
}

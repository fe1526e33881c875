use alloc::string::String;

use crate::elf::{self, ElfHdr, ProgHdr};
use crate::error::{Error::*, Result};
use crate::fs::{IData, Path};
use crate::log::LOG;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::MAXARG;
use crate::proc::Cpus;
use crate::riscv::{PGSIZE, pgroundup, pteflags::*};
use crate::sleeplock::SleepLockGuard;
use crate::vm::{Addr, UVAddr, Uvm, VirtAddr};

pub fn flags2perm(flags: u32) -> usize {
    let mut perm = 0;
    if flags & elf::ELF_PROG_FLAG_EXEC != 0 {
        perm |= PTE_X;
    }
    if flags & elf::ELF_PROG_FLAG_WRITE != 0 {
        perm |= PTE_W;
    }
    perm
}

// tear down a half-built or replaced user image.
fn free_uvm(mut uvm: Uvm, sz: usize) {
    let _ = uvm.try_unmap(TRAMPOLINE.into(), 1, false);
    let _ = uvm.try_unmap(TRAPFRAME.into(), 1, false);
    uvm.free(sz);
}

// Load a program segment into the page table at virtual address va,
// which must be page-aligned; the pages from va to va+sz must
// already be mapped.
fn loadseg(
    uvm: &mut Uvm,
    va: UVAddr,
    ip: &mut SleepLockGuard<'_, IData>,
    offset: usize,
    sz: usize,
) -> Result<()> {
    assert!(va.is_aligned(), "loadseg: va must be aligned");

    let mut i = 0;
    while i < sz {
        let pa = uvm.walkaddr(va + i).expect("loadseg: address should exist");
        let n = core::cmp::min(sz - i, PGSIZE);
        if ip.read(
            VirtAddr::Kernel(pa.into_usize()),
            (offset + i) as u32,
            n,
        )? != n
        {
            return Err(InvalidArgument);
        }
        i += PGSIZE;
    }
    Ok(())
}

pub fn exec(path: &Path, argv: [Option<String>; MAXARG]) -> Result<usize> {
    let p = Cpus::myproc().unwrap();
    let data = p.data_mut();

    LOG.begin_op();

    let res = (|| {
        let ip = path.namei()?;
        let mut ip_guard = ip.lock();

        // Check the ELF header.
        let mut elfhdr = ElfHdr::default();
        let n = ip_guard.read(
            VirtAddr::Kernel(&mut elfhdr as *mut _ as usize),
            0,
            core::mem::size_of::<ElfHdr>(),
        )?;
        if n != core::mem::size_of::<ElfHdr>() || !elfhdr.is_valid() {
            return Err(InvalidArgument);
        }

        let mut uvm = p.uvmcreate()?;
        let mut sz = 0;

        // Load each PT_LOAD program segment.
        let mut off = elfhdr.e_phoff;
        for _ in 0..elfhdr.e_phnum {
            let mut phdr = ProgHdr::default();
            let n = ip_guard.read(
                VirtAddr::Kernel(&mut phdr as *mut _ as usize),
                off as u32,
                core::mem::size_of::<ProgHdr>(),
            )?;
            off += core::mem::size_of::<ProgHdr>();
            if n != core::mem::size_of::<ProgHdr>() {
                free_uvm(uvm, sz);
                return Err(InvalidArgument);
            }
            if phdr.p_type != elf::PT_LOAD {
                continue;
            }
            let va = UVAddr::from(phdr.p_vaddr);
            if phdr.p_msize < phdr.p_fsize
                || phdr.p_vaddr.checked_add(phdr.p_msize).is_none()
                || !va.is_aligned()
            {
                free_uvm(uvm, sz);
                return Err(InvalidArgument);
            }
            match uvm.alloc(sz, phdr.p_vaddr + phdr.p_msize, flags2perm(phdr.p_flags)) {
                Ok(newsz) => sz = newsz,
                Err(err) => {
                    free_uvm(uvm, sz);
                    return Err(err);
                }
            }
            if let Err(err) = loadseg(&mut uvm, va, &mut ip_guard, phdr.p_offset, phdr.p_fsize) {
                free_uvm(uvm, sz);
                return Err(err);
            }
        }
        drop(ip_guard);
        drop(ip);

        // Allocate two pages at the next page boundary; the lower is
        // the stack guard, the upper the user stack.
        sz = pgroundup(sz);
        match uvm.alloc(sz, sz + 2 * PGSIZE, PTE_W) {
            Ok(newsz) => sz = newsz,
            Err(err) => {
                free_uvm(uvm, sz);
                return Err(err);
            }
        }
        uvm.clear(UVAddr::from(sz - 2 * PGSIZE));
        let mut sp = sz;
        let stackbase = sp - PGSIZE;

        // Push argument strings, then prepare the rest of the stack
        // in ustack.
        let mut ustack = [0usize; MAXARG + 1];
        let mut argc = 0;
        for arg in argv.iter() {
            let Some(arg) = arg else {
                break;
            };
            if argc >= MAXARG {
                free_uvm(uvm, sz);
                return Err(InvalidArgument);
            }
            sp -= arg.len() + 1;
            sp -= sp % 16; // riscv sp must be 16-byte aligned
            if sp < stackbase {
                free_uvm(uvm, sz);
                return Err(InvalidArgument);
            }
            let nul = [0u8; 1];
            if uvm.copyout(UVAddr::from(sp), arg.as_bytes()).is_err()
                || uvm.copyout(UVAddr::from(sp + arg.len()), &nul[..]).is_err()
            {
                free_uvm(uvm, sz);
                return Err(BadVirtAddr);
            }
            ustack[argc] = sp;
            argc += 1;
        }
        ustack[argc] = 0;

        // push the array of argv[] pointers.
        sp -= (argc + 1) * core::mem::size_of::<usize>();
        sp -= sp % 16;
        if sp < stackbase || uvm.copyout(UVAddr::from(sp), &ustack[..argc + 1]).is_err() {
            free_uvm(uvm, sz);
            return Err(BadVirtAddr);
        }

        // Save the program name for debugging.
        data.name.clear();
        data.name.push_str(path.file_name());

        // Commit to the new image.
        let oldsz = data.sz;
        let old_uvm = data.uvm.replace(uvm);
        data.sz = sz;
        let tf = data.trapframe.as_mut().unwrap();
        tf.epc = elfhdr.e_entry; // initial program counter = main
        tf.sp = sp; // initial stack pointer
        tf.a1 = sp; // argv for main
        if let Some(old) = old_uvm {
            free_uvm(old, oldsz);
        }

        // this ends up in a0, the first argument to main(argc, argv).
        Ok(argc)
    })();

    LOG.end_op();
    res
}

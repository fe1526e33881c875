// Machine-mode boot: runs on the boot hart's stack set up by
// entry.rs, still with paging off, then drops to supervisor mode in
// main().

use core::arch::asm;
use core::ptr;

use crate::kernelvec::timervec;
use crate::memlayout::{CLINT_MTIME, STACK_PAGE_NUM, clint_mtimecmp};
use crate::param::NCPU;
use crate::riscv::registers::*;

// entry.rs needs one stack per CPU.
#[repr(C, align(16))]
pub struct Stack0(pub [u8; 4096 * STACK_PAGE_NUM * NCPU]);

#[unsafe(no_mangle)]
pub static mut STACK0: Stack0 = Stack0([0; 4096 * STACK_PAGE_NUM * NCPU]);

// a scratch area per CPU for machine-mode timer interrupts;
// timervec uses [0..2] for saved registers, [3] holds the address
// of this hart's mtimecmp register and [4] the tick interval.
static mut TIMER_SCRATCH: [[usize; 5]; NCPU] = [[0; 5]; NCPU];

// cycles between timer interrupts; qemu's mtime runs at 10 MHz,
// so this is about a millisecond.
const TIMER_INTERVAL: usize = 10_000;

unsafe extern "C" {
    fn __kernel_main() -> !;
}

// # Safety
// Runs exactly once per hart, in machine mode, on the entry stack.
pub unsafe fn start() -> ! {
    unsafe {
        // set M Previous Privilege mode to Supervisor, for mret.
        mstatus::set_mpp_supervisor();

        // set M Exception Program Counter to main, for mret.
        mepc::write(__kernel_main as *const () as usize);

        // disable paging for now.
        satp::write(0);

        // delegate all interrupts and exceptions to supervisor mode.
        medeleg::write(0xffff);
        mideleg::write(0xffff);
        sie::write(sie::read() | sie::SEIE | sie::STIE | sie::SSIE);

        // configure Physical Memory Protection to give supervisor
        // mode access to all of physical memory.
        pmp::open_all();

        // allow user mode to read cycle, time and instret.
        mcounteren::write(0x7);

        // ask for clock interrupts.
        timer_init();

        // keep each CPU's hartid in its tp register, for Cpus::cpu_id().
        let id = mhartid::read();
        tp::write(id);

        // switch to supervisor mode and jump to main().
        asm!("mret", options(noreturn))
    }
}

// arrange to receive timer interrupts. they arrive in machine mode
// at timervec in kernelvec.rs, which turns them into software
// interrupts for devintr() in trap.rs.
unsafe fn timer_init() {
    let id = mhartid::read();

    unsafe {
        // ask the CLINT for a timer interrupt.
        let mtimecmp = clint_mtimecmp(id) as *mut usize;
        let mtime = CLINT_MTIME as *const usize;
        ptr::write_volatile(mtimecmp, ptr::read_volatile(mtime) + TIMER_INTERVAL);

        // prepare information in scratch[] for timervec.
        let scratch = &raw mut TIMER_SCRATCH[id];
        (*scratch)[3] = mtimecmp as usize;
        (*scratch)[4] = TIMER_INTERVAL;
        mscratch::write(scratch as usize);

        // set the machine-mode trap handler.
        mtvec::write(timervec as *const () as usize);

        // enable machine-mode interrupts.
        mstatus::set_mie();

        // enable machine-mode timer interrupts.
        mie::write(mie::read() | mie::MTIE);
    }
}

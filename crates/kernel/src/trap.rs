use core::arch::asm;

use crate::kernelvec::kernelvec;
use crate::klog;
use crate::memlayout::{STACK_PAGE_NUM, TRAMPOLINE, UART0_IRQ, VIRTIO0_IRQ};
use crate::plic;
use crate::proc::{self, Cpus, ProcState};
use crate::riscv::{
    registers::{scause::*, *},
    *,
};
use crate::spinlock::Mutex;
use crate::syscall::syscall;
use crate::trampoline::trampoline;
use crate::uart::UART;
use crate::virtio_disk::DISK;
use crate::vm::{Addr, UVAddr};
use crate::{kwarn, println};

unsafe extern "C" {
    fn uservec();
    fn userret();
}

#[derive(PartialEq)]
pub enum Intr {
    Timer,
    Device,
}

pub static TICKS: Mutex<usize> = Mutex::new(0, "time");

// set up to take exceptions and traps while in the kernel.
pub fn inithart() {
    unsafe {
        stvec::write(kernelvec as *const () as usize, stvec::TrapMode::Direct);
    }
}

// handle an interrupt, exception, or system call from user space.
// called from trampoline.rs
#[unsafe(no_mangle)]
pub extern "C" fn usertrap() -> ! {
    assert!(
        sstatus::read().spp() == sstatus::Mode::User,
        "usertrap: not from user mode"
    );
    assert!(!intr_get(), "usertrap: interrupts enabled");

    // send interrupts and exceptions to kerneltrap(),
    // since we're now in the kernel.
    unsafe {
        stvec::write(kernelvec as *const () as usize, stvec::TrapMode::Direct);
    }

    let p = Cpus::myproc().unwrap();
    let data = p.data_mut();
    let tf = data.trapframe.as_mut().unwrap();

    // save user program counter.
    tf.epc = sepc::read();

    let mut which_dev = None;
    match scause::read().cause() {
        Trap::Exception(Exception::UserEnvCall) => {
            // system call

            if p.inner.lock().killed {
                proc::exit(-1)
            }

            // sepc points to the ecall instruction, but we want to
            // return to the next instruction.
            tf.epc += 4;

            // an interrupt will change sepc, scause and sstatus, so
            // don't enable until done with those registers.
            intr_on();

            syscall();
        }
        Trap::Exception(Exception::StorePageFault) => {
            // a write to a copy-on-write page; give the process its
            // own copy, or kill it if the address is bogus.
            let va = UVAddr::from(stval::read());
            let resolved = va.into_usize() < data.sz
                && data.uvm.as_mut().unwrap().resolve_cow(va).is_ok();
            if !resolved {
                kwarn!(
                    "usertrap: store page fault pid={} va={:#x}",
                    p.pid(),
                    va.into_usize()
                );
                p.inner.lock().killed = true;
            }
        }
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        _ => {
            let mut inner = p.inner.lock();
            println!(
                "usertrap(): unexpected scause {:?}, pid={:?}",
                scause::read().cause(),
                inner.pid
            );
            println!(
                "            sepc={:X}, stval={:X}",
                sepc::read(),
                stval::read()
            );
            inner.killed = true;
        }
    }

    if p.inner.lock().killed {
        proc::exit(-1)
    }

    // give up the CPU if this is a timer interrupt.
    if Some(Intr::Timer) == which_dev {
        proc::yielding()
    }

    unsafe { usertrap_ret() }
}

// return to user space
#[unsafe(no_mangle)]
pub unsafe extern "C" fn usertrap_ret() -> ! {
    let p = Cpus::myproc().unwrap();

    // we're about to switch the destination of traps from
    // kerneltrap() to usertrap(), so turn off interrupts until
    // we're back in user space, where usertrap() is correct.
    intr_off();

    // send syscalls, interrupts, and exceptions to uservec in
    // trampoline.rs.
    unsafe {
        stvec::write(
            TRAMPOLINE + (uservec as *const () as usize - trampoline as *const () as usize),
            stvec::TrapMode::Direct,
        );
    }

    let data = p.data_mut();

    // set up trapframe values that uservec will need when the
    // process next traps into the kernel.
    let tf = data.trapframe.as_mut().unwrap();
    tf.kernel_satp = unsafe { satp::read() }.bits();
    tf.kernel_sp = data.kstack.into_usize() + PGSIZE * STACK_PAGE_NUM;
    tf.kernel_trap = usertrap as *const () as usize;
    tf.kernel_hartid = unsafe { Cpus::cpu_id() };

    // tell uservec where this process's trapframe lives.
    unsafe {
        asm!("csrw sscratch, {}", in(reg) crate::memlayout::TRAPFRAME);
    }

    // set up the registers that trampoline.rs's sret will use to get
    // to user space.
    unsafe {
        sstatus::set_spp_user(); // clear SPP to 0 for user mode.
        sstatus::set_spie(); // enable interrupts in user mode.
    }

    // set S Exception Program Counter to the saved user pc.
    sepc::write(tf.epc);

    // tell trampoline.rs the user page table to switch to.
    let satp = data.uvm.as_ref().unwrap().as_satp();

    // jump to userret in trampoline.rs at the top of memory, which
    // switches to the user page table, restores user registers, and
    // switches to user mode with sret.
    let fn_0: usize =
        TRAMPOLINE + (userret as *const () as usize - trampoline as *const () as usize);
    let fn_0: extern "C" fn(usize) -> ! = unsafe { core::mem::transmute(fn_0) };
    fn_0(satp)
}

// interrupts and exceptions from kernel code go here via kernelvec,
// on whatever the current kernel stack is.
#[unsafe(no_mangle)]
pub extern "C" fn kerneltrap() {
    let which_dev;
    let sepc = sepc::read();
    let sstatus = sstatus::read();
    let scause = scause::read();

    assert!(
        sstatus.spp() == sstatus::Mode::Supervisor,
        "kerneltrap: not from supervisor mode"
    );
    assert!(!intr_get(), "kerneltrap: interrupts enabled");

    match scause.cause() {
        Trap::Interrupt(intr)
            if {
                which_dev = devintr(intr);
                which_dev.is_some()
            } => {}
        _ => {
            panic!(
                "kerneltrap: scause = {:?}, sepc = {:x}, stval = {:x}",
                scause.cause(),
                sepc::read(),
                stval::read()
            );
        }
    }

    // give up the CPU if this is a timer interrupt and a process is
    // running.
    let should_yield = if Some(Intr::Timer) != which_dev {
        false
    } else if let Some(p) = Cpus::myproc() {
        p.inner.lock().state == ProcState::RUNNING
    } else {
        false
    };
    if should_yield {
        proc::yielding()
    }

    // the yield may have caused some traps to occur, so restore the
    // trap registers for use by kernelvec's sret.
    sepc::write(sepc);
    sstatus.restore();
}

fn clockintr() {
    let mut ticks = TICKS.lock();
    *ticks += 1;
    klog::tick(*ticks);
    proc::wakeup(&(*ticks) as *const _ as usize);
}

// check if it's an external interrupt or software interrupt, and
// handle it. returns Some(Intr::Timer) for a timer tick,
// Some(Intr::Device) for a device interrupt, None if unrecognized.
fn devintr(intr: Interrupt) -> Option<Intr> {
    match intr {
        Interrupt::SupervisorExternal => {
            // this is a supervisor external interrupt, via PLIC.
            let hart = unsafe { Cpus::cpu_id() };

            // irq indicates which device interrupted.
            let irq = plic::claim(hart);

            match irq {
                UART0_IRQ => UART.intr(),
                VIRTIO0_IRQ => DISK.intr(),
                0 => (), // already claimed
                _ => kwarn!("unexpected interrupt irq={}", irq),
            }

            // the PLIC allows each device to raise at most one
            // interrupt at a time; tell it this one is done.
            if irq != 0 {
                plic::complete(hart, irq);
            }

            Some(Intr::Device)
        }
        Interrupt::SupervisorSoft => {
            // software interrupt from the machine-mode timer
            // interrupt, forwarded by timervec in kernelvec.rs.
            if unsafe { Cpus::cpu_id() } == 0 {
                clockintr();
            }

            // acknowledge the software interrupt by clearing the
            // SSIP bit in sip.
            unsafe {
                sip::clear_ssoft();
            }

            Some(Intr::Timer)
        }
        _ => None,
    }
}

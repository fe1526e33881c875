// the riscv Platform Level Interrupt Controller (PLIC).

use core::ptr;

use crate::memlayout::{PLIC, PLIC_SCLAIM, PLIC_SENABLE, PLIC_SPRIORITY, UART0_IRQ, VIRTIO0_IRQ};

pub fn init() {
    unsafe {
        // set desired IRQ priorities non-zero (otherwise disabled).
        ptr::write_volatile((PLIC + UART0_IRQ as usize * 4) as *mut u32, 1);
        ptr::write_volatile((PLIC + VIRTIO0_IRQ as usize * 4) as *mut u32, 1);
    }
}

pub fn init_hart(hart: usize) {
    unsafe {
        // set enable bits for this hart's S-mode
        // for the uart and virtio disk.
        ptr::write_volatile(
            PLIC_SENABLE(hart) as *mut u32,
            (1 << UART0_IRQ) | (1 << VIRTIO0_IRQ),
        );

        // set this hart's S-mode priority threshold to 0.
        ptr::write_volatile(PLIC_SPRIORITY(hart) as *mut u32, 0);
    }
}

// ask the PLIC what interrupt we should serve.
pub fn claim(hart: usize) -> u32 {
    unsafe { ptr::read_volatile(PLIC_SCLAIM(hart) as *const u32) }
}

// tell the PLIC we've served this IRQ.
pub fn complete(hart: usize, irq: u32) {
    unsafe { ptr::write_volatile(PLIC_SCLAIM(hart) as *mut u32, irq) }
}

#![no_std]
#![no_main]

use kernel::{
    bio, console, kalloc, kinfo, kmain, plic, println,
    proc::{self, scheduler, user_init},
    trap, virtio_disk, vm,
};

kmain!(main);

extern "C" fn main() -> ! {
    #[cfg(target_os = "none")]
    let initcode: &'static [u8] = include_bytes!(concat!(env!("OUT_DIR"), "/bin/_initcode"));
    #[cfg(not(target_os = "none"))]
    let initcode: &'static [u8] = &[];

    console::init();
    println!();
    println!("rvos kernel is booting");
    println!();
    kalloc::init(); // physical memory allocator
    vm::kinit(); // kernel page table, per-process kernel stacks
    vm::kinithart(); // turn on paging
    proc::init(); // process table
    trap::inithart(); // install kernel trap vector
    plic::init(); // set up interrupt controller
    plic::init_hart(0); // ask PLIC for device interrupts
    bio::init(); // buffer cache
    virtio_disk::init(); // emulated hard disk
    kinfo!("boot: {} pages free", kalloc::free_pages());
    user_init(initcode); // first user process
    scheduler()
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    kernel::printf::panic_inner(info)
}

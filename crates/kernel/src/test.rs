// Support for bare-metal test binaries: report a verdict to qemu
// through the SiFive test finisher and stop the machine.

use core::ptr;

use crate::memlayout::SIFIVE_TEST;
use crate::{print, println};

// the two magic words the finisher acts on.
const FINISHER_PASS: u32 = 0x5555;
const FINISHER_FAIL: u32 = 0x3333;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    Fail,
}

// Ask qemu to power off with the given verdict. Comes back only if
// the test device is missing (e.g. not running under qemu).
pub fn exit_qemu(outcome: Outcome) {
    let word = match outcome {
        Outcome::Pass => FINISHER_PASS,
        Outcome::Fail => FINISHER_FAIL,
    };
    unsafe {
        ptr::write_volatile(SIFIVE_TEST as *mut u32, word);
    }
}

// A named kernel test; a panic anywhere in `run` fails the whole
// binary via panic_inner.
pub struct Case {
    pub name: &'static str,
    pub run: fn(),
}

// Run each case in order and report Pass when all of them return.
pub fn run(cases: &[Case]) -> ! {
    println!("running {} kernel tests", cases.len());
    for case in cases {
        print!("{} ... ", case.name);
        (case.run)();
        println!("ok");
    }
    exit_qemu(Outcome::Pass);
    loop {
        core::hint::spin_loop()
    }
}

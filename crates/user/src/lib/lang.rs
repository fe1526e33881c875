// Language plumbing for no_std binaries: the program entry point,
// the termination trait that lets main() return (), ExitCode or a
// Result, and the panic handler.

use core::arch::global_asm;

use crate::{env, eprintln, sys};

// exec() leaves argc in a0 and argv in a1; rustc's generated main
// forwards them to lang_start below.
global_asm!(
    r#"
.section .text.start
.globl _start
_start:
    call main
    # main's lang_start already exits; if it somehow returns,
    # exit with its return value.
    li a7, 2
    ecall
"#
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

#[lang = "termination"]
pub trait Termination {
    fn report(self) -> i32;
}

impl Termination for () {
    fn report(self) -> i32 {
        0
    }
}

impl Termination for ExitCode {
    fn report(self) -> i32 {
        self.0
    }
}

impl<E: core::fmt::Debug> Termination for Result<(), E> {
    fn report(self) -> i32 {
        match self {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("error: {:?}", err);
                1
            }
        }
    }
}

#[lang = "start"]
fn lang_start<T: Termination + 'static>(
    main: fn() -> T,
    argc: isize,
    argv: *const *const u8,
    _sigpipe: u8,
) -> isize {
    unsafe { env::init(argc as usize, argv) };
    let code = main().report();
    sys::exit(code)
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    eprintln!("panic: {}", info);
    sys::exit(101)
}

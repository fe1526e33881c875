// Raw system call interface. The stub bodies in usys.rs are
// generated by build.rs from the kernel's syscall table, so the
// numbers and signatures can never drift apart.

#![allow(clippy::missing_safety_doc)]

use core::arch::asm;

pub use kernel::error::Error;
pub use kernel::fcntl::omode;
pub use kernel::stat::{FileType, Major, Stat};

pub type Result<T> = core::result::Result<T, Error>;

include!(concat!(env!("OUT_DIR"), "/usys.rs"));

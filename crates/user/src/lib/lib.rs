// ulib: the small C library equivalent that user programs link
// against. Provides the syscall stubs generated from the kernel's
// table, a heap, stdio, and thin std-like wrappers so the programs
// read like ordinary Rust.

#![no_std]
#![feature(lang_items)]

extern crate alloc as alloc_crate;

pub mod alloc;
pub mod env;
pub mod fs;
pub mod io;
mod lang;
pub mod mutex;
pub mod path;
pub mod process;
pub mod stdio;
pub mod sys;

pub use lang::{ExitCode, Termination};

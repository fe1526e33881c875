// The very first user program, embedded in the kernel and loaded at
// address zero by user_init(). All it does is exec the real init.
#![no_std]

use ulib::sys;

fn main() {
    loop {
        let _ = sys::exec("/init", &["init"]);
    }
}

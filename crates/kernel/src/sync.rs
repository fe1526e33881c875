// Const-initializable once/lazy cells.
//
// These fill the role std's OnceLock/LazyLock play on a hosted
// target: single-assignment globals initialized during boot (device
// switch table, kernel page table) or on first touch (process table,
// file table). Initialization races are not a concern on one hart,
// but the cells still use an atomic state word so the discipline
// carries over unchanged if more harts ever come online.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ops::Deref;
use core::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const BUSY: u8 = 1;
const READY: u8 = 2;

pub struct OnceLock<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}
unsafe impl<T: Send> Send for OnceLock<T> {}

impl<T> OnceLock<T> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    pub fn get(&self) -> Option<&T> {
        if self.state.load(Ordering::Acquire) == READY {
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    // # Safety
    // The caller must be the only thread touching the cell.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> Option<&mut T> {
        if self.state.load(Ordering::Acquire) == READY {
            Some(unsafe { (*self.value.get()).assume_init_mut() })
        } else {
            None
        }
    }

    pub fn set(&self, value: T) -> Result<(), T> {
        match self
            .state
            .compare_exchange(EMPTY, BUSY, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => {
                unsafe { (*self.value.get()).write(value) };
                self.state.store(READY, Ordering::Release);
                Ok(())
            }
            Err(_) => Err(value),
        }
    }

    pub fn get_or_init<F: FnOnce() -> T>(&self, f: F) -> &T {
        loop {
            match self.state.compare_exchange(
                EMPTY,
                BUSY,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    unsafe { (*self.value.get()).write(f()) };
                    self.state.store(READY, Ordering::Release);
                }
                Err(READY) => {}
                Err(_) => {
                    core::hint::spin_loop();
                    continue;
                }
            }
            return unsafe { (*self.value.get()).assume_init_ref() };
        }
    }
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LazyLock<T, F = fn() -> T> {
    cell: OnceLock<T>,
    init: UnsafeCell<Option<F>>,
}

unsafe impl<T: Send + Sync, F: Send> Sync for LazyLock<T, F> {}

impl<T, F: FnOnce() -> T> LazyLock<T, F> {
    pub const fn new(init: F) -> Self {
        Self {
            cell: OnceLock::new(),
            init: UnsafeCell::new(Some(init)),
        }
    }

    pub fn force(&self) -> &T {
        self.cell.get_or_init(|| {
            let f = unsafe { (*self.init.get()).take() }.expect("lazy cell reentered");
            f()
        })
    }
}

impl<T, F: FnOnce() -> T> Deref for LazyLock<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        self.force()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_lock_set_get() {
        let cell: OnceLock<usize> = OnceLock::new();
        assert!(cell.get().is_none());
        assert!(cell.set(7).is_ok());
        assert_eq!(cell.set(8), Err(8));
        assert_eq!(cell.get(), Some(&7));
    }

    #[test]
    fn lazy_lock_initializes_once() {
        let lazy: LazyLock<usize> = LazyLock::new(|| 41 + 1);
        assert_eq!(*lazy, 42);
        assert_eq!(*lazy, 42);
    }
}

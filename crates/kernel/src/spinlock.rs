// Mutual exclusion spin locks.
//
// Interrupts are disabled for as long as any lock is held on this
// CPU: lock() takes the per-CPU interrupt lock (see proc::Cpus) and
// the guard returns it on drop, so the enable state nests correctly
// across lock acquisitions.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::proc::{Cpus, IntrLock};

#[derive(Debug, Default)]
pub struct Mutex<T: ?Sized> {
    locked: AtomicBool,
    name: &'static str,
    cpuid: UnsafeCell<isize>, // which cpu holds it, for holding()
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

#[derive(Debug)]
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    mutex: &'a Mutex<T>,
    _intr_lock: IntrLock,
}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            cpuid: UnsafeCell::new(-1),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let _intr_lock = Cpus::lock_mycpu(self.name);

        assert!(!self.holding(), "acquire {}", self.name);
        while self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop()
        }
        unsafe {
            *self.cpuid.get() = Cpus::cpu_id() as isize;
        }

        MutexGuard {
            mutex: self,
            _intr_lock,
        }
    }

    // Release the guard but hand the lock back to the caller for a
    // later re-acquisition; used by sleep().
    pub fn unlock(guard: MutexGuard<'_, T>) -> &'_ Mutex<T> {
        let mutex = guard.mutex;
        drop(guard);
        mutex
    }

    // Release the lock from a context that never owned a guard on
    // this stack, i.e. the first swtch() into fork_ret.
    //
    // # Safety
    // The lock must be held, with its guard parked on another stack
    // that will never drop it.
    pub unsafe fn force_unlock(&self) {
        assert!(self.holding(), "force_unlock {}", self.name);
        unsafe {
            *self.cpuid.get() = -1;
        }
        self.locked.store(false, Ordering::Release);
        unsafe { (*Cpus::mycpu()).unlock() }
    }

    // Peek at the data without locking; only for the ^P debug dump.
    //
    // # Safety
    // Racy by design. The caller accepts torn reads.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    // Does this cpu hold the lock? Interrupts must be off.
    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
            && unsafe { *self.cpuid.get() == Cpus::cpu_id() as isize }
    }
}

impl<'a, T: ?Sized> MutexGuard<'a, T> {
    pub fn holding(&self) -> bool {
        self.mutex.holding()
    }
}

impl<'a, T: ?Sized> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        assert!(self.holding(), "release {}", self.mutex.name);
        unsafe {
            *self.mutex.cpuid.get() = -1;
        }
        self.mutex.locked.store(false, Ordering::Release);
        // _intr_lock drops next and may re-enable interrupts.
    }
}

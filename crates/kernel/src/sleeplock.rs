// Long-term locks for processes. A waiter gives up the CPU instead
// of spinning, parked on the lock's own address as wait channel.
// Never acquire one of these while holding a spinlock; the sleep
// would carry the spinlock into the scheduler.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut, Drop};

use crate::proc::{self, Cpus};
use crate::spinlock::Mutex;

#[derive(Debug)]
struct SleepLockInner {
    locked: bool,
    pid: usize, // holder, for holding()
}

#[derive(Debug)]
pub struct SleepLock<T: ?Sized> {
    lk: Mutex<SleepLockInner>, // protects locked and pid
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for SleepLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SleepLock<T> {}

pub struct SleepLockGuard<'a, T: ?Sized + 'a> {
    lock: &'a SleepLock<T>,
}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lk: Mutex::new(
                SleepLockInner {
                    locked: false,
                    pid: 0,
                },
                name,
            ),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SleepLock<T> {
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut inner = self.lk.lock();
        while inner.locked {
            inner = proc::sleep(self as *const _ as *const () as usize, inner);
        }
        inner.locked = true;
        inner.pid = Cpus::myproc().map_or(0, |p| p.pid());
        drop(inner);

        SleepLockGuard { lock: self }
    }

    pub fn unlock(guard: SleepLockGuard<'_, T>) -> &'_ SleepLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    // Access the data without taking the lock.
    //
    // # Safety
    // The caller must know no holder or waiter exists, e.g. because
    // a protecting reference count is zero.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    pub fn holding(&self) -> bool {
        let inner = self.lk.lock();
        inner.locked && inner.pid == Cpus::myproc().map_or(0, |p| p.pid())
    }

    fn release(&self) {
        let mut inner = self.lk.lock();
        inner.locked = false;
        inner.pid = 0;
        proc::wakeup(self as *const _ as *const () as usize);
    }
}

impl<'a, T: ?Sized> Deref for SleepLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release()
    }
}

impl<'a, T: ?Sized + core::fmt::Debug> core::fmt::Debug for SleepLockGuard<'a, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SleepLockGuard {{ {:?} }}", &**self)
    }
}

// Support functions for system calls that involve file descriptors.
//
// Open files live in a global table of reference-counted VFile
// entries; a File is one descriptor's view of an entry (its own
// read/write permission bits). Dropping the last File for an entry
// performs the type-specific close.

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ops::Deref;

use crate::array;
use crate::error::{Error::*, Result};
use crate::fcntl::OMode;
use crate::fs::{self, BSIZE, IData, Inode, Path, create};
use crate::log::LOG;
use crate::param::{MAXOPBLOCKS, NDEV, NFILE};
use crate::pipe::Pipe;
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::stat::{FileType, Stat};
use crate::sync::{LazyLock, OnceLock};
use crate::vm::VirtAddr;

pub use crate::stat::Major;

pub static DEVSW: DevSW = DevSW::new();
pub static FTABLE: LazyLock<FTable> = LazyLock::new(|| Mutex::new(array![None; NFILE], "ftable"));

type FTable = Mutex<[Option<Arc<VFile>>; NFILE]>;

#[derive(Default, Clone, Debug)]
pub struct File {
    f: Option<Arc<VFile>>,
    readable: bool,
    writable: bool,
}

#[derive(Debug)]
pub enum VFile {
    Device(DNod),
    Inode(FNod),
    Pipe(Pipe),
}

// Device Node
#[derive(Debug)]
pub struct DNod {
    driver: &'static dyn Device,
    ip: Inode,
}

// Device functions, dispatched through this trait object.
pub trait Device: Send + Sync {
    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize>;
    fn write(&self, src: VirtAddr, n: usize) -> Result<usize>;
    fn major(&self) -> Major;
}

impl core::fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Device fn {:?}", self.major())
    }
}

impl Deref for DNod {
    type Target = dyn Device;

    fn deref(&self) -> &Self::Target {
        self.driver
    }
}

// File & directory Node
#[derive(Debug)]
pub struct FNod {
    off: UnsafeCell<u32>, // Safety: accessed with the inode lock held.
    ip: Inode,
}
unsafe impl Send for FNod {}
unsafe impl Sync for FNod {}

impl FNod {
    pub fn new(ip: Inode, offset: u32) -> Self {
        Self {
            off: UnsafeCell::new(offset),
            ip,
        }
    }

    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize> {
        LOG.begin_op();
        let res = {
            let mut ip = self.ip.lock();
            let off = unsafe { &mut *self.off.get() };
            ip.read(dst, *off, n).inspect(|r| {
                *off += *r as u32;
            })
        };
        LOG.end_op();
        res
    }

    fn write(&self, src: VirtAddr, n: usize) -> Result<usize> {
        // write a few blocks at a time to avoid exceeding the
        // maximum log transaction size, including i-node, indirect
        // blocks, allocation blocks, and 2 blocks of slop for
        // non-aligned writes. this really belongs lower down, since
        // writei() might be writing a device like the console.
        let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;
        let mut i: usize = 0;

        while i < n {
            let n1 = core::cmp::min(n - i, max);

            LOG.begin_op();
            let res = {
                let mut guard = self.ip.lock();
                let off = unsafe { &mut *self.off.get() };
                guard.write(src + i, *off, n1).inspect(|r| {
                    *off += *r as u32;
                })
            };
            LOG.end_op();

            let r = res?;
            i += r;
            if r != n1 {
                break; // short write
            }
        }
        Ok(i)
    }
}

impl VFile {
    fn read(&self, dst: VirtAddr, n: usize) -> Result<usize> {
        match self {
            VFile::Device(d) => d.driver.read(dst, n),
            VFile::Inode(f) => f.read(dst, n),
            VFile::Pipe(p) => p.read(dst, n),
        }
    }

    fn write(&self, src: VirtAddr, n: usize) -> Result<usize> {
        match self {
            VFile::Device(d) => d.driver.write(src, n),
            VFile::Inode(f) => f.write(src, n),
            VFile::Pipe(p) => p.write(src, n),
        }
    }

    // Get metadata about file; addr points to a user struct Stat.
    pub fn stat(&self, addr: VirtAddr) -> Result<()> {
        let mut stat: Stat = Default::default();

        match self {
            VFile::Device(DNod { driver: _, ip }) | VFile::Inode(FNod { off: _, ip }) => {
                {
                    ip.lock().stat(&mut stat);
                }
                crate::proc::either_copyout(addr, &stat)
            }
            _ => Err(BadFileDescriptor),
        }
    }
}

impl File {
    // Read from file.
    pub fn read(&self, dst: VirtAddr, n: usize) -> Result<usize> {
        if !self.readable {
            return Err(InvalidArgument);
        }
        self.f.as_ref().unwrap().read(dst, n)
    }

    // Write to file.
    pub fn write(&self, src: VirtAddr, n: usize) -> Result<usize> {
        if !self.writable {
            return Err(InvalidArgument);
        }
        self.f.as_ref().unwrap().write(src, n)
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn inode(&self) -> Option<Inode> {
        match self.f.as_ref()?.as_ref() {
            VFile::Inode(FNod { off: _, ip }) | VFile::Device(DNod { driver: _, ip }) => {
                Some(ip.clone())
            }
            _ => None,
        }
    }
}

impl Deref for File {
    type Target = Arc<VFile>;

    fn deref(&self) -> &Self::Target {
        self.f.as_ref().unwrap()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let f = self.f.take().unwrap();
        if Arc::strong_count(&f) < 2 {
            panic!("file drop");
        }

        if Arc::strong_count(&f) == 2 {
            let mut guard = FTABLE.lock();
            // drop the table's Arc<VFile>, leaving ours the last.
            for ff in guard.iter_mut() {
                match ff {
                    Some(vff) if Arc::ptr_eq(&f, vff) => {
                        ff.take();
                    }
                    _ => (),
                }
            }
        }

        // if we were the last, clean up by type.
        match Arc::try_unwrap(f) {
            Ok(VFile::Inode(FNod { off: _, ip }) | VFile::Device(DNod { driver: _, ip })) => {
                LOG.begin_op();
                drop(ip);
                LOG.end_op();
            }
            Ok(VFile::Pipe(p)) => p.close(self.writable),
            Err(_) => (),
        }
    }
}

// Where a new file table entry comes from.
pub enum FType<'a> {
    Node(&'a Path),
    Pipe(Pipe),
}

impl FTable {
    // Allocate a file structure.
    // Must be called inside a transaction if FType == FType::Node.
    pub fn alloc(&self, opts: OMode, ftype: FType<'_>) -> Result<File> {
        let inner: Arc<VFile> = Arc::new(match ftype {
            FType::Node(path) => {
                let ip: Inode;
                let mut ip_guard: SleepLockGuard<'_, IData>;

                if opts.is_create() {
                    ip = create(path, FileType::File, 0, 0)?;
                    ip_guard = ip.lock();
                } else {
                    ip = fs::follow_symlinks(path.namei()?)?;
                    ip_guard = ip.lock();
                    if ip_guard.itype() == FileType::Dir && !opts.is_rdonly() {
                        return Err(IsADirectory);
                    }
                }
                match ip_guard.itype() {
                    FileType::Device if Major::from_u16(ip_guard.major()) != Major::Invalid => {
                        let major = Major::from_u16(ip_guard.major());
                        let driver = DEVSW.get(major).ok_or(NotFound)?;
                        SleepLock::unlock(ip_guard);
                        VFile::Device(DNod { driver, ip })
                    }
                    FileType::Dir | FileType::File => {
                        if opts.is_trunc() && ip_guard.itype() == FileType::File {
                            ip_guard.trunc();
                        }
                        SleepLock::unlock(ip_guard);
                        VFile::Inode(FNod::new(ip, 0))
                    }
                    _ => return Err(NotFound),
                }
            }
            FType::Pipe(pi) => VFile::Pipe(pi),
        });

        let mut guard = self.lock();

        let mut empty: Option<&mut Option<Arc<VFile>>> = None;
        for f in guard.iter_mut() {
            if f.is_none() {
                empty = Some(f);
                break;
            }
        }

        let f = empty.ok_or(FileTableOverflow)?;
        f.replace(inner);
        Ok(File {
            f: f.clone(), // ref count = 2
            readable: opts.is_read(),
            writable: opts.is_write(),
        })
    }
}

pub struct DevSW {
    table: [OnceLock<&'static dyn Device>; NDEV],
}

impl core::fmt::Debug for DevSW {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[")?;
        for (count, v) in self.table.iter().enumerate() {
            if count != 0 {
                write!(f, ", ")?;
            }
            if let Some(&v) = v.get() {
                write!(f, "{:?}", v)?;
            } else {
                write!(f, "None")?;
            }
        }
        write!(f, "]")
    }
}

impl Default for DevSW {
    fn default() -> Self {
        Self::new()
    }
}

impl DevSW {
    pub const fn new() -> Self {
        Self {
            table: array![OnceLock::new(); NDEV],
        }
    }

    pub fn set(
        &self,
        devnum: Major,
        dev: &'static dyn Device,
    ) -> core::result::Result<(), &'static (dyn Device + 'static)> {
        self.table[devnum as usize].set(dev)
    }

    pub fn get(&self, devnum: Major) -> Option<&'static dyn Device> {
        match self.table[devnum as usize].get() {
            Some(&dev) => Some(dev),
            None => None,
        }
    }
}


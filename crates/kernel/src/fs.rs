// File system implementation. Five layers:
//   + Blocks: allocator for raw disk blocks.
//   + Log: crash recovery for multi-step updates (log.rs).
//   + Files: inode allocator, reading, writing, metadata.
//   + Directories: inode with special contents (list of other
//     inodes!)
//   + Names: paths like /home/alice/notes.txt for convenient
//     naming, with bounded symbolic-link following.
//
// This file contains the low-level file system manipulation
// routines. The (higher-level) system call implementations are in
// syscall.rs; the on-disk structures at the top compile on the host
// too, where mkfs uses them to build the initial image.

use crate::defs::AsBytes;

// Disk layout:
// [ boot block | super block | log | inode blocks | free bit map |
//   data blocks ]

pub const ROOTINO: u32 = 1; // root i-number
pub const BSIZE: usize = 4096; // block size
pub const FSMAGIC: u32 = 0x2024_1031;

pub const NDIRECT: usize = 12;
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>();
pub const NDINDIRECT: usize = NINDIRECT * NINDIRECT;
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NDINDIRECT;

// Directory entries are fixed-size: a 2-byte inum (0 = free slot)
// and a null-padded name.
pub const DIRSIZ: usize = 14;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SuperBlock {
    pub magic: u32,      // Must be FSMAGIC
    pub size: u32,       // Size of file system image (blocks)
    pub nblocks: u32,    // Number of data blocks
    pub ninodes: u32,    // Number of inodes
    pub nlog: u32,       // Number of log blocks
    pub logstart: u32,   // Block number of first log block
    pub inodestart: u32, // Block number of first inode block
    pub bmapstart: u32,  // Block number of first free map block
}

unsafe impl AsBytes for SuperBlock {}

impl SuperBlock {
    // Block containing inode inum
    pub const fn iblock(&self, inum: u32) -> u32 {
        inum / IPB as u32 + self.inodestart
    }

    // Block of free map containing bit for block b
    pub const fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}

// On-disk inode structure
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct DInode {
    pub itype: i16,                   // File type
    pub major: i16,                   // Major device number (T_DEV only)
    pub minor: i16,                   // Minor device number (T_DEV only)
    pub nlink: i16,                   // Number of links to inode in file system
    pub size: u32,                    // Size of file (bytes)
    pub addrs: [u32; NDIRECT + 2],    // Direct, indirect, double-indirect
}

unsafe impl AsBytes for DInode {}

// Inodes per block; dinodes are packed at size_of stride.
pub const IPB: usize = BSIZE / core::mem::size_of::<DInode>();

// Bitmap bits per block
pub const BPB: u32 = (BSIZE * 8) as u32;

#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Dirent {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

unsafe impl AsBytes for Dirent {}

impl Default for Dirent {
    fn default() -> Self {
        Self {
            inum: 0,
            name: [0; DIRSIZ],
        }
    }
}

impl Dirent {
    pub fn set_name(&mut self, name: &FileName) {
        self.name = name.0;
    }

    pub fn name_bytes(&self) -> &[u8; DIRSIZ] {
        &self.name
    }
}

// One path element, truncated to DIRSIZ and null-padded, with the
// fixed-length comparison semantics directories use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileName(pub [u8; DIRSIZ]);

impl FileName {
    pub fn from_str(s: &str) -> Self {
        let mut name = [0u8; DIRSIZ];
        let bytes = s.as_bytes();
        let n = core::cmp::min(bytes.len(), DIRSIZ);
        name[..n].copy_from_slice(&bytes[..n]);
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        core::str::from_utf8(&self.0[..len]).unwrap_or("")
    }

    pub fn is(&self, s: &str) -> bool {
        *self == Self::from_str(s)
    }
}

// Split the first path element from path. Returns the element and
// the remainder, or None if there are no more elements.
// Examples:
//   skipelem("a/bb/c") = Some(("a", "bb/c"))
//   skipelem("///a//bb") = Some(("a", "//bb"))
//   skipelem("a") = Some(("a", ""))
//   skipelem("") = skipelem("////") = None
pub fn skipelem(path: &str) -> Option<(FileName, &str)> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    let (elem, rest) = match path.find('/') {
        Some(i) => path.split_at(i),
        None => (path, ""),
    };
    Some((FileName::from_str(elem), rest))
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn on_disk_sizes() {
        assert_eq!(core::mem::size_of::<SuperBlock>(), 32);
        assert_eq!(core::mem::size_of::<DInode>(), 68);
        assert_eq!(core::mem::size_of::<Dirent>(), 16);
        assert_eq!(IPB, 60);
        assert_eq!(NINDIRECT, 1024);
        assert_eq!(MAXFILE, 12 + 1024 + 1024 * 1024);
    }

    #[test]
    fn filename_truncates_and_pads() {
        let name = FileName::from_str("hello");
        assert_eq!(name.as_str(), "hello");
        assert_eq!(&name.0[5..], &[0; 9]);

        let long = FileName::from_str("a-very-long-file-name");
        assert_eq!(long.as_str(), "a-very-long-fi");
    }

    #[test]
    fn skipelem_examples() {
        let (e, rest) = skipelem("a/bb/c").unwrap();
        assert!(e.is("a"));
        assert_eq!(rest, "bb/c");

        let (e, rest) = skipelem("///a//bb").unwrap();
        assert!(e.is("a"));
        assert_eq!(rest, "//bb");

        let (e, rest) = skipelem("a").unwrap();
        assert!(e.is("a"));
        assert_eq!(rest, "");

        assert!(skipelem("").is_none());
        assert!(skipelem("////").is_none());
    }

    #[test]
    fn superblock_byte_round_trip() {
        let sb = SuperBlock {
            magic: FSMAGIC,
            size: 2000,
            nblocks: 1900,
            ninodes: 200,
            nlog: 30,
            logstart: 2,
            inodestart: 32,
            bmapstart: 36,
        };
        let mut copy = SuperBlock::default();
        copy.as_bytes_mut().copy_from_slice(sb.as_bytes());
        assert_eq!(copy, sb);
        // magic is the first little-endian word.
        assert_eq!(&sb.as_bytes()[..4], &FSMAGIC.to_le_bytes());
    }
}

#[cfg(all(target_os = "none", feature = "kernel"))]
mod imp {
    use alloc::string::{String, ToString};

    use super::*;
    use crate::bio::BCACHE;
    use crate::error::{Error::*, Result};
    use crate::log::LOG;
    use crate::param::{MAXPATH, MAXSYMLINKS, NINODE, ROOTDEV};
    use crate::proc::{Cpus, either_copyin, either_copyout};
    use crate::sleeplock::{SleepLock, SleepLockGuard};
    use crate::spinlock::Mutex;
    use crate::stat::{FileType, Stat};
    use crate::sync::OnceLock;
    use crate::vm::VirtAddr;
    use crate::{array, kinfo};

    // there should be one superblock per disk device, but we run
    // with only one device.
    static SB: OnceLock<SuperBlock> = OnceLock::new();

    pub static ICACHE: Icache = Icache::new();

    // Init fs; reads the superblock and replays the log.
    // Must run in process context, because recovery sleeps on disk
    // I/O.
    pub fn init(dev: u32) {
        let buf = BCACHE.read(dev, 1);
        let mut sb = SuperBlock::default();
        let len = core::mem::size_of::<SuperBlock>();
        sb.as_bytes_mut().copy_from_slice(&buf[..len]);
        drop(buf);
        assert!(sb.magic == FSMAGIC, "invalid file system");
        SB.set(sb).ok().expect("fs: double init");
        LOG.init(dev, &sb);
        kinfo!(
            "fs: {} blocks, {} inodes, log {} blocks",
            sb.size,
            sb.ninodes,
            sb.nlog
        );
    }

    fn superblock() -> &'static SuperBlock {
        SB.get().expect("fs: not initialized")
    }

    // Blocks.

    // Zero a block.
    fn bzero(dev: u32, bno: u32) {
        let mut buf = BCACHE.read(dev, bno);
        buf.fill(0);
        LOG.write(&buf);
    }

    // Allocate a zeroed data block. Returns Err if out of disk
    // space.
    fn balloc(dev: u32) -> Result<u32> {
        let sb = superblock();
        let mut b = 0;
        while b < sb.size {
            let mut bp = BCACHE.read(dev, sb.bblock(b));
            let mut bi = 0;
            while bi < BPB && b + bi < sb.size {
                let m = 1u8 << (bi % 8);
                let byte = &mut bp[bi as usize / 8];
                if *byte & m == 0 {
                    // block is free.
                    *byte |= m; // mark block in use.
                    LOG.write(&bp);
                    drop(bp);
                    bzero(dev, b + bi);
                    return Ok(b + bi);
                }
                bi += 1;
            }
            b += BPB;
        }
        Err(StorageFull)
    }

    // Free a disk block.
    fn bfree(dev: u32, b: u32) {
        let sb = superblock();
        let mut bp = BCACHE.read(dev, sb.bblock(b));
        let bi = b % BPB;
        let m = 1u8 << (bi % 8);
        assert!(bp[bi as usize / 8] & m != 0, "freeing free block");
        bp[bi as usize / 8] &= !m;
        LOG.write(&bp);
    }

    // Inodes.
    //
    // The kernel keeps a table of in-use inodes in memory to provide
    // a place for synchronizing access to inodes used by multiple
    // processes. An Inode handle counts one reference to a table
    // slot; the slot's IData (the copy of the disk inode) sits
    // behind a sleeplock and is read in on first lock.
    //
    // Lifecycle:
    // * iget() finds or creates a slot for (dev, inum); cloning a
    //   handle adds a reference.
    // * lock() loads the disk data if needed and returns the guard.
    // * dropping the last handle of an inode whose nlink is zero
    //   truncates it and frees the on-disk inode; this must happen
    //   inside a transaction.

    #[derive(Debug, Clone, Copy)]
    struct IMeta {
        dev: u32,
        inum: u32,
        refcnt: usize,
    }

    pub struct Icache {
        ctrl: Mutex<[IMeta; NINODE]>,
        data: [SleepLock<IData>; NINODE],
    }

    impl Icache {
        const fn new() -> Self {
            Self {
                ctrl: Mutex::new(
                    [IMeta {
                        dev: 0,
                        inum: 0,
                        refcnt: 0,
                    }; NINODE],
                    "icache",
                ),
                data: array![SleepLock::new(IData::new(), "inode"); NINODE],
            }
        }
    }

    // in-memory copy of an inode.
    #[derive(Debug)]
    pub struct IData {
        dev: u32,
        inum: u32,
        valid: bool, // has the slot been read from disk?

        itype: FileType,
        major: u16,
        minor: u16,
        nlink: i16,
        size: u32,
        addrs: [u32; NDIRECT + 2],
    }

    // a reference-counted handle to an inode cache slot.
    #[derive(Debug)]
    pub struct Inode {
        idx: usize,
        dev: u32,
        inum: u32,
    }

    // Find the inode with number inum on device dev and return its
    // in-memory handle.
    pub fn iget(dev: u32, inum: u32) -> Inode {
        let mut ctrl = ICACHE.ctrl.lock();

        let mut empty = None;
        for (idx, m) in ctrl.iter_mut().enumerate() {
            if m.refcnt > 0 && m.dev == dev && m.inum == inum {
                m.refcnt += 1;
                return Inode { idx, dev, inum };
            }
            if empty.is_none() && m.refcnt == 0 {
                empty = Some(idx);
            }
        }

        // recycle an unused slot.
        let idx = empty.expect("iget: no inodes");
        ctrl[idx] = IMeta {
            dev,
            inum,
            refcnt: 1,
        };
        // refcnt was 0, so nobody holds the sleeplock.
        let data = unsafe { ICACHE.data[idx].get_mut() };
        data.dev = dev;
        data.inum = inum;
        data.valid = false;
        Inode { idx, dev, inum }
    }

    impl Inode {
        pub fn dev(&self) -> u32 {
            self.dev
        }

        pub fn inum(&self) -> u32 {
            self.inum
        }

        // Lock the inode, reading it from disk if it has not been
        // loaded yet.
        pub fn lock(&self) -> SleepLockGuard<'static, IData> {
            let mut guard = ICACHE.data[self.idx].lock();
            if !guard.valid {
                let sb = superblock();
                let bp = BCACHE.read(self.dev, sb.iblock(self.inum));
                let off = (self.inum as usize % IPB) * core::mem::size_of::<DInode>();
                let mut din = DInode::default();
                din.as_bytes_mut()
                    .copy_from_slice(&bp[off..off + core::mem::size_of::<DInode>()]);
                drop(bp);
                guard.itype = FileType::from_i16(din.itype);
                guard.major = din.major as u16;
                guard.minor = din.minor as u16;
                guard.nlink = din.nlink;
                guard.size = din.size;
                guard.addrs = din.addrs;
                guard.valid = true;
                assert!(guard.itype != FileType::Empty, "ilock: no type");
            }
            guard
        }
    }

    impl Clone for Inode {
        fn clone(&self) -> Self {
            let mut ctrl = ICACHE.ctrl.lock();
            ctrl[self.idx].refcnt += 1;
            Self {
                idx: self.idx,
                dev: self.dev,
                inum: self.inum,
            }
        }
    }

    // Drop a reference to an in-memory inode. If that was the last
    // reference and the inode has no links to it, free the inode
    // (and its content) on disk. All calls that might end up
    // dropping the last handle must be inside a transaction, in
    // case the inode has to be freed.
    impl Drop for Inode {
        fn drop(&mut self) {
            let ctrl = ICACHE.ctrl.lock();
            if ctrl[self.idx].refcnt == 1 {
                // refcnt == 1 means no other process can have the
                // inode locked, so this get_mut won't race.
                let data = unsafe { ICACHE.data[self.idx].get_mut() };
                if data.valid && data.nlink == 0 {
                    // inode has no links and no other references:
                    // truncate and free.
                    drop(ctrl);
                    {
                        let mut guard = ICACHE.data[self.idx].lock();
                        guard.trunc();
                        guard.itype = FileType::Empty;
                        guard.update();
                        guard.valid = false;
                    }
                    let mut ctrl = ICACHE.ctrl.lock();
                    ctrl[self.idx].refcnt -= 1;
                    return;
                }
            }
            let mut ctrl = ctrl;
            ctrl[self.idx].refcnt -= 1;
        }
    }

    impl IData {
        const fn new() -> Self {
            Self {
                dev: 0,
                inum: 0,
                valid: false,
                itype: FileType::Empty,
                major: 0,
                minor: 0,
                nlink: 0,
                size: 0,
                addrs: [0; NDIRECT + 2],
            }
        }

        pub fn itype(&self) -> FileType {
            self.itype
        }

        pub fn major(&self) -> u16 {
            self.major
        }

        pub fn size(&self) -> u32 {
            self.size
        }

        pub fn nlink(&self) -> i16 {
            self.nlink
        }

        // Copy a modified in-memory inode to disk (that is, to the
        // buffer cache, for the log to carry home). Must be called
        // after every change to a field that lives on disk.
        pub fn update(&self) {
            let sb = superblock();
            let mut bp = BCACHE.read(self.dev, sb.iblock(self.inum));
            let off = (self.inum as usize % IPB) * core::mem::size_of::<DInode>();
            let din = DInode {
                itype: self.itype.as_i16(),
                major: self.major as i16,
                minor: self.minor as i16,
                nlink: self.nlink,
                size: self.size,
                addrs: self.addrs,
            };
            bp[off..off + core::mem::size_of::<DInode>()].copy_from_slice(din.as_bytes());
            LOG.write(&bp);
        }

        // Return the disk block number of the bn'th data block,
        // allocating it (and any needed indirect blocks) on first
        // touch.
        fn bmap(&mut self, bn: u32) -> Result<u32> {
            let mut bn = bn as usize;

            if bn < NDIRECT {
                if self.addrs[bn] == 0 {
                    self.addrs[bn] = balloc(self.dev)?;
                }
                return Ok(self.addrs[bn]);
            }
            bn -= NDIRECT;

            if bn < NINDIRECT {
                // Load the indirect block, allocating if necessary.
                if self.addrs[NDIRECT] == 0 {
                    self.addrs[NDIRECT] = balloc(self.dev)?;
                }
                return self.bmap_indirect(self.addrs[NDIRECT], bn);
            }
            bn -= NINDIRECT;

            if bn < NDINDIRECT {
                // Two levels: the double-indirect block holds the
                // addresses of NINDIRECT single-indirect blocks.
                if self.addrs[NDIRECT + 1] == 0 {
                    self.addrs[NDIRECT + 1] = balloc(self.dev)?;
                }
                let mid = self.bmap_indirect(self.addrs[NDIRECT + 1], bn / NINDIRECT)?;
                return self.bmap_indirect(mid, bn % NINDIRECT);
            }

            panic!("bmap: out of range");
        }

        // look up (allocating on demand) slot n of the indirect
        // block at iblock.
        fn bmap_indirect(&self, iblock: u32, n: usize) -> Result<u32> {
            let mut bp = BCACHE.read(self.dev, iblock);
            let off = n * core::mem::size_of::<u32>();
            let mut addr = u32::from_le_bytes(bp[off..off + 4].try_into().unwrap());
            if addr == 0 {
                addr = balloc(self.dev)?;
                bp[off..off + 4].copy_from_slice(&addr.to_le_bytes());
                LOG.write(&bp);
            }
            Ok(addr)
        }

        // Truncate inode (discard contents).
        pub fn trunc(&mut self) {
            for addr in self.addrs[..NDIRECT].iter_mut() {
                if *addr != 0 {
                    bfree(self.dev, *addr);
                    *addr = 0;
                }
            }

            if self.addrs[NDIRECT] != 0 {
                self.free_indirect(self.addrs[NDIRECT]);
                self.addrs[NDIRECT] = 0;
            }

            if self.addrs[NDIRECT + 1] != 0 {
                let bp = BCACHE.read(self.dev, self.addrs[NDIRECT + 1]);
                for i in 0..NINDIRECT {
                    let off = i * core::mem::size_of::<u32>();
                    let mid = u32::from_le_bytes(bp[off..off + 4].try_into().unwrap());
                    if mid != 0 {
                        self.free_indirect(mid);
                    }
                }
                drop(bp);
                bfree(self.dev, self.addrs[NDIRECT + 1]);
                self.addrs[NDIRECT + 1] = 0;
            }

            self.size = 0;
            self.update();
        }

        // free an indirect block and the data blocks it points at.
        fn free_indirect(&self, iblock: u32) {
            let bp = BCACHE.read(self.dev, iblock);
            for i in 0..NINDIRECT {
                let off = i * core::mem::size_of::<u32>();
                let addr = u32::from_le_bytes(bp[off..off + 4].try_into().unwrap());
                if addr != 0 {
                    bfree(self.dev, addr);
                }
            }
            drop(bp);
            bfree(self.dev, iblock);
        }

        // Copy stat information from the inode.
        pub fn stat(&self, st: &mut Stat) {
            st.dev = self.dev;
            st.ino = self.inum;
            st.ftype = self.itype;
            st.nlink = self.nlink as u16;
            st.size = self.size as usize;
        }

        // Read data from the inode. If dst is a user address, copy
        // through the current process's page table.
        pub fn read(&mut self, mut dst: VirtAddr, off: u32, n: usize) -> Result<usize> {
            let off = off as usize;
            let size = self.size as usize;
            if off > size || off.checked_add(n).is_none() {
                return Ok(0);
            }
            let n = core::cmp::min(n, size - off);

            let mut tot = 0;
            while tot < n {
                let addr = self.bmap(((off + tot) / BSIZE) as u32)?;
                let bp = BCACHE.read(self.dev, addr);
                let boff = (off + tot) % BSIZE;
                let m = core::cmp::min(n - tot, BSIZE - boff);
                either_copyout(dst, &bp[boff..boff + m])?;
                tot += m;
                dst += m;
            }
            Ok(n)
        }

        // Write data to the inode; grows the file as needed, up to
        // MAXFILE blocks. Returns the number of bytes written.
        pub fn write(&mut self, mut src: VirtAddr, off: u32, n: usize) -> Result<usize> {
            let off = off as usize;
            let size = self.size as usize;
            if off > size {
                return Err(InvalidArgument);
            }
            match off.checked_add(n) {
                Some(end) if end <= MAXFILE * BSIZE => (),
                _ => return Err(FileTooLarge),
            }

            let mut tot = 0;
            while tot < n {
                let addr = self.bmap(((off + tot) / BSIZE) as u32)?;
                let mut bp = BCACHE.read(self.dev, addr);
                let boff = (off + tot) % BSIZE;
                let m = core::cmp::min(n - tot, BSIZE - boff);
                either_copyin(&mut bp[boff..boff + m], src)?;
                LOG.write(&bp);
                tot += m;
                src += m;
            }

            if off + tot > size {
                self.size = (off + tot) as u32;
            }

            // write the i-node back to disk even if the size didn't
            // change, because bmap() may have added a new block to
            // addrs[].
            self.update();

            Ok(tot)
        }

        // Directories.

        // Look for a directory entry; returns the entry's inode and
        // byte offset.
        pub fn dirlookup(&mut self, name: &FileName) -> Option<(Inode, u32)> {
            assert!(self.itype == FileType::Dir, "dirlookup not DIR");

            let de_sz = core::mem::size_of::<Dirent>();
            let mut de = Dirent::default();
            let mut off = 0;
            while off < self.size as usize {
                self.read(
                    VirtAddr::Kernel(&mut de as *mut Dirent as usize),
                    off as u32,
                    de_sz,
                )
                .expect("dirlookup read");
                if de.inum != 0 && FileName(de.name) == *name {
                    return Some((iget(self.dev, de.inum as u32), off as u32));
                }
                off += de_sz;
            }
            None
        }

        // Write a new directory entry (name, inum) into this
        // directory, reusing the first free slot.
        pub fn dirlink(&mut self, name: &FileName, inum: u32) -> Result<()> {
            // Check that name is not present.
            if let Some((_ip, _)) = self.dirlookup(name) {
                return Err(AlreadyExists);
            }

            // Look for an empty dirent.
            let de_sz = core::mem::size_of::<Dirent>();
            let mut de = Dirent::default();
            let mut off = 0;
            while off < self.size as usize {
                self.read(
                    VirtAddr::Kernel(&mut de as *mut Dirent as usize),
                    off as u32,
                    de_sz,
                )
                .expect("dirlink read");
                if de.inum == 0 {
                    break;
                }
                off += de_sz;
            }

            de.inum = inum as u16;
            de.set_name(name);
            self.write(
                VirtAddr::Kernel(&de as *const Dirent as usize),
                off as u32,
                de_sz,
            )?;
            Ok(())
        }

        // Is the directory empty except for "." and ".."?
        pub fn is_dir_empty(&mut self) -> bool {
            let de_sz = core::mem::size_of::<Dirent>();
            let mut de = Dirent::default();
            let mut off = 2 * de_sz;
            while off < self.size as usize {
                self.read(
                    VirtAddr::Kernel(&mut de as *mut Dirent as usize),
                    off as u32,
                    de_sz,
                )
                .expect("is_dir_empty read");
                if de.inum != 0 {
                    return false;
                }
                off += de_sz;
            }
            true
        }

        // read a symlink's target out of its data.
        fn read_link(&mut self) -> Result<String> {
            let len = self.size as usize;
            if len == 0 || len > MAXPATH {
                return Err(InvalidArgument);
            }
            let mut buf = [0u8; MAXPATH];
            let n = self.read(VirtAddr::Kernel(buf.as_mut_ptr() as usize), 0, len)?;
            Ok(core::str::from_utf8(&buf[..n])
                .or(Err(Utf8Error))?
                .to_string())
        }
    }

    // Allocate an inode on device dev, marked with the given type.
    pub fn ialloc(dev: u32, itype: FileType) -> Result<Inode> {
        let sb = superblock();
        for inum in 1..sb.ninodes {
            let mut bp = BCACHE.read(dev, sb.iblock(inum));
            let off = (inum as usize % IPB) * core::mem::size_of::<DInode>();
            let mut din = DInode::default();
            din.as_bytes_mut()
                .copy_from_slice(&bp[off..off + core::mem::size_of::<DInode>()]);
            if din.itype == 0 {
                // a free inode.
                din = DInode {
                    itype: itype.as_i16(),
                    ..Default::default()
                };
                bp[off..off + core::mem::size_of::<DInode>()].copy_from_slice(din.as_bytes());
                LOG.write(&bp); // mark it allocated on the disk
                return Ok(iget(dev, inum));
            }
        }
        Err(StorageFull)
    }

    // Paths.

    // A borrowed path string, in the std::path style the rest of
    // the kernel passes around.
    #[derive(Debug)]
    #[repr(transparent)]
    pub struct Path {
        inner: str,
    }

    impl Path {
        pub fn new<S: AsRef<str> + ?Sized>(s: &S) -> &Path {
            unsafe { &*(s.as_ref() as *const str as *const Path) }
        }

        pub fn as_str(&self) -> &str {
            &self.inner
        }

        // the final path element, for process names.
        pub fn file_name(&self) -> &str {
            self.inner
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or("")
        }

        // Look up and return the inode for this path.
        pub fn namei(&self) -> Result<Inode> {
            namex(&self.inner, false).map(|(ip, _)| ip)
        }

        // Return the inode of the parent directory and the final
        // path element.
        pub fn nameiparent(&self) -> Result<(Inode, FileName)> {
            namex(&self.inner, true)
        }
    }

    // Walk a path to its inode (or, for parent mode, to the
    // directory containing the final element). Symbolic links in
    // non-terminal positions are followed here, restarting from the
    // root or the containing directory; terminal links are the
    // caller's business (see follow_symlinks).
    fn namex(path: &str, parent: bool) -> Result<(Inode, FileName)> {
        let mut storage = String::from(path);
        let mut pos = 0;
        let mut depth = 0;

        let mut ip = if path.starts_with('/') {
            iget(ROOTDEV, ROOTINO)
        } else {
            Cpus::myproc()
                .and_then(|p| p.data().cwd.clone())
                .ok_or(NotFound)?
        };

        let mut name = FileName::default();
        loop {
            let rest = &storage[pos..];
            let Some((elem, rest2)) = skipelem(rest) else {
                break;
            };
            name = elem;
            let newpos = storage.len() - rest2.len();
            let is_last = skipelem(rest2).is_none();

            let next;
            {
                let mut guard = ip.lock();
                if guard.itype() != FileType::Dir {
                    return Err(NotADirectory);
                }
                if parent && is_last {
                    // Stop one level early.
                    drop(guard);
                    return Ok((ip, name));
                }
                next = guard.dirlookup(&name).map(|(i, _)| i).ok_or(NotFound)?;
            }

            if !is_last {
                // a symlink in the middle of a path redirects the
                // rest of the walk.
                let target = {
                    let mut guard = next.lock();
                    if guard.itype() == FileType::Symlink {
                        depth += 1;
                        if depth > MAXSYMLINKS {
                            return Err(TooManyLinks);
                        }
                        Some(guard.read_link()?)
                    } else {
                        None
                    }
                };
                if let Some(target) = target {
                    let remainder = storage[newpos..].to_string();
                    if target.starts_with('/') {
                        ip = iget(ROOTDEV, ROOTINO);
                    }
                    // for a relative target, continue from the
                    // directory holding the link: ip is unchanged.
                    storage = target;
                    storage.push('/');
                    storage.push_str(&remainder);
                    pos = 0;
                    continue;
                }
            }

            ip = next;
            pos = newpos;

            if is_last {
                return Ok((ip, name));
            }
        }

        if parent {
            // e.g. nameiparent("/") has no final element.
            return Err(NotFound);
        }
        Ok((ip, name))
    }

    // Follow a chain of symbolic links to the real inode, with the
    // same depth bound the mid-path walk uses. open() calls this on
    // the inode a path resolved to.
    pub fn follow_symlinks(mut ip: Inode) -> Result<Inode> {
        let mut depth = 0;
        loop {
            let target = {
                let mut guard = ip.lock();
                if guard.itype() != FileType::Symlink {
                    return Ok(ip);
                }
                depth += 1;
                if depth > MAXSYMLINKS {
                    return Err(TooManyLinks);
                }
                guard.read_link()?
            };
            ip = Path::new(&target).namei()?;
        }
    }

    // Create a new inode at path, linked into its parent directory.
    // For files, an existing inode of the right type is simply
    // returned, which is what open(O_CREATE) wants.
    pub fn create(path: &Path, itype: FileType, major: u16, minor: u16) -> Result<Inode> {
        let (dp, name) = path.nameiparent()?;
        let mut dp_guard = dp.lock();

        if let Some((ip, _)) = dp_guard.dirlookup(&name) {
            drop(dp_guard);
            let ip_guard = ip.lock();
            if itype == FileType::File
                && (ip_guard.itype() == FileType::File || ip_guard.itype() == FileType::Device)
            {
                drop(ip_guard);
                return Ok(ip);
            }
            return Err(AlreadyExists);
        }

        let ip = ialloc(dp.dev(), itype)?;
        let mut ip_guard = ip.lock();
        ip_guard.major = major;
        ip_guard.minor = minor;
        ip_guard.nlink = 1;
        ip_guard.update();

        let mut ok = true;
        if itype == FileType::Dir {
            // Create "." and ".." entries; no extra nlink for ".."
            // yet: that comes with the dirlink below.
            ok = ip_guard.dirlink(&FileName::from_str("."), ip.inum()).is_ok()
                && ip_guard
                    .dirlink(&FileName::from_str(".."), dp.inum())
                    .is_ok();
        }

        if ok && dp_guard.dirlink(&name, ip.inum()).is_ok() {
            if itype == FileType::Dir {
                // the new directory's ".." counts as a link to dp.
                dp_guard.nlink += 1;
                dp_guard.update();
            }
            return Ok(ip);
        }

        // something went wrong; undo the allocation by dropping the
        // last handle of an unlinked inode.
        ip_guard.nlink = 0;
        ip_guard.update();
        Err(StorageFull)
    }

    // Create another directory entry (newpath) for the inode at
    // oldpath.
    pub fn link(oldpath: &Path, newpath: &Path) -> Result<()> {
        let ip = oldpath.namei()?;

        {
            let mut guard = ip.lock();
            if guard.itype() == FileType::Dir {
                return Err(IsADirectory);
            }
            guard.nlink += 1;
            guard.update();
        }

        let rollback = |ip: &Inode| {
            let mut guard = ip.lock();
            guard.nlink -= 1;
            guard.update();
        };

        let (dp, name) = match newpath.nameiparent() {
            Ok(v) => v,
            Err(err) => {
                rollback(&ip);
                return Err(err);
            }
        };
        if dp.dev() != ip.dev() {
            rollback(&ip);
            return Err(CrossesDevices);
        }
        let mut dp_guard = dp.lock();
        if let Err(err) = dp_guard.dirlink(&name, ip.inum()) {
            drop(dp_guard);
            rollback(&ip);
            return Err(err);
        }
        Ok(())
    }

    // Remove a directory entry; the inode itself is freed once its
    // last in-memory reference goes away.
    pub fn unlink(path: &Path) -> Result<()> {
        let (dp, name) = path.nameiparent()?;

        // Cannot unlink "." or "..".
        if name.is(".") || name.is("..") {
            return Err(InvalidArgument);
        }

        let mut dp_guard = dp.lock();
        let (ip, off) = dp_guard.dirlookup(&name).ok_or(NotFound)?;
        let mut ip_guard = ip.lock();

        assert!(ip_guard.nlink >= 1, "unlink: nlink < 1");
        if ip_guard.itype() == FileType::Dir && !ip_guard.is_dir_empty() {
            return Err(DirectoryNotEmpty);
        }

        let de = Dirent::default();
        let de_sz = core::mem::size_of::<Dirent>();
        let n = dp_guard.write(VirtAddr::Kernel(&de as *const Dirent as usize), off, de_sz)?;
        assert!(n == de_sz, "unlink: writei");
        if ip_guard.itype() == FileType::Dir {
            // the dead directory's ".." no longer refers to dp.
            dp_guard.nlink -= 1;
            dp_guard.update();
        }
        drop(dp_guard);

        ip_guard.nlink -= 1;
        ip_guard.update();
        Ok(())
    }

    // Create a symbolic link at path whose content is the target
    // string.
    pub fn symlink(target: &str, path: &Path) -> Result<()> {
        let ip = create(path, FileType::Symlink, 0, 0)?;
        let mut guard = ip.lock();
        let n = guard.write(
            VirtAddr::Kernel(target.as_ptr() as usize),
            0,
            target.len(),
        )?;
        if n != target.len() {
            return Err(StorageFull);
        }
        Ok(())
    }
}

#[cfg(all(target_os = "none", feature = "kernel"))]
pub use imp::*;

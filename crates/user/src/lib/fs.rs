use alloc_crate::string::String;

use kernel::fs::{DIRSIZ, Dirent};

use crate::io::{Read, Write};
use crate::path::Path;
use crate::sys::{self, Error, FileType, Stat, omode};

pub struct File {
    fd: usize,
}

impl File {
    pub fn open<P: AsRef<Path>>(path: P) -> sys::Result<File> {
        OpenOptions::new().read(true).open(path)
    }

    pub fn create<P: AsRef<Path>>(path: P) -> sys::Result<File> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
    }

    // # Safety
    // fd must be an open file descriptor owned by the caller.
    pub unsafe fn from_raw_fd(fd: usize) -> File {
        File { fd }
    }

    pub fn fd(&self) -> usize {
        self.fd
    }

    pub fn metadata(&self) -> sys::Result<Metadata> {
        let mut stat = Stat::default();
        sys::fstat(self.fd, &mut stat)?;
        Ok(Metadata(stat))
    }

    pub fn try_clone(&self) -> sys::Result<File> {
        let fd = sys::dup(self.fd)?;
        Ok(File { fd })
    }
}

impl Read for File {
    fn read(&mut self, buf: &mut [u8]) -> sys::Result<usize> {
        sys::read(self.fd, buf)
    }
}

impl Write for File {
    fn write(&mut self, buf: &[u8]) -> sys::Result<usize> {
        sys::write(self.fd, buf)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let _ = sys::close(self.fd);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Metadata(Stat);

impl Metadata {
    pub fn file_type(&self) -> FileType {
        self.0.file_type()
    }

    pub fn is_dir(&self) -> bool {
        self.0.file_type() == FileType::Dir
    }

    pub fn len(&self) -> usize {
        self.0.size
    }

    pub fn is_empty(&self) -> bool {
        self.0.size == 0
    }

    pub fn inum(&self) -> u32 {
        self.0.ino
    }

    pub fn nlink(&self) -> u16 {
        self.0.nlink
    }
}

#[derive(Default)]
pub struct OpenOptions {
    read: bool,
    write: bool,
    create: bool,
    truncate: bool,
}

impl OpenOptions {
    pub fn new() -> OpenOptions {
        Default::default()
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }

    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }

    pub fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    pub fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }

    pub fn open<P: AsRef<Path>>(&self, path: P) -> sys::Result<File> {
        let mut flags = match (self.read, self.write) {
            (_, false) => omode::RDONLY,
            (false, true) => omode::WRONLY,
            (true, true) => omode::RDWR,
        };
        if self.create {
            flags |= omode::CREATE;
        }
        if self.truncate {
            flags |= omode::TRUNC;
        }
        let fd = sys::open(path.as_ref().to_str(), flags)?;
        Ok(File { fd })
    }
}

pub fn metadata<P: AsRef<Path>>(path: P) -> sys::Result<Metadata> {
    File::open(path)?.metadata()
}

pub fn remove_file<P: AsRef<Path>>(path: P) -> sys::Result<()> {
    sys::unlink(path.as_ref().to_str())
}

pub fn create_dir<P: AsRef<Path>>(path: P) -> sys::Result<()> {
    sys::mkdir(path.as_ref().to_str())
}

pub fn hard_link<P: AsRef<Path>>(original: P, link: P) -> sys::Result<()> {
    sys::link(original.as_ref().to_str(), link.as_ref().to_str())
}

pub fn symlink<P: AsRef<Path>>(target: P, link: P) -> sys::Result<()> {
    sys::symlink(target.as_ref().to_str(), link.as_ref().to_str())
}

pub struct ReadDir {
    dir: File,
    path: String,
}

pub struct DirEntry {
    name: [u8; DIRSIZ],
    path: String,
}

pub fn read_dir<P: AsRef<Path>>(path: P) -> sys::Result<ReadDir> {
    let dir = File::open(&path)?;
    if !dir.metadata()?.is_dir() {
        return Err(Error::NotADirectory);
    }
    Ok(ReadDir {
        dir,
        path: String::from(path.as_ref().to_str()),
    })
}

impl Iterator for ReadDir {
    type Item = sys::Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut de = Dirent::default();
        loop {
            let mut buf = [0u8; core::mem::size_of::<Dirent>()];
            match self.dir.read(&mut buf) {
                Ok(0) => return None,
                Ok(n) if n == buf.len() => {
                    use kernel::defs::AsBytes;
                    de.as_bytes_mut().copy_from_slice(&buf);
                }
                Ok(_) => return Some(Err(Error::IoError)),
                Err(e) => return Some(Err(e)),
            }
            if de.inum == 0 {
                continue; // free slot
            }
            return Some(Ok(DirEntry {
                name: *de.name_bytes(),
                path: self.path.clone(),
            }));
        }
    }
}

impl DirEntry {
    pub fn file_name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(DIRSIZ);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn metadata(&self) -> sys::Result<Metadata> {
        use alloc_crate::format;
        let full = format!("{}/{}", self.path, self.file_name());
        metadata(Path::new(&full))
    }
}

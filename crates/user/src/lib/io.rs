use crate::sys;

pub trait Read {
    fn read(&mut self, buf: &mut [u8]) -> sys::Result<usize>;
}

pub trait Write {
    fn write(&mut self, buf: &[u8]) -> sys::Result<usize>;

    fn write_all(&mut self, mut buf: &[u8]) -> sys::Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            if n == 0 {
                return Err(sys::Error::IoError);
            }
            buf = &buf[n..];
        }
        Ok(())
    }
}

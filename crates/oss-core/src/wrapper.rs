//! The stackable storage interface. `OssWrapper` implementations can be
//! layered (e.g. [`crate::stats::StatsOss`] wraps any inner `OssWrapper`),
//! matching the native `XrdOssWrapper` decorator chain.

use std::io;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("operation attempted before Open")]
    NotOpen,
    #[error("operation attempted after Close")]
    Closed,
    #[error("handle already closed")]
    DoubleClose,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

#[derive(Debug, Clone)]
pub struct Metadata {
    pub size: u64,
    pub mode: u32,
    pub is_dir: bool,
    pub modified: SystemTime,
}

/// One scatter/gather read request: read `len` bytes starting at `offset`
/// into the correspondingly-indexed slot of the reply vector.
#[derive(Debug, Clone, Copy)]
pub struct IoVecRead {
    pub offset: u64,
    pub len: usize,
}

/// An open regular file. Every method other than `close` on a handle that
/// has already been closed returns [`Error::Closed`].
pub trait OssFile: Send {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;
    fn readv(&mut self, requests: &[IoVecRead]) -> Result<Vec<Vec<u8>>> {
        requests
            .iter()
            .map(|req| {
                let mut buf = vec![0u8; req.len];
                let n = self.read(req.offset, &mut buf)?;
                buf.truncate(n);
                Ok(buf)
            })
            .collect()
    }
    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize>;

    /// Reads one or more 4 KiB pages starting at `offset`, returning the
    /// bytes read and each page's CRC32C.
    fn pg_read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(usize, Vec<u32>)> {
        let n = self.read(offset, buf)?;
        Ok((n, crate::pgcrc::page_checksums(&buf[..n])))
    }

    /// Writes pages, verifying each against its supplied CRC32C before the
    /// write is accepted.
    fn pg_write(&mut self, offset: u64, buf: &[u8], page_crcs: &[u32]) -> Result<usize> {
        let computed = crate::pgcrc::page_checksums(buf);
        if computed != page_crcs {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "page checksum mismatch on pgWrite",
            )));
        }
        self.write(offset, buf)
    }

    fn stat(&mut self) -> Result<Metadata>;
    fn fchmod(&mut self, mode: u32) -> Result<()>;
    fn ftruncate(&mut self, size: u64) -> Result<()>;
    fn fsync(&mut self) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// An open directory, yielding entry names one at a time.
pub trait OssDirectory: Send {
    fn read_dir(&mut self) -> Result<Option<String>>;
    fn close(&mut self) -> Result<()>;
}

/// The filesystem-level operations a storage backend exposes. Implementors
/// are expected to be cheaply cloneable handles (an `Arc` internally, or
/// zero-sized when stateless) since every open call borrows `&self`.
pub trait OssWrapper: Send + Sync {
    fn open_file(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn OssFile>>;
    fn open_dir(&self, path: &Path) -> Result<Box<dyn OssDirectory>>;
    fn stat(&self, path: &Path) -> Result<Metadata>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;
    fn truncate(&self, path: &Path, size: u64) -> Result<()>;
    fn unlink(&self, path: &Path) -> Result<()>;
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Wraps any [`OssFile`] with the "reject before Open / after Close /
/// double-close" state machine the native `XrdOssDF` contract requires.
/// An [`OssWrapper::open_file`] call already returns a live handle, so
/// `Guarded` starts in the open state; it exists to make double-close and
/// post-close calls an explicit, catchable error rather than a silent
/// pass-through to the inner handle.
pub struct Guarded<F> {
    inner: Option<F>,
}

impl<F: OssFile> Guarded<F> {
    pub fn new(inner: F) -> Self {
        Guarded { inner: Some(inner) }
    }

    fn get_mut(&mut self) -> Result<&mut F> {
        self.inner.as_mut().ok_or(Error::Closed)
    }
}

impl<F: OssFile> OssFile for Guarded<F> {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.get_mut()?.read(offset, buf)
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.get_mut()?.write(offset, buf)
    }

    fn stat(&mut self) -> Result<Metadata> {
        self.get_mut()?.stat()
    }

    fn fchmod(&mut self, mode: u32) -> Result<()> {
        self.get_mut()?.fchmod(mode)
    }

    fn ftruncate(&mut self, size: u64) -> Result<()> {
        self.get_mut()?.ftruncate(size)
    }

    fn fsync(&mut self) -> Result<()> {
        self.get_mut()?.fsync()
    }

    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut f) => f.close(),
            None => Err(Error::DoubleClose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFile {
        data: Vec<u8>,
        closed: bool,
    }

    impl OssFile for FakeFile {
        fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return Ok(0);
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }
        fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
            let offset = offset as usize;
            if self.data.len() < offset + buf.len() {
                self.data.resize(offset + buf.len(), 0);
            }
            self.data[offset..offset + buf.len()].copy_from_slice(buf);
            Ok(buf.len())
        }
        fn stat(&mut self) -> Result<Metadata> {
            Ok(Metadata { size: self.data.len() as u64, mode: 0o644, is_dir: false, modified: SystemTime::now() })
        }
        fn fchmod(&mut self, _mode: u32) -> Result<()> {
            Ok(())
        }
        fn ftruncate(&mut self, size: u64) -> Result<()> {
            self.data.resize(size as usize, 0);
            Ok(())
        }
        fn fsync(&mut self) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn double_close_is_rejected() {
        let mut guarded = Guarded::new(FakeFile { data: vec![], closed: false });
        guarded.close().unwrap();
        assert!(matches!(guarded.close(), Err(Error::DoubleClose)));
    }

    #[test]
    fn operations_after_close_are_rejected() {
        let mut guarded = Guarded::new(FakeFile { data: vec![1, 2, 3], closed: false });
        guarded.close().unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(guarded.read(0, &mut buf), Err(Error::Closed)));
    }

    #[test]
    fn pg_write_rejects_a_bad_checksum() {
        let mut guarded = Guarded::new(FakeFile { data: vec![0; 4096], closed: false });
        let err = guarded.pg_write(0, &[0xAB; 4096], &[0]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn pg_write_accepts_a_correct_checksum() {
        let mut guarded = Guarded::new(FakeFile { data: vec![0; 4096], closed: false });
        let page = vec![0xABu8; 4096];
        let crcs = crate::pgcrc::page_checksums(&page);
        assert!(guarded.pg_write(0, &page, &crcs).is_ok());
    }
}

//! The bottom of the wrapper stack: an `OssWrapper` backed directly by the
//! local filesystem.

use crate::wrapper::{
    Error, Guarded, Metadata, OpenFlags, OssDirectory, OssFile, OssWrapper, Result,
};
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOss;

impl OssWrapper for LocalOss {
    fn open_file(&self, path: &Path, flags: OpenFlags) -> Result<Box<dyn OssFile>> {
        let file = OpenOptions::new()
            .read(flags.read || !flags.write)
            .write(flags.write)
            .create(flags.create)
            .truncate(flags.truncate)
            .open(path)?;
        Ok(Box::new(Guarded::new(LocalFile { file })))
    }

    fn open_dir(&self, path: &Path) -> Result<Box<dyn OssDirectory>> {
        let entries = fs::read_dir(path)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Box::new(LocalDirectory { entries: entries.into_iter(), closed: false }))
    }

    fn stat(&self, path: &Path) -> Result<Metadata> {
        to_metadata(fs::metadata(path)?)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        set_mode(path, mode)
    }

    fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(size)?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)?;
        Ok(())
    }
}

fn to_metadata(meta: fs::Metadata) -> Result<Metadata> {
    Ok(Metadata {
        size: meta.len(),
        mode: unix_mode(&meta),
        is_dir: meta.is_dir(),
        modified: meta.modified()?,
    })
}

#[cfg(unix)]
fn unix_mode(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn unix_mode(_meta: &fs::Metadata) -> u32 {
    0
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

struct LocalFile {
    file: fs::File,
}

impl OssFile for LocalFile {
    fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
        Ok(self.file.read(buf).map_err(Error::Io)?)
    }

    fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset)).map_err(Error::Io)?;
        Ok(self.file.write(buf).map_err(Error::Io)?)
    }

    fn stat(&mut self) -> Result<Metadata> {
        to_metadata(self.file.metadata()?)
    }

    fn fchmod(&mut self, mode: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            self.file.set_permissions(fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
        }
        Ok(())
    }

    fn ftruncate(&mut self, size: u64) -> Result<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    fn fsync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct LocalDirectory {
    entries: std::vec::IntoIter<String>,
    closed: bool,
}

impl OssDirectory for LocalDirectory {
    fn read_dir(&mut self) -> Result<Option<String>> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(self.entries.next())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::DoubleClose);
        }
        self.closed = true;
        Ok(())
    }
}

/// Joins a storage-local path against a base directory, rejecting any
/// component that would escape it via `..`.
pub fn join_checked(base: &Path, rel: &str) -> std::io::Result<PathBuf> {
    let mut out = base.to_path_buf();
    for comp in Path::new(rel).components() {
        match comp {
            std::path::Component::Normal(part) => out.push(part),
            std::path::Component::RootDir | std::path::Component::CurDir => {}
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path escapes the storage root",
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::OpenFlags;

    #[test]
    fn read_write_round_trips_through_the_local_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        std::fs::write(&path, b"").unwrap();

        let oss = LocalOss;
        let mut file = oss.open_file(&path, OpenFlags { read: true, write: true, ..Default::default() }).unwrap();
        file.write(0, b"hello").unwrap();

        let mut buf = [0u8; 5];
        let n = file.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        file.close().unwrap();
    }

    #[test]
    fn join_checked_rejects_parent_escapes() {
        let base = Path::new("/srv/data");
        assert!(join_checked(base, "../etc/passwd").is_err());
        assert_eq!(join_checked(base, "a/b").unwrap(), base.join("a/b"));
    }
}

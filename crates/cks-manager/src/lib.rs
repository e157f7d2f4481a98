//! Orchestrates checksum computation, persistence, and verification over
//! objects identified by their storage-local path.
//!
//! `CksManager` is the seam between the algorithm table (`cks-loader`), the
//! on-disk record format (`cks-xattr`), and the object's bytes: it streams
//! an object through a freshly minted [`cks_calc::CksCalc`], and stores or
//! compares the result via a [`cks_xattr::Store`].

mod config;
#[cfg(test)]
mod tests;

pub use config::{CksManagerConfig, PAGE_ROUND, SEGMENT_FLOOR};

use cks_xattr::CksData;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("algorithm {0:?} is not supported")]
    NotSupported(String),
    #[error("{0:?} is not a regular file")]
    NotRegular(String),
    #[error("no checksum record found for {0:?} on {1:?}")]
    NotFound(String, String),
    #[error("checksum record for {0:?} on {1:?} is stale")]
    Stale(String, String),
    #[error("checksum length does not match the algorithm's declared size")]
    LengthMismatch,
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Loader(#[from] cks_loader::Error),
    #[error(transparent)]
    XAttr(#[from] cks_xattr::Error),
}

fn io_err(path: &Path, source: std::io::Error) -> Error {
    Error::Io {
        path: path.display().to_string(),
        source,
    }
}

pub struct CksManager {
    loader: cks_loader::CksLoader,
    store: Box<dyn cks_xattr::Store + Send + Sync>,
    config: CksManagerConfig,
}

impl Default for CksManager {
    fn default() -> Self {
        Self::new(CksManagerConfig::default())
    }
}

impl CksManager {
    pub fn new(config: CksManagerConfig) -> Self {
        CksManager {
            loader: cks_loader::CksLoader::new(),
            store: Box::new(cks_xattr::FileXAttrStore),
            config,
        }
    }

    /// Builds a manager over a caller-supplied loader/store pair; primarily
    /// for tests that want a fixture `Store`.
    pub fn with_backends(
        loader: cks_loader::CksLoader,
        store: Box<dyn cks_xattr::Store + Send + Sync>,
        config: CksManagerConfig,
    ) -> Self {
        CksManager { loader, store, config }
    }

    /// The primary algorithm (table index 0), used whenever a caller passes
    /// an empty name.
    fn primary(&self) -> Result<String, Error> {
        self.loader
            .list()
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotSupported(String::new()))
    }

    fn resolve_name(&self, name: &str) -> Result<String, Error> {
        if name.is_empty() {
            self.primary()
        } else {
            Ok(name.to_string())
        }
    }

    fn mtime(path: &Path) -> Result<i64, Error> {
        let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
        if !meta.is_file() {
            return Err(Error::NotRegular(path.display().to_string()));
        }
        let mtime = meta
            .modified()
            .map_err(|e| io_err(path, e))?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(mtime)
    }

    /// Streams `path` through a fresh calculator for `name` (or the primary
    /// algorithm if empty), optionally persisting the resulting record.
    pub fn calc(&self, path: &Path, name: &str, persist: bool) -> Result<CksData, Error> {
        let name = self.resolve_name(name)?;
        let mut calc = self
            .loader
            .load(&name, "")
            .map_err(|_| Error::NotSupported(name.clone()))?;

        let file = File::open(path).map_err(|e| io_err(path, e))?;
        let meta = file.metadata().map_err(|e| io_err(path, e))?;
        if !meta.is_file() {
            return Err(Error::NotRegular(path.display().to_string()));
        }
        let fm_time = meta
            .modified()
            .map_err(|e| io_err(path, e))?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        let started = SystemTime::now();

        calc.init();
        if self.config.use_mmap && meta.len() > 0 {
            self.feed_mmap(&file, path, meta.len(), calc.as_mut())?;
        } else {
            self.feed_buffered(file, path, calc.as_mut())?;
        }
        let value = calc.finish().to_vec();

        let cs_time = SystemTime::now()
            .duration_since(started)
            .unwrap_or_default()
            .as_secs() as i32;

        let record = CksData::new(name, value, fm_time, cs_time).map_err(Error::XAttr)?;

        if persist {
            self.store.set_record(path, &record)?;
        }

        Ok(record)
    }

    fn feed_buffered(&self, mut file: File, path: &Path, calc: &mut dyn cks_calc::CksCalc) -> Result<(), Error> {
        let chunk = config::segment_size(0);
        let mut buf = vec![0u8; chunk as usize];
        loop {
            let read = file.read(&mut buf).map_err(|e| io_err(path, e))?;
            if read == 0 {
                break;
            }
            calc.update(&buf[..read]);
        }
        Ok(())
    }

    fn feed_mmap(&self, file: &File, path: &Path, len: u64, calc: &mut dyn cks_calc::CksCalc) -> Result<(), Error> {
        let mmap = unsafe { memmap2::Mmap::map(file) }.map_err(|e| io_err(path, e))?;
        #[cfg(unix)]
        let _ = mmap.advise(memmap2::Advice::Sequential);

        let segment = config::segment_size(len) as usize;
        let mut offset = 0usize;
        while offset < mmap.len() {
            let end = (offset + segment).min(mmap.len());
            calc.update(&mmap[offset..end]);
            offset = end;
        }
        Ok(())
    }

    /// Reads the stored record for `name`, returning `Stale` if the
    /// object's mtime no longer matches.
    pub fn get(&self, path: &Path, name: &str) -> Result<CksData, Error> {
        let name = self.resolve_name(name)?;
        let digest_size = self.digest_size(&name)?;

        let record = self
            .store
            .get_record(path, &name, digest_size)?
            .ok_or_else(|| Error::NotFound(name.clone(), path.display().to_string()))?;

        let current_mtime = Self::mtime(path)?;
        if record.name != name || record.is_stale(current_mtime) {
            return Err(Error::Stale(name, path.display().to_string()));
        }

        Ok(record)
    }

    /// Computes the expected checksum (from the stored record, falling back
    /// to a fresh [`Self::calc`] if stale or absent) and compares it against
    /// `value`.
    pub fn ver(&self, path: &Path, name: &str, value: &[u8]) -> Result<bool, Error> {
        let name = self.resolve_name(name)?;

        let record = match self.get(path, &name) {
            Ok(record) => record,
            Err(Error::Stale(..)) | Err(Error::NotFound(..)) => self.calc(path, &name, true)?,
            Err(err) => return Err(err),
        };

        Ok(record.value == value)
    }

    /// Persists `cks`. If `my_time == 0`, `fmTime`/`csTime` are refreshed
    /// from the object's current mtime.
    pub fn set(&self, path: &Path, name: &str, value: Vec<u8>, my_time: i64) -> Result<(), Error> {
        let name = self.resolve_name(name)?;
        let digest_size = self.digest_size(&name)?;
        if value.len() != digest_size {
            return Err(Error::LengthMismatch);
        }

        let (fm_time, cs_time) = if my_time == 0 {
            (Self::mtime(path)?, 0)
        } else {
            (my_time, 0)
        };

        let record = CksData::new(name, value, fm_time, cs_time).map_err(Error::XAttr)?;
        self.store.set_record(path, &record)?;
        Ok(())
    }

    /// Deletes the record for `name`.
    pub fn del(&self, path: &Path, name: &str) -> Result<(), Error> {
        let name = self.resolve_name(name)?;
        self.store.delete_record(path, &name)?;
        Ok(())
    }

    /// `sep`-joined list of algorithms with a record on `path`; if `path`
    /// is `None`, lists the algorithms this manager knows how to compute.
    pub fn list(&self, path: Option<&Path>, sep: &str) -> Result<String, Error> {
        let names = match path {
            Some(path) => self.store.list_records(path)?,
            None => self.loader.list(),
        };
        Ok(names.join(sep))
    }

    fn digest_size(&self, name: &str) -> Result<usize, Error> {
        let calc = self
            .loader
            .load(name, "")
            .map_err(|_| Error::NotSupported(name.to_string()))?;
        Ok(calc.algorithm().1)
    }
}

//! Packing and storage of checksum records as extended attributes.
//!
//! `CksData` is XRootD's on-disk checksum record: a bounded algorithm name,
//! a digest of up to 32 bytes, and the modification time the digest was
//! computed against. The wire format is fixed-width and endian-normalized so
//! that a record written on one architecture reads back identically on
//! another.

use byteorder::{BigEndian, ByteOrder};
use std::path::Path;

/// Maximum length of an algorithm name, including no terminator -- the name
/// is stored verbatim, not null-padded semantically (padding bytes exist on
/// the wire but are not part of the name).
pub const NAME_MAX: usize = 16;
/// Maximum digest length this record format can hold.
pub const VALUE_MAX: usize = 32;
/// `name[16] || value[32] || fmTime:i64-be || csTime:i32-be`.
pub const RECORD_SIZE: usize = NAME_MAX + VALUE_MAX + 8 + 4;

/// The legacy, pre-`XrdCks.*` extended attribute under which some
/// deployments stored a bare adler32 checksum. Never read by this crate;
/// only removed, best-effort, whenever a fresh adler32 record is stored.
pub const LEGACY_ADLER32_XATTR: &str = "user.checksum.adler32";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("algorithm name {0:?} exceeds {NAME_MAX} bytes")]
    NameTooLong(String),
    #[error("checksum length {0} is out of range 1..={VALUE_MAX}")]
    LengthOutOfRange(usize),
    #[error("record is truncated: got {0} bytes, need {RECORD_SIZE}")]
    Truncated(usize),
    #[error("extended attribute I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A checksum record, as persisted per object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CksData {
    pub name: String,
    pub value: Vec<u8>,
    /// Modification time of the object when the checksum was computed.
    pub fm_time: i64,
    /// Offset in seconds from `fm_time` to when the checksum was computed.
    pub cs_time: i32,
}

impl CksData {
    pub fn new(
        name: impl Into<String>,
        value: Vec<u8>,
        fm_time: i64,
        cs_time: i32,
    ) -> Result<Self, Error> {
        let name = name.into();
        if name.len() > NAME_MAX {
            return Err(Error::NameTooLong(name));
        }
        if value.is_empty() || value.len() > VALUE_MAX {
            return Err(Error::LengthOutOfRange(value.len()));
        }
        Ok(CksData {
            name,
            value,
            fm_time,
            cs_time,
        })
    }

    /// `length` per the data model: the number of significant value bytes.
    pub fn length(&self) -> usize {
        self.value.len()
    }

    /// Is this record stale relative to `current_mtime`?
    pub fn is_stale(&self, current_mtime: i64) -> bool {
        self.fm_time != current_mtime
    }

    /// The extended-attribute key this record is stored under.
    pub fn xattr_key(&self) -> String {
        format!("XrdCks.{}", self.name)
    }

    /// Packs the record into its fixed-width, endian-normalized wire form.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];

        let name_bytes = self.name.as_bytes();
        buf[..name_bytes.len()].copy_from_slice(name_bytes);

        buf[NAME_MAX..NAME_MAX + self.value.len()].copy_from_slice(&self.value);

        BigEndian::write_i64(&mut buf[NAME_MAX + VALUE_MAX..NAME_MAX + VALUE_MAX + 8], self.fm_time);
        BigEndian::write_i32(&mut buf[NAME_MAX + VALUE_MAX + 8..], self.cs_time);

        buf
    }

    /// Unpacks a record previously written by [`CksData::to_bytes`].
    /// `length` (the significant prefix of the value field) must be passed
    /// separately because the wire format alone cannot distinguish trailing
    /// zero padding from a digest that legitimately ends in zero bytes;
    /// callers get it from the algorithm table (`cks-calc`/`cks-loader`).
    pub fn from_bytes(bytes: &[u8], length: usize) -> Result<Self, Error> {
        if bytes.len() < RECORD_SIZE {
            return Err(Error::Truncated(bytes.len()));
        }
        if length == 0 || length > VALUE_MAX {
            return Err(Error::LengthOutOfRange(length));
        }

        let name_end = bytes[..NAME_MAX]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_MAX);
        let name = String::from_utf8_lossy(&bytes[..name_end]).into_owned();

        let value = bytes[NAME_MAX..NAME_MAX + length].to_vec();

        let fm_time = BigEndian::read_i64(&bytes[NAME_MAX + VALUE_MAX..NAME_MAX + VALUE_MAX + 8]);
        let cs_time = BigEndian::read_i32(&bytes[NAME_MAX + VALUE_MAX + 8..]);

        Ok(CksData {
            name,
            value,
            fm_time,
            cs_time,
        })
    }
}

/// Extended-attribute backed storage for checksum records.
pub trait Store {
    fn get_record(&self, path: &Path, name: &str, length: usize) -> Result<Option<CksData>, Error>;
    fn set_record(&self, path: &Path, record: &CksData) -> Result<(), Error>;
    fn delete_record(&self, path: &Path, name: &str) -> Result<(), Error>;
    /// Names of algorithms that have a `XrdCks.*` record attached to `path`.
    fn list_records(&self, path: &Path) -> Result<Vec<String>, Error>;
}

/// The real [`Store`], backed by the platform's extended attributes via the
/// `xattr` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileXAttrStore;

impl Store for FileXAttrStore {
    fn get_record(&self, path: &Path, name: &str, length: usize) -> Result<Option<CksData>, Error> {
        let key = format!("XrdCks.{name}");
        match xattr::get(path, &key)? {
            Some(bytes) => Ok(Some(CksData::from_bytes(&bytes, length)?)),
            None => Ok(None),
        }
    }

    fn set_record(&self, path: &Path, record: &CksData) -> Result<(), Error> {
        xattr::set(path, record.xattr_key(), &record.to_bytes())?;

        if record.name == "adler32" {
            // Best-effort; the legacy key may never have existed.
            if let Err(err) = xattr::remove(path, LEGACY_ADLER32_XATTR) {
                tracing::debug!(?err, path = %path.display(), "no legacy adler32 attribute to remove");
            }
        }

        Ok(())
    }

    fn delete_record(&self, path: &Path, name: &str) -> Result<(), Error> {
        let key = format!("XrdCks.{name}");
        xattr::remove(path, &key)?;
        Ok(())
    }

    fn list_records(&self, path: &Path) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        for key in xattr::list(path)? {
            let Some(key) = key.to_str() else { continue };
            if let Some(name) = key.strip_prefix("XrdCks.") {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_unpack_round_trips_regardless_of_host_endianness() {
        let record = CksData::new("adler32", vec![0x02, 0x4d, 0x01, 0x27], 1_700_000_000, 3).unwrap();

        let bytes = record.to_bytes();
        // fmTime/csTime must be big-endian on the wire irrespective of host.
        assert_eq!(&bytes[NAME_MAX + VALUE_MAX..NAME_MAX + VALUE_MAX + 8], &1_700_000_000i64.to_be_bytes());
        assert_eq!(&bytes[NAME_MAX + VALUE_MAX + 8..], &3i32.to_be_bytes());

        let round_tripped = CksData::from_bytes(&bytes, record.length()).unwrap();
        assert_eq!(round_tripped, record);
    }

    #[test]
    fn rejects_name_too_long() {
        let err = CksData::new("a-very-long-algorithm-name", vec![1], 0, 0).unwrap_err();
        assert!(matches!(err, Error::NameTooLong(_)));
    }

    #[test]
    fn rejects_value_out_of_range() {
        assert!(matches!(
            CksData::new("crc32", vec![], 0, 0).unwrap_err(),
            Error::LengthOutOfRange(0)
        ));
        assert!(matches!(
            CksData::new("crc32", vec![0; 33], 0, 0).unwrap_err(),
            Error::LengthOutOfRange(33)
        ));
    }

    #[test]
    fn is_stale_iff_mtime_differs() {
        let record = CksData::new("md5", vec![0; 16], 100, 0).unwrap();
        assert!(!record.is_stale(100));
        assert!(record.is_stale(101));
    }

    #[test]
    fn file_store_round_trips_and_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object");
        std::fs::write(&path, b"hello").unwrap();

        let store = FileXAttrStore;
        let record = CksData::new("adler32", vec![0x02, 0x4d, 0x01, 0x27], 42, 1).unwrap();
        store.set_record(&path, &record).unwrap();

        let fetched = store.get_record(&path, "adler32", 4).unwrap().unwrap();
        assert_eq!(fetched, record);

        assert_eq!(store.list_records(&path).unwrap(), vec!["adler32".to_string()]);

        store.delete_record(&path, "adler32").unwrap();
        assert!(store.get_record(&path, "adler32", 4).unwrap().is_none());
    }
}

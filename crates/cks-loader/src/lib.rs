//! Table of known checksum algorithms, dynamically growing as plugins are
//! loaded.
//!
//! Mirrors the native `XrdCksLoader`: a small fixed-capacity table (bundled
//! algorithms occupy the first few slots unloaded -- they're constructed on
//! first use, not at startup) that `Load` consults before reaching for a
//! shared library named `lib/libXrdCksCalc<name>.so`.

mod dynamic;
mod ffi;

pub use dynamic::DynamicCalc;
pub use ffi::{CksCalcHandle, CksCalcVTable, PluginInitFn, ENTRY_POINT_SYMBOL};

use cks_calc::CksCalc;
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// The table holds at most this many distinct algorithms at once, matching
/// the native loader's fixed-size slot array.
pub const MAX_ENTRIES: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("checksum algorithm {0:?} is not supported")]
    NotSupported(String),
    #[error("checksum algorithm table is full ({MAX_ENTRIES} entries)")]
    TableFull,
    #[error("plugin for {0:?} returned a handle for a different algorithm ({1:?})")]
    NameMismatch(String, String),
    #[error("failed to load plugin library for {name:?}: {source}")]
    PluginLoad {
        name: String,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin for {0:?} has no {sym} entry point", sym = String::from_utf8_lossy(ENTRY_POINT_SYMBOL))]
    MissingEntryPoint(String),
    #[error("plugin for {0:?} returned a null handle")]
    InitFailed(String),
}

enum Builtin {
    Adler32,
    Crc32,
    Zcrc32,
    Md5,
}

impl Builtin {
    fn construct(&self) -> Box<dyn CksCalc> {
        match self {
            Builtin::Adler32 => Box::new(cks_calc::Adler32::new()),
            Builtin::Crc32 => Box::new(cks_calc::Crc32::new()),
            Builtin::Zcrc32 => Box::new(cks_calc::Zcrc32::new()),
            Builtin::Md5 => Box::new(cks_calc::Md5::new()),
        }
    }
}

enum Entry {
    Builtin { name: &'static str, kind: Builtin },
    Plugin { name: String, library: Arc<libloading::Library> },
}

impl Entry {
    fn name(&self) -> &str {
        match self {
            Entry::Builtin { name, .. } => name,
            Entry::Plugin { name, .. } => name,
        }
    }
}

/// Locates and mints checksum calculators, loading plugin libraries on
/// demand the first time an unrecognized algorithm name is requested.
pub struct CksLoader {
    table: RwLock<Vec<Entry>>,
    /// `{}` is replaced with the algorithm name; e.g. `lib/libXrdCksCalc{}.so`.
    lib_pattern: String,
}

impl Default for CksLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CksLoader {
    pub fn new() -> Self {
        CksLoader {
            table: RwLock::new(vec![
                Entry::Builtin { name: "adler32", kind: Builtin::Adler32 },
                Entry::Builtin { name: "crc32", kind: Builtin::Crc32 },
                Entry::Builtin { name: "zcrc32", kind: Builtin::Zcrc32 },
                Entry::Builtin { name: "md5", kind: Builtin::Md5 },
            ]),
            lib_pattern: "lib/libXrdCksCalc{}.so".to_string(),
        }
    }

    /// Overrides the shared-library path pattern used to locate plugins;
    /// `{}` is substituted with the requested algorithm name. Primarily for
    /// tests that point at a fixture directory.
    pub fn with_lib_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.lib_pattern = pattern.into();
        self
    }

    /// True if `name` is already known -- bundled, or a previously loaded
    /// plugin -- without attempting to load anything.
    pub fn find(&self, name: &str) -> bool {
        self.table.read().unwrap().iter().any(|e| e.name() == name)
    }

    /// Names of every algorithm currently in the table.
    pub fn list(&self) -> Vec<String> {
        self.table.read().unwrap().iter().map(|e| e.name().to_string()).collect()
    }

    /// Returns a freshly initialized calculator for `name`, loading a plugin
    /// library if `name` isn't bundled and isn't already loaded.
    ///
    /// `parms` is passed verbatim to a plugin's entry point (e.g.
    /// `"blksize=1048576"`); bundled algorithms ignore it.
    pub fn load(&self, name: &str, parms: &str) -> Result<Box<dyn CksCalc>, Error> {
        {
            let table = self.table.read().unwrap();
            if let Some(entry) = table.iter().find(|e| e.name() == name) {
                return self.instantiate(entry);
            }
        }

        let path = PathBuf::from(self.lib_pattern.replace("{}", name));
        let library = unsafe { libloading::Library::new(&path) }
            .map_err(|source| Error::PluginLoad { name: name.to_string(), source })?;

        let handle = unsafe {
            let init: libloading::Symbol<PluginInitFn> = library
                .get(ENTRY_POINT_SYMBOL)
                .map_err(|_| Error::MissingEntryPoint(name.to_string()))?;

            let c_name = CString::new(name).unwrap();
            let c_parms = CString::new(parms).unwrap();
            let raw = init(c_name.as_ptr(), c_parms.as_ptr());
            if raw.is_null() {
                return Err(Error::InitFailed(name.to_string()));
            }
            raw
        };

        let library = Arc::new(library);
        let calc: Box<dyn CksCalc> =
            Box::new(unsafe { DynamicCalc::new(handle, leak_name(name), Arc::clone(&library)) });

        let mut table = self.table.write().unwrap();
        if table.iter().any(|e| e.name() == name) {
            // Lost a race with another loader call; drop our load and reuse
            // the winner's entry so the table never double-registers.
            return self.instantiate(table.iter().find(|e| e.name() == name).unwrap());
        }
        if table.len() >= MAX_ENTRIES {
            return Err(Error::TableFull);
        }
        table.push(Entry::Plugin { name: name.to_string(), library });

        Ok(calc)
    }

    fn instantiate(&self, entry: &Entry) -> Result<Box<dyn CksCalc>, Error> {
        match entry {
            Entry::Builtin { kind, .. } => Ok(kind.construct()),
            Entry::Plugin { name, library } => {
                let handle = unsafe {
                    let init: libloading::Symbol<PluginInitFn> = library
                        .get(ENTRY_POINT_SYMBOL)
                        .map_err(|_| Error::MissingEntryPoint(name.clone()))?;
                    let c_name = CString::new(name.as_str()).unwrap();
                    let c_parms = CString::new("").unwrap();
                    let raw = init(c_name.as_ptr(), c_parms.as_ptr());
                    if raw.is_null() {
                        return Err(Error::InitFailed(name.clone()));
                    }
                    raw
                };
                Ok(Box::new(unsafe {
                    DynamicCalc::new(handle, leak_name(name), Arc::clone(library))
                }))
            }
        }
    }
}

/// Plugin algorithm names are a closed, small set in practice; leaking the
/// name string lets [`CksCalc::algorithm`] return `&'static str` without
/// forcing every caller to deal with an owned name.
fn leak_name(name: &str) -> &'static str {
    Box::leak(name.to_string().into_boxed_str())
}

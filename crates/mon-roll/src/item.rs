//! The per-variable building blocks of a registered counter set.

use std::sync::atomic::{
    AtomicI16, AtomicI32, AtomicI64, AtomicI8, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering,
};
use std::sync::{Arc, RwLock};

/// A typed, relaxed-atomic binary counter. Reads never synchronize with
/// other counters -- monitoring snapshots are best-effort consistent, not
/// transactional, matching the native `RAtomic_*` reporting contract.
#[derive(Clone)]
pub enum Counter {
    I8(Arc<AtomicI8>),
    U8(Arc<AtomicU8>),
    I16(Arc<AtomicI16>),
    U16(Arc<AtomicU16>),
    I32(Arc<AtomicI32>),
    U32(Arc<AtomicU32>),
    I64(Arc<AtomicI64>),
    U64(Arc<AtomicU64>),
    /// No stable atomic float exists; a double/float counter is guarded by
    /// its own lock, mirroring the native `double&`/`float&` reference
    /// member (those are not atomics either -- they're read under whatever
    /// external synchronization the registering component already holds).
    F64(Arc<RwLock<f64>>),
}

impl Counter {
    pub fn load(&self) -> serde_json::Number {
        match self {
            Counter::I8(a) => (a.load(Ordering::Relaxed) as i64).into(),
            Counter::U8(a) => (a.load(Ordering::Relaxed) as u64).into(),
            Counter::I16(a) => (a.load(Ordering::Relaxed) as i64).into(),
            Counter::U16(a) => (a.load(Ordering::Relaxed) as u64).into(),
            Counter::I32(a) => (a.load(Ordering::Relaxed) as i64).into(),
            Counter::U32(a) => (a.load(Ordering::Relaxed) as u64).into(),
            Counter::I64(a) => a.load(Ordering::Relaxed).into(),
            Counter::U64(a) => a.load(Ordering::Relaxed).into(),
            Counter::F64(lock) => {
                serde_json::Number::from_f64(*lock.read().unwrap()).unwrap_or_else(|| 0.into())
            }
        }
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Counter({})", self.load())
    }
}

/// Source of a text-valued item: a fixed string, or one shared with the
/// owning component so updates are visible without re-registering.
#[derive(Clone, Debug)]
pub enum TextSource {
    Static(&'static str),
    Shared(Arc<RwLock<String>>),
}

impl TextSource {
    pub fn read(&self) -> String {
        match self {
            TextSource::Static(s) => s.to_string(),
            TextSource::Shared(s) => s.read().unwrap().clone(),
        }
    }
}

/// A schema marker delimiting a nested array or object in the flat item
/// stream. `begArray`/`endArray` and `begObject`/`endObject` must nest and
/// pair up like parentheses; the end marker's key, if given, must match its
/// opening marker's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Schema {
    BegArray(&'static str),
    EndArray(Option<&'static str>),
    BegObject(&'static str),
    EndObject(Option<&'static str>),
}

/// One element of a registered counter set's flat item stream.
#[derive(Clone, Debug)]
pub enum Item {
    Counter { key: Option<&'static str>, value: Counter },
    Text { key: Option<&'static str>, value: TextSource },
    /// A lock-scope boundary around the items that follow, carried over
    /// from the native `Item(bool, XrdSysMutex&)` constructor. Rendering
    /// ignores it entirely; it exists only so registering components can
    /// document which items share a critical section upstream.
    MutexBoundary,
    Schema(Schema),
}

impl Item {
    pub fn counter(key: &'static str, value: Counter) -> Self {
        Item::Counter { key: Some(key), value }
    }

    /// An array-element counter; its key is ignored for JSON but used as
    /// the XML tag.
    pub fn array_counter(value: Counter) -> Self {
        Item::Counter { key: None, value }
    }

    pub fn text(key: &'static str, value: impl Into<TextSource>) -> Self {
        Item::Text { key: Some(key), value: value.into() }
    }
}

impl From<&'static str> for TextSource {
    fn from(s: &'static str) -> Self {
        TextSource::Static(s)
    }
}

impl From<Arc<RwLock<String>>> for TextSource {
    fn from(s: Arc<RwLock<String>>) -> Self {
        TextSource::Shared(s)
    }
}

//! The stackable object-storage interface (`OssWrapper`) and the
//! latency/count instrumentation plugin (`OssStats`) built on top of it.

mod local;
mod pgcrc;
mod stats;
mod wrapper;

pub use local::{join_checked, LocalOss};
pub use pgcrc::{crc32c, page_checksums, PAGE_SIZE};
pub use stats::{Counters, OpCounters, OpTimer, StatsOss, TimingCounters};
pub use wrapper::{
    Error, Guarded, IoVecRead, Metadata, OpenFlags, OssDirectory, OssFile, OssWrapper, Result,
};

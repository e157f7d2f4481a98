/// Segmented-read floor: the native implementation streams objects in
/// `XrdSys::File`-sized chunks no smaller than this.
pub const SEGMENT_FLOOR: u64 = 64 * 1024 * 1024;

/// All segment sizes are rounded up to a multiple of this.
pub const PAGE_ROUND: u64 = 64 * 1024;

/// Tunables for [`crate::CksManager`].
#[derive(Debug, Clone)]
pub struct CksManagerConfig {
    /// Use a memory-mapped read path with `MADV_SEQUENTIAL` advice instead
    /// of buffered `Read` calls. Defaults to `true` on unix, `false`
    /// elsewhere (mmap + madvise is a unix-specific combination here).
    pub use_mmap: bool,
}

impl Default for CksManagerConfig {
    fn default() -> Self {
        CksManagerConfig {
            use_mmap: cfg!(unix),
        }
    }
}

/// Rounds `len` up to the nearest multiple of `PAGE_ROUND`, then to at least
/// `SEGMENT_FLOOR`.
pub(crate) fn segment_size(len: u64) -> u64 {
    let rounded = ((len + PAGE_ROUND - 1) / PAGE_ROUND) * PAGE_ROUND;
    rounded.max(SEGMENT_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_page_and_floors_at_segment_floor() {
        assert_eq!(segment_size(0), SEGMENT_FLOOR);
        assert_eq!(segment_size(1), SEGMENT_FLOOR);
        assert_eq!(segment_size(SEGMENT_FLOOR + 1), SEGMENT_FLOOR + PAGE_ROUND);
        assert_eq!(segment_size(SEGMENT_FLOOR + PAGE_ROUND), SEGMENT_FLOOR + PAGE_ROUND);
    }
}

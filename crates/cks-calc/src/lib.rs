//! Incremental checksum calculators.
//!
//! Every algorithm (bundled or dynamically loaded by `cks-loader`) satisfies
//! [`CksCalc`]: a stateful digester that can be fed bytes in any chunking and
//! still produce the same digest as if it had been fed the whole input at
//! once. `update` is associative: splitting the input at any boundary and
//! feeding the halves separately must agree with feeding the whole thing.

mod adler32;
mod crc32;
mod md5;
mod zcrc32;

pub use adler32::Adler32;
pub use crc32::Crc32;
pub use zcrc32::Zcrc32;

pub use self::md5::Md5;

/// An incremental checksum algorithm.
///
/// `final()`'s output is tied to the calculator's own lifetime: callers read
/// it via [`CksCalc::finish`] before doing anything else with the
/// calculator. A subsequent `update` after `finish` without an intervening
/// `init` is unspecified, matching the native contract this trait mirrors.
pub trait CksCalc: Send + std::fmt::Debug {
    /// Resets the calculator to its zero state. Legal at any point.
    fn init(&mut self);

    /// Feeds `data` into the running digest.
    fn update(&mut self, data: &[u8]);

    /// Concludes the computation (if needed) and returns the digest bytes,
    /// in network (big-endian) byte order for any fixed-width integer the
    /// algorithm is built from.
    fn finish(&mut self) -> &[u8];

    /// The algorithm's registered name and fixed digest size, in bytes.
    fn algorithm(&self) -> (&'static str, usize);

    /// Returns a fresh, independently-initialized instance of the same
    /// algorithm. Unlike a deep clone, the new instance does not carry over
    /// any accumulated state -- this is `CksLoader`'s "mint me a new
    /// calculator" operation.
    fn new_instance(&self) -> Box<dyn CksCalc>;

    /// Releases any calculator-owned resources ahead of drop. Bundled
    /// algorithms have nothing to release; dynamically loaded calculators
    /// may use this to return themselves to a plugin-owned pool.
    fn recycle(self: Box<Self>) {}
}

#[cfg(test)]
mod associativity {
    use super::*;

    fn check_associative(mut calc: Box<dyn CksCalc>, input: &[u8]) {
        for split in 0..=input.len() {
            let (a, b) = input.split_at(split);

            calc.init();
            calc.update(a);
            calc.update(b);
            let split_digest = calc.finish().to_vec();

            calc.init();
            calc.update(input);
            let whole_digest = calc.finish().to_vec();

            assert_eq!(
                split_digest,
                whole_digest,
                "algorithm {} disagreed when split at {split}",
                calc.algorithm().0
            );
        }
    }

    #[test]
    fn adler32_is_associative() {
        check_associative(Box::new(Adler32::new()), b"the quick brown fox jumps");
    }

    #[test]
    fn crc32_is_associative() {
        check_associative(Box::new(Crc32::new()), b"the quick brown fox jumps");
    }

    #[test]
    fn zcrc32_is_associative() {
        check_associative(Box::new(Zcrc32::new()), b"the quick brown fox jumps");
    }

    #[test]
    fn md5_is_associative() {
        check_associative(Box::new(Md5::new()), b"the quick brown fox jumps");
    }
}

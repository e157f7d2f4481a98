use crate::CksCalc;

/// RFC 1321 MD5, delegating the incremental digest to the `md5` crate.
/// The digest is 16 raw bytes rather than a fixed-width integer, so there is
/// no host-endianness concern: the bytes produced are already the canonical
/// RFC 1321 output regardless of platform.
#[derive(Debug)]
pub struct Md5 {
    ctx: ::md5::Context,
    digest: [u8; 16],
}

impl Md5 {
    pub fn new() -> Self {
        Md5 {
            ctx: ::md5::Context::new(),
            digest: [0; 16],
        }
    }
}

impl Default for Md5 {
    fn default() -> Self {
        Self::new()
    }
}

impl CksCalc for Md5 {
    fn init(&mut self) {
        self.ctx = ::md5::Context::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.ctx.consume(data);
    }

    fn finish(&mut self) -> &[u8] {
        // `Context::compute` concludes the computation (appends RFC 1321's
        // length padding) and consumes the context, so swap in a fresh one
        // to keep `finish` callable without requiring an `init` first.
        let ctx = std::mem::replace(&mut self.ctx, ::md5::Context::new());
        self.digest = ctx.compute().0;
        &self.digest
    }

    fn algorithm(&self) -> (&'static str, usize) {
        ("md5", 16)
    }

    fn new_instance(&self) -> Box<dyn CksCalc> {
        Box::new(Md5::new())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_digest_matches_rfc1321() {
        let mut calc = Md5::new();
        let digest = calc.finish();
        assert_eq!(
            digest,
            &[
                0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8,
                0x42, 0x7e,
            ]
        );
    }

    #[test]
    fn split_update_matches_whole() {
        let data = b"the quick brown fox jumps over the lazy dog";

        let mut whole = Md5::new();
        whole.update(data);
        let whole = whole.finish().to_vec();

        let mut split = Md5::new();
        split.update(&data[..9]);
        split.update(&data[9..]);
        let split = split.finish().to_vec();

        assert_eq!(whole, split);
    }
}

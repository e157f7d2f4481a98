use crate::CksCalc;

/// `zcrc32` is a thin wrapper over the deflate/zlib CRC-32 (the same
/// algorithm `gzip` and `PNG` checksums use) -- unlike `crc32` above, it
/// carries no XRootD-specific length suffix.
#[derive(Debug)]
pub struct Zcrc32 {
    hasher: crc32fast::Hasher,
    digest: [u8; 4],
}

impl Zcrc32 {
    pub fn new() -> Self {
        Zcrc32 {
            hasher: crc32fast::Hasher::new(),
            digest: [0; 4],
        }
    }
}

impl Default for Zcrc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl CksCalc for Zcrc32 {
    fn init(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finish(&mut self) -> &[u8] {
        let value = self.hasher.clone().finalize();
        self.digest = value.to_be_bytes();
        &self.digest
    }

    fn algorithm(&self) -> (&'static str, usize) {
        ("zcrc32", 4)
    }

    fn new_instance(&self) -> Box<dyn CksCalc> {
        Box::new(Zcrc32::new())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_zlib_crc32_of_empty() {
        let mut calc = Zcrc32::new();
        assert_eq!(u32::from_be_bytes(calc.finish().try_into().unwrap()), 0);
    }

    #[test]
    fn split_update_matches_whole() {
        let data = b"the quick brown fox jumps over the lazy dog";

        let mut whole = Zcrc32::new();
        whole.update(data);
        let whole = whole.finish().to_vec();

        let mut split = Zcrc32::new();
        split.update(&data[..12]);
        split.update(&data[12..]);
        let split = split.finish().to_vec();

        assert_eq!(whole, split);
    }
}

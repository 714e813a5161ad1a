use std::fmt;
use std::io::{self, Read, Write};

use sha2::{Digest as _, Sha256};

const ALGORITHM: &str = "sha256";

/// A `sha256:<hex>` content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    encoded: String,
}

impl Digest {
    fn from_hasher(hasher: Sha256) -> Self {
        Self {
            encoded: hex::encode(hasher.finalize()),
        }
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_hasher(Sha256::new_with_prefix(bytes))
    }

    /// Hashes everything `reader` yields and returns the digest and byte count.
    pub fn of_reader<R: Read>(mut reader: R) -> io::Result<(Self, u64)> {
        let mut writer = HashingWriter::new(io::sink());
        io::copy(&mut reader, &mut writer)?;
        let (_, digest, size) = writer.finish();
        Ok((digest, size))
    }

    /// The hex part, without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ALGORITHM}:{}", self.encoded)
    }
}

/// Forwards writes to `inner` while hashing and counting them.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    pub fn finish(self) -> (W, Digest, u64) {
        (
            self.inner,
            Digest::from_hasher(self.hasher),
            self.bytes_written,
        )
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes_written = self
            .bytes_written
            .saturating_add(written.try_into().unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hashes_known_content() {
        let digest = Digest::of_bytes(b"hello");
        assert_eq!(digest.encoded(), HELLO);
        assert_eq!(digest.to_string(), format!("sha256:{HELLO}"));
    }

    #[test]
    fn hashing_writer_tees_and_counts() {
        let mut writer = HashingWriter::new(Vec::new());
        writer.write_all(b"hel").expect("write");
        writer.write_all(b"lo").expect("write");
        let (inner, digest, size) = writer.finish();
        assert_eq!(inner, b"hello");
        assert_eq!(size, 5);
        assert_eq!(digest, Digest::of_bytes(b"hello"));
    }

    #[test]
    fn reader_digest_matches_bytes() {
        let (digest, size) = Digest::of_reader(&b"hello"[..]).expect("read");
        assert_eq!(size, 5);
        assert_eq!(digest.encoded(), HELLO);
    }
}

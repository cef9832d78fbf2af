use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::{Result, SyncError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    /// Pick the algorithm matching an expected hex digest. Anything that is
    /// not a SHA-256 sized digest is treated as MD5, the manifest default.
    pub fn for_expected(expected: &str) -> Self {
        if expected.trim().len() == 64 {
            DigestAlgorithm::Sha256
        } else {
            DigestAlgorithm::Md5
        }
    }
}

const READ_BUFFER: usize = 8192;

enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(chunk),
            Hasher::Sha256(hasher) => hasher.update(chunk),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.finalize()),
            Hasher::Sha256(hasher) => format!("{:x}", hasher.finalize()),
        }
    }
}

/// Lowercase hex digest of the file at `path`, read in fixed-size chunks.
pub async fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> Result<String> {
    let mut file = File::open(path)
        .await
        .map_err(|e| SyncError::read(path, e))?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = [0u8; READ_BUFFER];
    loop {
        let read = file
            .read(&mut buf)
            .await
            .map_err(|e| SyncError::read(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish())
}

pub fn digest_bytes(content: &[u8], algorithm: DigestAlgorithm) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => format!("{:x}", md5::compute(content)),
        DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(content)),
    }
}

/// Compare an actual digest against the published one.
pub fn digests_match(actual: &str, expected: &str) -> bool {
    actual.eq_ignore_ascii_case(expected.trim())
}

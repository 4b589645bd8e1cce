//! Checksum computation for verify-after-upload.
//!
//! Content is digested as it streams to the destination; the destination
//! object is then read back and digested again. Supported algorithms:
//! - MD5 (md5 crate)
//! - SHA-256 (sha2 crate)
//! - BLAKE3 (blake3 crate)

use std::sync::{Arc, Mutex};

use futures::TryStreamExt;
use serde::Serialize;

use crate::error::StoreError;
use crate::store::ByteStream;

/// Checksum algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    /// Parse from a configuration string (case-insensitive).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Some(ChecksumAlgorithm::Md5),
            "sha256" | "sha-256" => Some(ChecksumAlgorithm::Sha256),
            "blake3" => Some(ChecksumAlgorithm::Blake3),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// A computed checksum value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as `algorithm:hex`.
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl std::fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental hasher.
pub trait ChecksumHasher: Send {
    fn update(&mut self, data: &[u8]);
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Digest an in-memory buffer.
pub fn compute_checksum(data: &[u8], algorithm: ChecksumAlgorithm) -> ChecksumValue {
    let mut hasher = create_hasher(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Digest a byte stream to completion.
pub async fn compute_stream_checksum(
    mut stream: ByteStream,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, StoreError> {
    let mut hasher = create_hasher(algorithm);
    while let Some(chunk) = stream.try_next().await? {
        hasher.update(&chunk);
    }
    Ok(hasher.finalize())
}

/// Wrap a stream so every chunk passing through is digested.
///
/// The returned `StreamDigest` yields the checksum once the stream has been
/// fully consumed by whoever owns it.
pub fn digesting(stream: ByteStream, algorithm: ChecksumAlgorithm) -> (ByteStream, StreamDigest) {
    let shared = Arc::new(Mutex::new(Some(create_hasher(algorithm))));
    let tap = Arc::clone(&shared);
    let stream = stream.inspect_ok(move |chunk| {
        if let Ok(mut guard) = tap.lock() {
            if let Some(hasher) = guard.as_mut() {
                hasher.update(chunk);
            }
        }
    });
    (Box::pin(stream), StreamDigest { shared })
}

/// Handle to a digest computed by `digesting`.
pub struct StreamDigest {
    shared: Arc<Mutex<Option<Box<dyn ChecksumHasher>>>>,
}

impl StreamDigest {
    /// Take the finished checksum. Returns None if already taken.
    pub fn finish(self) -> Option<ChecksumValue> {
        let hasher = self.shared.lock().ok()?.take()?;
        Some(hasher.finalize())
    }
}

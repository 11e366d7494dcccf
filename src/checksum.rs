//! Content digests and checksum verification
//!
//! Digests are written as `{algorithm}:{lowercase hex}`. Published checksum
//! files that carry a bare hex string (optionally followed by a file name)
//! are accepted and the algorithm is inferred from the length.

use crate::error::{GrabError, GrabResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Buffer size for streaming file digests (64KB)
const BUFFER_SIZE: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Length of the hex encoding for this algorithm
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Extension of a published checksum file (`.sha256`, `.sha512`)
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Compute the digest of a byte slice
    pub fn digest(&self, bytes: &[u8]) -> Digest {
        let hex = match self {
            Self::Sha256 => hex::encode(Sha256::digest(bytes)),
            Self::Sha512 => hex::encode(Sha512::digest(bytes)),
        };
        Digest {
            algorithm: *self,
            hex,
        }
    }

    /// Compute the digest of a file without loading it into memory
    pub fn digest_file(&self, path: &Path) -> GrabResult<Digest> {
        let mut file = File::open(path)
            .map_err(|e| GrabError::io(format!("opening {}", path.display()), e))?;
        let mut buffer = vec![0u8; BUFFER_SIZE];

        let hex = match self {
            Self::Sha256 => {
                let mut hasher = Sha256::new();
                stream_into(&mut file, &mut buffer, path, |chunk| hasher.update(chunk))?;
                hex::encode(hasher.finalize())
            }
            Self::Sha512 => {
                let mut hasher = Sha512::new();
                stream_into(&mut file, &mut buffer, path, |chunk| hasher.update(chunk))?;
                hex::encode(hasher.finalize())
            }
        };

        Ok(Digest {
            algorithm: *self,
            hex,
        })
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            64 => Some(Self::Sha256),
            128 => Some(Self::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_extension())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = GrabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            other => Err(GrabError::InvalidDigest {
                input: s.to_string(),
                reason: format!("unsupported algorithm '{}'", other),
            }),
        }
    }
}

fn stream_into(
    file: &mut File,
    buffer: &mut [u8],
    path: &Path,
    mut update: impl FnMut(&[u8]),
) -> GrabResult<()> {
    loop {
        let bytes_read = file
            .read(buffer)
            .map_err(|e| GrabError::io(format!("reading {}", path.display()), e))?;
        if bytes_read == 0 {
            return Ok(());
        }
        update(&buffer[..bytes_read]);
    }
}

/// A content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    pub algorithm: ChecksumAlgorithm,
    pub hex: String,
}

impl Digest {
    /// SHA-256 of a byte slice, the digest recorded for every cached artifact
    pub fn sha256(bytes: &[u8]) -> Self {
        ChecksumAlgorithm::Sha256.digest(bytes)
    }

    /// Parse `algo:hex`, or a bare hex string as found in published checksum files
    pub fn parse(input: &str) -> GrabResult<Self> {
        let invalid = |reason: String| GrabError::InvalidDigest {
            input: input.to_string(),
            reason,
        };

        // Published files may read "<hex>  <filename>"
        let token = input.split_whitespace().next().unwrap_or_default();

        let (algorithm, hex) = match token.split_once(':') {
            Some((algo, hex)) => (algo.parse::<ChecksumAlgorithm>()?, hex),
            None => {
                let algorithm = ChecksumAlgorithm::from_hex_len(token.len())
                    .ok_or_else(|| invalid(format!("unrecognized digest length {}", token.len())))?;
                (algorithm, token)
            }
        };

        if hex.len() != algorithm.hex_len() {
            return Err(invalid(format!(
                "{} digest must be {} hex characters",
                algorithm,
                algorithm.hex_len()
            )));
        }
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("digest must be hexadecimal".to_string()));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_ascii_lowercase(),
        })
    }

    /// Abbreviated form for display
    pub fn short(&self) -> &str {
        &self.hex[..12.min(self.hex.len())]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = GrabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Compares content against expected digests
///
/// A disabled verifier accepts everything. That is a caller-selected
/// relaxation, used when checksums are turned off for a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumVerifier {
    enabled: bool,
}

impl ChecksumVerifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Verifier that skips all checks
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `bytes` hash to `expected` under its algorithm
    pub fn verify(&self, bytes: &[u8], expected: &Digest) -> bool {
        if !self.enabled {
            return true;
        }
        expected.algorithm.digest(bytes) == *expected
    }

    /// Whether the file at `path` hashes to `expected`
    pub fn verify_file(&self, path: &Path, expected: &Digest) -> GrabResult<bool> {
        if !self.enabled {
            return Ok(true);
        }
        Ok(expected.algorithm.digest_file(path)? == *expected)
    }
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::new(true)
    }
}

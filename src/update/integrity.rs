//! Artifact integrity verification.
//!
//! An artifact is trusted only when it is larger than the size floor and,
//! if the manifest publishes a digest, when its digest matches. Nothing in
//! this module deletes files; callers decide what to do with a rejected one.

use crate::error::IntegrityError;
use crate::update::manifest::ReleaseManifest;
use md5::Md5;
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const BUF_SIZE: usize = 64 * 1024;

/// Digest algorithms a manifest hash can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// MD5, 32 hex characters.
    Md5,
    /// SHA-256, 64 hex characters.
    Sha256,
    /// SHA-512, 128 hex characters.
    Sha512,
}

/// A manifest hash split into algorithm and lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedHash {
    /// Algorithm to compute.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex digest.
    pub hex: String,
}

impl ExpectedHash {
    /// Interpret a manifest hash.
    ///
    /// An `md5:`, `sha256:` or `sha512:` prefix selects the algorithm;
    /// otherwise it is inferred from the digest length.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::UnrecognizedHash`] for anything that is not
    /// a hex digest of a supported algorithm.
    pub fn parse(raw: &str) -> Result<Self, IntegrityError> {
        let trimmed = raw.trim();
        let (prefixed, digest) = match trimmed.split_once(':') {
            Some((algo, digest)) => {
                let algorithm = match algo.to_ascii_lowercase().as_str() {
                    "md5" => HashAlgorithm::Md5,
                    "sha256" => HashAlgorithm::Sha256,
                    "sha512" => HashAlgorithm::Sha512,
                    _ => return Err(IntegrityError::UnrecognizedHash(raw.to_string())),
                };
                (Some(algorithm), digest)
            }
            None => (None, trimmed),
        };

        if digest.is_empty() || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IntegrityError::UnrecognizedHash(raw.to_string()));
        }

        let by_length = match digest.len() {
            32 => Some(HashAlgorithm::Md5),
            64 => Some(HashAlgorithm::Sha256),
            128 => Some(HashAlgorithm::Sha512),
            _ => None,
        };

        match (prefixed, by_length) {
            (Some(a), Some(b)) if a == b => {}
            (None, Some(_)) => {}
            _ => return Err(IntegrityError::UnrecognizedHash(raw.to_string())),
        }

        Ok(Self {
            algorithm: prefixed.or(by_length).unwrap_or(HashAlgorithm::Sha256),
            hex: digest.to_ascii_lowercase(),
        })
    }
}

/// Proof that an artifact passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Size on disk.
    pub size_bytes: u64,
    /// Digest that was matched, if the manifest published one.
    pub digest: Option<String>,
}

/// Size-floor and digest checks for downloaded artifacts.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityVerifier {
    min_size_bytes: u64,
}

impl IntegrityVerifier {
    /// Create a verifier with the configured size floor.
    #[must_use]
    pub fn new(min_size_bytes: u64) -> Self {
        Self { min_size_bytes }
    }

    /// Effective size floor for a manifest.
    #[must_use]
    pub fn size_floor(&self, manifest: &ReleaseManifest) -> u64 {
        self.min_size_bytes.max(manifest.min_size_bytes.unwrap_or(0))
    }

    /// Verify the artifact at `path` against `manifest`.
    ///
    /// Reads the whole file when a hash is published; call from a blocking
    /// context.
    ///
    /// # Errors
    ///
    /// Returns the first check that failed: [`IntegrityError::Missing`],
    /// [`IntegrityError::TooSmall`], [`IntegrityError::UnrecognizedHash`] or
    /// [`IntegrityError::HashMismatch`].
    pub fn verify(
        &self,
        path: &Path,
        manifest: &ReleaseManifest,
    ) -> Result<Verified, IntegrityError> {
        debug!("Verifying artifact {}", path.display());

        let metadata = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            _ => return Err(IntegrityError::Missing(path.to_path_buf())),
        };

        let size = metadata.len();
        let minimum = self.size_floor(manifest);
        if size <= minimum {
            return Err(IntegrityError::TooSmall {
                actual: size,
                minimum,
            });
        }

        let Some(raw) = manifest.expected_hash.as_deref() else {
            debug!("No hash published; accepting {} on size alone", path.display());
            return Ok(Verified {
                size_bytes: size,
                digest: None,
            });
        };

        let expected = ExpectedHash::parse(raw)?;
        let actual = digest_path(path, expected.algorithm)
            .map_err(|e| IntegrityError::Unreadable(e.to_string()))?;

        if actual != expected.hex {
            return Err(IntegrityError::HashMismatch {
                expected: expected.hex,
                actual,
            });
        }

        debug!("Artifact {} verified ({size} bytes)", path.display());
        Ok(Verified {
            size_bytes: size,
            digest: Some(actual),
        })
    }
}

/// Compute the digest of a file as lowercase hex, reading in chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn digest_path(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    match algorithm {
        HashAlgorithm::Md5 => hash_file::<Md5>(path),
        HashAlgorithm::Sha256 => hash_file::<Sha256>(path),
        HashAlgorithm::Sha512 => hash_file::<Sha512>(path),
    }
}

fn hash_file<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

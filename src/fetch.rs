//! Artifact fetcher abstraction
//!
//! The resolver only ever talks to an [`ArtifactFetcher`]. Network clients
//! live outside this crate; the bundled [`FileRepositoryFetcher`] serves a
//! Maven-layout directory such as `~/.m2/repository`.

use crate::checksum::{ChecksumAlgorithm, Digest};
use crate::coordinate::CoordinateKey;
use crate::error::{GrabError, GrabResult};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Bytes retrieved for a coordinate, plus the checksum the source published for them
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    pub bytes: Vec<u8>,
    pub expected_digest: Option<Digest>,
}

impl FetchedArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            expected_digest: None,
        }
    }

    pub fn with_digest(mut self, digest: Digest) -> Self {
        self.expected_digest = Some(digest);
        self
    }
}

/// Source of artifact bytes, consulted only on a cache miss
///
/// Implementations report a missing artifact as [`GrabError::NotFound`] and
/// transport failures as [`GrabError::Network`].
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Retrieve the artifact for a coordinate
    async fn fetch(&self, key: &CoordinateKey) -> GrabResult<FetchedArtifact>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// Reads artifacts from a local Maven-layout repository
#[derive(Debug, Clone)]
pub struct FileRepositoryFetcher {
    root: PathBuf,
}

impl FileRepositoryFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Published checksum next to the artifact, strongest algorithm first
    async fn published_digest(&self, artifact: &Path) -> GrabResult<Option<Digest>> {
        for algorithm in [ChecksumAlgorithm::Sha512, ChecksumAlgorithm::Sha256] {
            let mut name = artifact.as_os_str().to_owned();
            name.push(".");
            name.push(algorithm.file_extension());
            let path = PathBuf::from(name);

            match fs::read_to_string(&path).await {
                Ok(content) => {
                    let token = content.split_whitespace().next().unwrap_or_default();
                    let digest = Digest::parse(&format!("{}:{}", algorithm, token))?;
                    return Ok(Some(digest));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(GrabError::io(format!("reading checksum {}", path.display()), e))
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ArtifactFetcher for FileRepositoryFetcher {
    async fn fetch(&self, key: &CoordinateKey) -> GrabResult<FetchedArtifact> {
        let path = self.root.join(key.repository_path());
        debug!("Fetching {} from {}", key, path.display());

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(GrabError::not_found(
                    key,
                    format!("not in repository {}", self.root.display()),
                ))
            }
            // Repositories on network mounts surface transport trouble this way
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {
                return Err(GrabError::network(key, format!("reading {}: {}", path.display(), e)))
            }
            Err(e) => return Err(GrabError::io(format!("reading {}", path.display()), e)),
        };

        let expected_digest = self.published_digest(&path).await?;
        Ok(FetchedArtifact {
            bytes,
            expected_digest,
        })
    }

    fn name(&self) -> &str {
        "file-repository"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> CoordinateKey {
        CoordinateKey::parse("com.example:widget:1.0").unwrap()
    }

    fn install(repo: &Path, key: &CoordinateKey, bytes: &[u8]) -> PathBuf {
        let path = repo.join(key.repository_path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let repo = TempDir::new().unwrap();
        let fetcher = FileRepositoryFetcher::new(repo.path());
        let err = fetcher.fetch(&key()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn fetch_without_checksum() {
        let repo = TempDir::new().unwrap();
        install(repo.path(), &key(), b"jar");

        let fetched = FileRepositoryFetcher::new(repo.path())
            .fetch(&key())
            .await
            .unwrap();
        assert_eq!(fetched.bytes, b"jar");
        assert!(fetched.expected_digest.is_none());
    }

    #[tokio::test]
    async fn fetch_reads_published_checksum() {
        let repo = TempDir::new().unwrap();
        let path = install(repo.path(), &key(), b"jar");
        let digest = Digest::sha256(b"jar");
        std::fs::write(
            format!("{}.sha256", path.display()),
            format!("{}  widget-1.0.jar\n", digest.hex),
        )
        .unwrap();

        let fetched = FileRepositoryFetcher::new(repo.path())
            .fetch(&key())
            .await
            .unwrap();
        assert_eq!(fetched.expected_digest, Some(digest));
    }

    #[tokio::test]
    async fn fetch_prefers_sha512() {
        let repo = TempDir::new().unwrap();
        let path = install(repo.path(), &key(), b"jar");
        let sha512 = ChecksumAlgorithm::Sha512.digest(b"jar");
        std::fs::write(format!("{}.sha256", path.display()), Digest::sha256(b"jar").hex).unwrap();
        std::fs::write(format!("{}.sha512", path.display()), &sha512.hex).unwrap();

        let fetched = FileRepositoryFetcher::new(repo.path())
            .fetch(&key())
            .await
            .unwrap();
        assert_eq!(fetched.expected_digest, Some(sha512));
    }

    #[tokio::test]
    async fn malformed_checksum_is_an_error() {
        let repo = TempDir::new().unwrap();
        let path = install(repo.path(), &key(), b"jar");
        std::fs::write(format!("{}.sha256", path.display()), "not-a-digest").unwrap();

        let err = FileRepositoryFetcher::new(repo.path())
            .fetch(&key())
            .await
            .unwrap_err();
        assert!(matches!(err, GrabError::InvalidDigest { .. }));
    }
}

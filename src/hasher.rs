//! Content digests for catalog files
//!
//! Files are hashed with BLAKE3 and identified by the lowercase hex digest.
//! [`BoundedHasher`] caps how many files are read at once so that a burst of
//! filesystem events does not saturate disk I/O.

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;

use crate::logging::*;

/// Default number of files hashed in parallel
pub const DEFAULT_HASH_CONCURRENCY: usize = 5;

const READ_BUFFER_SIZE: usize = 65536;

#[async_trait]
pub trait Hasher: Send + Sync {
	/// Digest of the file's full content
	async fn hash_file(&self, path: &Path) -> io::Result<String>;

	/// True when the file at `path` hashes to `expected`. Read errors count as a mismatch.
	async fn is_hashed(&self, expected: &str, path: &Path) -> bool {
		match self.hash_file(path).await {
			Ok(actual) => actual == expected,
			Err(e) => {
				warn!("Cannot verify integrity of {}: {}", path.display(), e);
				false
			}
		}
	}
}

/// Streaming BLAKE3 file hasher
#[derive(Debug, Default, Clone)]
pub struct Blake3Hasher;

#[async_trait]
impl Hasher for Blake3Hasher {
	async fn hash_file(&self, path: &Path) -> io::Result<String> {
		let mut file = tokio::fs::File::open(path).await?;
		let mut hasher = blake3::Hasher::new();
		let mut buf = vec![0u8; READ_BUFFER_SIZE];

		loop {
			let n = file.read(&mut buf).await?;
			if n == 0 {
				break;
			}
			hasher.update(&buf[..n]);
		}

		Ok(hasher.finalize().to_hex().to_string())
	}
}

/// Wraps a hasher and admits at most `limit` concurrent hash jobs
pub struct BoundedHasher<H> {
	inner: H,
	limit: Semaphore,
}

impl<H: Hasher> BoundedHasher<H> {
	pub fn new(inner: H, limit: usize) -> Self {
		BoundedHasher { inner, limit: Semaphore::new(limit.max(1)) }
	}

	/// Permits not currently held by a hash job
	pub fn available(&self) -> usize {
		self.limit.available_permits()
	}
}

#[async_trait]
impl<H: Hasher> Hasher for BoundedHasher<H> {
	async fn hash_file(&self, path: &Path) -> io::Result<String> {
		let _permit = self
			.limit
			.acquire()
			.await
			.map_err(|_| io::Error::new(io::ErrorKind::Other, "hash limiter closed"))?;
		self.inner.hash_file(path).await
	}
}

/// Digest of an in-memory buffer, same encoding as [`Blake3Hasher`]
pub fn hash_bytes(buf: &[u8]) -> String {
	blake3::hash(buf).to_hex().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;
	use std::time::Duration;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_file_hash_matches_buffer_hash() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("data.bin");
		let content = vec![0x5Au8; 200_000];
		std::fs::write(&path, &content).unwrap();

		let digest = Blake3Hasher.hash_file(&path).await.unwrap();
		assert_eq!(digest, hash_bytes(&content));
		assert!(Blake3Hasher.is_hashed(&digest, &path).await);
		assert!(!Blake3Hasher.is_hashed("deadbeef", &path).await);
	}

	#[tokio::test]
	async fn test_missing_file_is_not_hashed() {
		let dir = TempDir::new().unwrap();
		assert!(!Blake3Hasher.is_hashed(&hash_bytes(b""), &dir.path().join("nope")).await);
	}

	struct SlowHasher {
		active: AtomicUsize,
		peak: AtomicUsize,
	}

	#[async_trait]
	impl Hasher for SlowHasher {
		async fn hash_file(&self, _path: &Path) -> io::Result<String> {
			let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
			self.peak.fetch_max(now, Ordering::SeqCst);
			tokio::time::sleep(Duration::from_millis(20)).await;
			self.active.fetch_sub(1, Ordering::SeqCst);
			Ok(String::new())
		}
	}

	#[tokio::test]
	async fn test_bounded_hasher_caps_parallelism() {
		let hasher = Arc::new(BoundedHasher::new(
			SlowHasher { active: AtomicUsize::new(0), peak: AtomicUsize::new(0) },
			DEFAULT_HASH_CONCURRENCY,
		));

		let jobs: Vec<_> = (0..20)
			.map(|_| {
				let h = hasher.clone();
				tokio::spawn(async move { h.hash_file(Path::new("x")).await })
			})
			.collect();
		for job in jobs {
			job.await.unwrap().unwrap();
		}

		assert!(hasher.inner.peak.load(Ordering::SeqCst) <= DEFAULT_HASH_CONCURRENCY);
		assert_eq!(hasher.available(), DEFAULT_HASH_CONCURRENCY);
	}
}

// vim: ts=4

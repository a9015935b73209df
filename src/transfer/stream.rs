//! Staging and object-store I/O for streamed file bodies

use futures::{Stream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::logging::*;
use crate::util;

/// Incoming bytes are written under `staging_dir` and only moved into
/// `store_dir` once accepted
#[derive(Debug, Clone)]
pub struct StreamStore {
	staging_dir: PathBuf,
	store_dir: PathBuf,
}

impl StreamStore {
	pub fn new(staging_dir: PathBuf, store_dir: PathBuf) -> Self {
		StreamStore { staging_dir, store_dir }
	}

	pub fn staging_dir(&self) -> &Path {
		&self.staging_dir
	}

	/// Object location for `id`; ids that are not a single path segment are refused
	pub fn object_path(&self, id: &str) -> io::Result<PathBuf> {
		if !util::is_plain_segment(id) {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid object id {:?}", id)));
		}
		Ok(self.store_dir.join(id))
	}

	/// Write `stream` to a fresh staging file named after `name`
	pub async fn stage<S, B>(&self, mut stream: S, name: &str) -> io::Result<PathBuf>
	where
		S: Stream<Item = io::Result<B>> + Unpin,
		B: AsRef<[u8]>,
	{
		tokio::fs::create_dir_all(&self.staging_dir).await?;
		let staged = self.staging_dir.join(format!("{}.{}", sanitize(name), util::new_id()));

		let result = async {
			let mut file = File::create(&staged).await?;
			let mut written = 0u64;
			while let Some(chunk) = stream.next().await {
				let chunk = chunk?;
				file.write_all(chunk.as_ref()).await?;
				written += chunk.as_ref().len() as u64;
			}
			file.flush().await?;
			file.sync_all().await?;
			Ok::<u64, io::Error>(written)
		}
		.await;

		match result {
			Ok(written) => {
				debug!("Staged {} bytes at {}", written, staged.display());
				Ok(staged)
			}
			Err(e) => {
				self.discard(&staged).await;
				Err(e)
			}
		}
	}

	/// Move a staged file to its final object path
	pub async fn commit(&self, staged: &Path, id: &str) -> io::Result<PathBuf> {
		let target = self.object_path(id)?;
		tokio::fs::create_dir_all(&self.store_dir).await?;

		if tokio::fs::rename(staged, &target).await.is_err() {
			tokio::fs::copy(staged, &target).await?;
			tokio::fs::remove_file(staged).await?;
		}
		Ok(target)
	}

	/// Remove a staged file; a file already gone is not an error
	pub async fn discard(&self, staged: &Path) {
		match tokio::fs::remove_file(staged).await {
			Ok(()) => debug!("Discarded {}", staged.display()),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => warn!("Cannot remove staged file {}: {}", staged.display(), e),
		}
	}

	/// Stage and commit in one step, storing under `id`
	pub async fn save_stream<S, B>(&self, stream: S, id: &str) -> io::Result<PathBuf>
	where
		S: Stream<Item = io::Result<B>> + Unpin,
		B: AsRef<[u8]>,
	{
		let staged = self.stage(stream, id).await?;
		self.commit(&staged, id).await
	}

	/// Byte stream over a stored file
	pub async fn read_stream(&self, path: &Path) -> io::Result<ReaderStream<File>> {
		let file = File::open(path).await?;
		Ok(ReaderStream::new(file))
	}
}

/// Keep staging names to a single path segment
fn sanitize(name: &str) -> String {
	let cleaned: String = name
		.chars()
		.map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
		.collect();
	if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
		"item".to_string()
	} else {
		cleaned
	}
}


// vim: ts=4

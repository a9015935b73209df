//! Content-addressed catalog of files and directories
//!
//! The catalog is the single source of truth for what this node knows about.
//! Entries are keyed by id, by reconstructed absolute path, and (for files)
//! by content hash. Every mutation runs under one FIFO async mutex, is
//! persisted as a full snapshot through a [`CatalogStore`], and announces
//! new entries on the catalog's event channel.
//!
//! Locally registered files are moved out of the watched directory into the
//! object store as `<store_dir>/<id>`; the watched directory acts as an inbox
//! whose directory structure is kept.

pub mod index;
pub mod watcher;

pub use self::index::CatalogIndex;
pub use self::watcher::{CatalogWatcher, FsEvent};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::error::CatalogError;
use crate::hasher::Hasher;
use crate::logging::*;
use crate::store::CatalogStore;
use crate::types::{DataPackage, DirEntry, FileEntry, Origin};
use crate::util;

/// Events published by the catalog
#[derive(Debug, Clone)]
pub enum CatalogEvent {
	/// A new entry entered the index
	Added { package: DataPackage, origin: Origin },
}

/// Outcome of a register call
#[derive(Debug, Clone)]
pub struct Registered {
	pub package: DataPackage,
	/// False when the path or content was already known
	pub is_new: bool,
}

impl Registered {
	fn existing(package: DataPackage) -> Self {
		Registered { package, is_new: false }
	}

	fn created(package: DataPackage) -> Self {
		Registered { package, is_new: true }
	}
}

struct Inner {
	root: PathBuf,
	store_dir: PathBuf,
	hasher: Arc<dyn Hasher>,
	store: Arc<dyn CatalogStore>,
	index: Mutex<CatalogIndex>,
	events: mpsc::UnboundedSender<CatalogEvent>,
}

/// Cloneable handle to the catalog
#[derive(Clone)]
pub struct Catalog {
	inner: Arc<Inner>,
}

impl Catalog {
	/// Load the persisted catalog and rebuild the index.
	///
	/// `root` is the watched directory, `store_dir` the object store. Both are
	/// created if missing. Fails when the store and its backup are unreadable.
	pub async fn open(
		root: &Path,
		store_dir: &Path,
		hasher: Arc<dyn Hasher>,
		store: Arc<dyn CatalogStore>,
	) -> Result<(Catalog, mpsc::UnboundedReceiver<CatalogEvent>), CatalogError> {
		for dir in [root, store_dir] {
			tokio::fs::create_dir_all(dir)
				.await
				.map_err(|e| CatalogError::Io { path: dir.to_path_buf(), source: e })?;
		}
		let root = tokio::fs::canonicalize(root)
			.await
			.map_err(|e| CatalogError::Io { path: root.to_path_buf(), source: e })?;

		let entries = store.load().await.map_err(CatalogError::Load)?;
		let index = CatalogIndex::rebuild(root.clone(), entries);
		for problem in index.link_violations() {
			warn!("Catalog link inconsistency: {}", problem);
		}
		info!("Catalog loaded: {} entries under {}", index.len(), root.display());

		let (events, rx) = mpsc::unbounded_channel();
		let catalog = Catalog {
			inner: Arc::new(Inner {
				root,
				store_dir: store_dir.to_path_buf(),
				hasher,
				store,
				index: Mutex::new(index),
				events,
			}),
		};
		Ok((catalog, rx))
	}

	/// Start watching the root directory for new files and directories.
	/// Files are indexed once unchanged for `stability`.
	pub fn watch(
		&self,
		debounce: Duration,
		stability: Duration,
		ignore_patterns: &[String],
	) -> Result<CatalogWatcher, CatalogError> {
		CatalogWatcher::start(self.clone(), debounce, stability, ignore_patterns)
	}

	/// Watched directory (canonical form)
	pub fn root(&self) -> &Path {
		&self.inner.root
	}

	/// Where the bytes of file `id` live
	pub fn object_path(&self, id: &str) -> PathBuf {
		self.inner.store_dir.join(id)
	}

	pub async fn fetch_all(&self) -> Vec<DataPackage> {
		self.inner.index.lock().await.snapshot()
	}

	pub async fn fetch_one(&self, id: &str) -> Option<DataPackage> {
		self.inner.index.lock().await.get(id).cloned()
	}

	/// Reconstructed absolute path of an entry
	pub async fn path_of(&self, id: &str) -> Option<PathBuf> {
		let index = self.inner.index.lock().await;
		index.get(id).map(|_| index.build_path(id))
	}

	/// Broken parent/child links, empty when the index is consistent
	pub async fn verify_links(&self) -> Vec<String> {
		self.inner.index.lock().await.link_violations()
	}

	/// Register a file by path. Idempotent per path; deduplicated by content.
	pub async fn register_file(&self, path: &Path, origin: Origin) -> Result<Registered, CatalogError> {
		let path = self.absolute(path);
		let mut index = self.inner.index.lock().await;
		self.register_file_locked(&mut index, path, origin).await
	}

	/// Register a directory by path. Idempotent per path.
	pub async fn register_dir(&self, path: &Path, origin: Origin) -> Result<Registered, CatalogError> {
		let path = self.absolute(path);
		let mut index = self.inner.index.lock().await;
		self.register_dir_locked(&mut index, path, origin).await
	}

	/// Accept an entry delivered by a peer (or confirm one we delivered).
	///
	/// Skips hashing and stat; the sender's metadata is trusted. Returns the
	/// stored entry, marked downloaded and synchronized.
	pub async fn sync_register(&self, package: DataPackage) -> Result<DataPackage, CatalogError> {
		check_package(&package)?;

		let mut index = self.inner.index.lock().await;
		let (stored, is_new, path) = index.upsert_synced(package);
		// Only directories are materialized inside the watched tree; file bytes
		// go to the object store
		if is_new && stored.is_dir() {
			index.mark_pending(path);
		}
		self.persist(&index).await?;

		debug!("Sync-registered {} ({})", stored.id(), if is_new { "new" } else { "known" });
		if is_new {
			self.emit(&stored, Origin::Network);
		}
		Ok(stored)
	}

	/// Apply one debounced batch of filesystem events.
	///
	/// Directories are handled before files so that files can resolve their
	/// parent. A path recently written by a network import is skipped once.
	pub async fn apply_fs_batch(&self, mut batch: Vec<FsEvent>) {
		watcher::order_batch(&mut batch);

		for event in batch {
			let mut index = self.inner.index.lock().await;
			let path = event.path().to_path_buf();

			if index.take_pending(&path) {
				debug!("Ignoring watcher event for network import {}", path.display());
				continue;
			}

			let result = match event {
				FsEvent::Dir(_) => self.register_dir_locked(&mut index, path.clone(), Origin::Local).await,
				FsEvent::File(_) => self.register_file_locked(&mut index, path.clone(), Origin::Local).await,
			};

			match result {
				Ok(reg) if reg.is_new => info!("Indexed {} as {}", path.display(), reg.package.id()),
				Ok(_) => debug!("Already indexed: {}", path.display()),
				Err(e @ CatalogError::Persist(_)) => {
					error!("{}; catalog should be reloaded", e)
				}
				Err(e) => warn!("Cannot index {}: {}", path.display(), e),
			}
		}
	}

	async fn register_file_locked(
		&self,
		index: &mut CatalogIndex,
		path: PathBuf,
		origin: Origin,
	) -> Result<Registered, CatalogError> {
		if origin == Origin::Network {
			index.mark_pending(path.clone());
		}
		if let Some(existing) = index.lookup_path(&path).cloned() {
			// Indexed local bytes leave the inbox, so a file at the same path
			// again is a new drop; content dedup below decides what it is
			let dropped_again = existing.as_file().is_some() && tokio::fs::try_exists(&path).await.unwrap_or(false);
			if !dropped_again {
				return Ok(Registered::existing(existing));
			}
		}
		if path.file_name().is_none() {
			return Err(CatalogError::InvalidPath { path });
		}

		let (hash, meta) = tokio::try_join!(
			async {
				self.inner
					.hasher
					.hash_file(&path)
					.await
					.map_err(|e| CatalogError::Io { path: path.clone(), source: e })
			},
			async {
				tokio::fs::metadata(&path).await.map_err(|e| CatalogError::Io { path: path.clone(), source: e })
			},
		)?;
		if !meta.is_file() {
			return Err(CatalogError::InvalidPath { path });
		}

		let parent_id = index.resolve_parent(&path);

		if let Some(existing) = index.lookup_hash(&hash) {
			if index.build_path(existing.id()) != path {
				debug!("{} has the content of {}, recording alias", path.display(), existing.id());
				index.add_alias(path, existing.id());
			}
			return Ok(Registered::existing(existing));
		}

		let (name, ext) = util::split_name(&path);
		let package = DataPackage::File(FileEntry::new(util::new_id(), parent_id, name, ext, hash, meta.len(), origin));
		index.insert_new(package.clone(), path.clone());
		self.persist(index).await?;

		if origin == Origin::Local {
			let target = self.object_path(package.id());
			move_file(&path, &target).await.map_err(|e| CatalogError::Io { path: path.clone(), source: e })?;
			debug!("Moved {} into object store as {}", path.display(), package.id());
		}

		self.emit(&package, origin);
		Ok(Registered::created(package))
	}

	async fn register_dir_locked(
		&self,
		index: &mut CatalogIndex,
		path: PathBuf,
		origin: Origin,
	) -> Result<Registered, CatalogError> {
		if origin == Origin::Network {
			index.mark_pending(path.clone());
		}
		if let Some(existing) = index.lookup_path(&path) {
			return Ok(Registered::existing(existing.clone()));
		}
		let name = match path.file_name() {
			Some(n) => n.to_string_lossy().into_owned(),
			None => return Err(CatalogError::InvalidPath { path }),
		};

		let parent_id = index.resolve_parent(&path);
		let package = DataPackage::Dir(DirEntry::new(util::new_id(), parent_id, name, origin));
		index.insert_new(package.clone(), path);
		self.persist(index).await?;

		self.emit(&package, origin);
		Ok(Registered::created(package))
	}

	async fn persist(&self, index: &CatalogIndex) -> Result<(), CatalogError> {
		self.inner.store.save(&index.snapshot()).await.map_err(|e| {
			error!("Catalog persistence failed: {}", e);
			CatalogError::Persist(e)
		})
	}

	fn emit(&self, package: &DataPackage, origin: Origin) {
		let event = CatalogEvent::Added { package: package.clone(), origin };
		if self.inner.events.send(event).is_err() {
			debug!("No subscriber for catalog events");
		}
	}

	fn absolute(&self, path: &Path) -> PathBuf {
		if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.inner.root.join(path)
		}
	}
}

/// Refuse entries a peer could use to address paths outside the watched
/// directory or the object store
pub fn check_package(package: &DataPackage) -> Result<(), CatalogError> {
	let invalid = |message: &str| CatalogError::InvalidPackage { id: package.id().to_string(), message: message.to_string() };

	if !util::is_plain_segment(package.id()) {
		return Err(invalid("id must be a single path segment"));
	}
	if !package.parent_id().is_empty() && !util::is_plain_segment(package.parent_id()) {
		return Err(invalid("parent id must be a single path segment"));
	}
	if !util::is_plain_segment(&package.segment()) {
		return Err(invalid("name must be a single path segment"));
	}
	if let DataPackage::File(f) = package {
		if f.name == "." || f.name == ".." {
			return Err(invalid("name must be a single path segment"));
		}
		if f.hash.is_empty() {
			return Err(invalid("file without hash"));
		}
	}
	Ok(())
}

/// Rename, falling back to copy + remove across filesystems
async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
	match tokio::fs::rename(from, to).await {
		Ok(()) => Ok(()),
		Err(rename_err) => {
			if tokio::fs::copy(from, to).await.is_err() {
				return Err(rename_err);
			}
			tokio::fs::remove_file(from).await
		}
	}
}

// vim: ts=4

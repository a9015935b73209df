//! Debounced filesystem watcher feeding the catalog
//!
//! Raw notify events are reduced to the paths that appeared or changed,
//! collected until the directory has been quiet for the debounce window, then
//! classified as directories or files and handed to
//! [`Catalog::apply_fs_batch`](super::Catalog::apply_fs_batch).
//!
//! A file is only handed over once its size and mtime held still for the
//! write stability window; files still being written are carried into the
//! next batch.

use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Catalog;
use crate::error::CatalogError;
use crate::logging::*;

/// A path observed by the watcher, classified by what is on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
	Dir(PathBuf),
	File(PathBuf),
}

impl FsEvent {
	pub fn path(&self) -> &Path {
		match self {
			FsEvent::Dir(p) | FsEvent::File(p) => p,
		}
	}

	pub fn is_dir(&self) -> bool {
		matches!(self, FsEvent::Dir(_))
	}
}

/// Directories first, shallowest first; files keep their arrival order
pub fn order_batch(batch: &mut [FsEvent]) {
	batch.sort_by_key(|event| match event {
		FsEvent::Dir(p) => (0u8, p.components().count()),
		FsEvent::File(_) => (1u8, 0),
	});
}

/// Running watcher; stops when dropped
pub struct CatalogWatcher {
	root: PathBuf,
	_watcher: RecommendedWatcher,
	task: JoinHandle<()>,
}

impl CatalogWatcher {
	/// Watch the catalog root recursively. Must be called inside a tokio runtime.
	pub fn start(
		catalog: Catalog,
		debounce: Duration,
		stability: Duration,
		ignore_patterns: &[String],
	) -> Result<Self, CatalogError> {
		let ignore = build_ignore_set(ignore_patterns)?;
		let root = catalog.root().to_path_buf();
		let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

		let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
			Ok(event) => {
				for path in changed_paths(event) {
					// Receiver gone means the watcher is shutting down
					let _ = tx.send(path);
				}
			}
			Err(e) => warn!("Filesystem watcher error: {}", e),
		})
		.map_err(|e| CatalogError::Watcher { message: e.to_string() })?;

		watcher
			.watch(&root, RecursiveMode::Recursive)
			.map_err(|e| CatalogError::Watcher { message: format!("{}: {}", root.display(), e) })?;

		info!("Watching {} (debounce {:?}, write stability {:?})", root.display(), debounce, stability);
		let task = tokio::spawn(debounce_loop(catalog, rx, debounce, stability, ignore));

		Ok(CatalogWatcher { root, _watcher: watcher, task })
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn stop(self) {
		info!("Stopped watching {}", self.root.display());
	}
}

impl Drop for CatalogWatcher {
	fn drop(&mut self) {
		self.task.abort();
	}
}

/// Paths worth looking at for an event: creations, content writes and rename targets
fn changed_paths(event: Event) -> Vec<PathBuf> {
	match event.kind {
		EventKind::Create(_)
		| EventKind::Modify(ModifyKind::Data(_))
		| EventKind::Modify(ModifyKind::Any)
		| EventKind::Modify(ModifyKind::Name(RenameMode::To))
		| EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths,
		EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.into_iter().skip(1).collect(),
		_ => vec![],
	}
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet, CatalogError> {
	let always = ["**/*.swp", "**/*~", "**/.DS_Store", "**/*.tmp"];

	let mut builder = GlobSetBuilder::new();
	for pattern in always.iter().copied().chain(patterns.iter().map(String::as_str)) {
		let glob = Glob::new(pattern)
			.map_err(|e| CatalogError::Watcher { message: format!("Invalid ignore pattern {}: {}", pattern, e) })?;
		builder.add(glob);
	}
	builder
		.build()
		.map_err(|e| CatalogError::Watcher { message: format!("Failed to build ignore set: {}", e) })
}

/// Collect paths until the channel stays quiet for `debounce`, then apply the
/// files that stopped changing
async fn debounce_loop(
	catalog: Catalog,
	mut rx: mpsc::UnboundedReceiver<PathBuf>,
	debounce: Duration,
	stability: Duration,
	ignore: GlobSet,
) {
	let mut carried: Vec<PathBuf> = Vec::new();
	let mut closed = false;

	while !closed {
		let mut paths = std::mem::take(&mut carried);
		if paths.is_empty() {
			match rx.recv().await {
				Some(first) => paths.push(first),
				None => break,
			}
		}

		loop {
			match tokio::time::timeout(debounce, rx.recv()).await {
				Ok(Some(path)) => paths.push(path),
				Ok(None) => {
					closed = true;
					break;
				}
				Err(_) => break,
			}
		}

		let batch = classify(catalog.root(), paths, &ignore).await;
		let (settled, unsettled) = settle(batch, stability).await;
		if !settled.is_empty() {
			debug!("Applying {} filesystem events", settled.len());
			catalog.apply_fs_batch(settled).await;
		}
		if !unsettled.is_empty() {
			debug!("{} file(s) still being written, retrying", unsettled.len());
			carried = unsettled;
		}
	}
	debug!("Watcher loop finished");
}

/// Split off files whose size or mtime changed during `window`.
/// Directories always pass; files that vanished are dropped.
async fn settle(batch: Vec<FsEvent>, window: Duration) -> (Vec<FsEvent>, Vec<PathBuf>) {
	if window.is_zero() || batch.iter().all(FsEvent::is_dir) {
		return (batch, Vec::new());
	}

	let mut before = HashMap::new();
	for event in &batch {
		if let FsEvent::File(path) = event {
			if let Some(stamp) = write_stamp(path).await {
				before.insert(path.clone(), stamp);
			}
		}
	}
	tokio::time::sleep(window).await;

	let mut settled = Vec::new();
	let mut unsettled = Vec::new();
	for event in batch {
		match event {
			FsEvent::File(path) => match write_stamp(&path).await {
				Some(stamp) if before.get(&path) == Some(&stamp) => settled.push(FsEvent::File(path)),
				Some(_) => unsettled.push(path),
				None => {}
			},
			dir => settled.push(dir),
		}
	}
	(settled, unsettled)
}

async fn write_stamp(path: &Path) -> Option<(u64, Option<SystemTime>)> {
	let meta = tokio::fs::metadata(path).await.ok()?;
	Some((meta.len(), meta.modified().ok()))
}

/// De-duplicate, drop ignored and vanished paths, and tag each as dir or file
async fn classify(root: &Path, paths: Vec<PathBuf>, ignore: &GlobSet) -> Vec<FsEvent> {
	let mut seen = HashSet::new();
	let mut events = Vec::new();

	for path in paths {
		if path == root || !seen.insert(path.clone()) {
			continue;
		}
		let relative = match path.strip_prefix(root) {
			Ok(r) => r,
			Err(_) => continue,
		};
		if ignore.is_match(relative) {
			debug!("Ignored {}", relative.display());
			continue;
		}

		match tokio::fs::symlink_metadata(&path).await {
			Ok(meta) if meta.is_dir() => events.push(FsEvent::Dir(path)),
			Ok(meta) if meta.is_file() => events.push(FsEvent::File(path)),
			Ok(_) => debug!("Skipping special file {}", path.display()),
			// Already gone (moved into the store, or a short-lived temp file)
			Err(_) => {}
		}
	}

	events
}


// vim: ts=4

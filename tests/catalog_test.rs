//! Catalog behavior against a real filesystem: deduplication, idempotency,
//! parent/child links, persistence and watcher interplay

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use peersync::catalog::{Catalog, CatalogEvent, FsEvent};
use peersync::error::{CatalogError, StoreError};
use peersync::hasher::{hash_bytes, Blake3Hasher};
use peersync::store::{CatalogStore, JsonCatalogStore};
use peersync::types::{DataPackage, DirEntry, DownloadState, FileEntry, Origin, SyncState};

struct Fixture {
	_dir: TempDir,
	json_dir: PathBuf,
	files_dir: PathBuf,
	store_dir: PathBuf,
}

impl Fixture {
	fn new() -> Self {
		let dir = TempDir::new().unwrap();
		Fixture {
			json_dir: dir.path().join("json"),
			files_dir: dir.path().join("files"),
			store_dir: dir.path().join("store"),
			_dir: dir,
		}
	}

	async fn open(&self) -> (Catalog, UnboundedReceiver<CatalogEvent>) {
		Catalog::open(
			&self.files_dir,
			&self.store_dir,
			Arc::new(Blake3Hasher),
			Arc::new(JsonCatalogStore::in_dir(&self.json_dir)),
		)
		.await
		.unwrap()
	}
}

fn network_dir(id: &str, parent: &str, name: &str) -> DataPackage {
	DataPackage::Dir(DirEntry::new(id.into(), parent.into(), name.into(), Origin::Local))
}

fn network_file(id: &str, parent: &str, name: &str, ext: &str, content: &[u8]) -> DataPackage {
	DataPackage::File(FileEntry::new(
		id.into(),
		parent.into(),
		name.into(),
		ext.into(),
		hash_bytes(content),
		content.len() as u64,
		Origin::Local,
	))
}

// ============================================================================
// Part 1: Registration
// ============================================================================

#[tokio::test]
async fn test_identical_content_shares_one_id() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	let a = catalog.root().join("a.txt");
	let b = catalog.root().join("b.txt");
	std::fs::write(&a, b"same bytes").unwrap();
	std::fs::write(&b, b"same bytes").unwrap();

	let first = catalog.register_file(&a, Origin::Local).await.unwrap();
	let second = catalog.register_file(&b, Origin::Local).await.unwrap();

	assert!(first.is_new);
	assert!(!second.is_new);
	assert_eq!(first.package.id(), second.package.id());
	assert_eq!(first.package.hash(), Some(hash_bytes(b"same bytes").as_str()));
	assert_eq!(catalog.fetch_all().await.len(), 1);

	// The registered file now lives in the object store
	let object = catalog.object_path(first.package.id());
	assert_eq!(std::fs::read(object).unwrap(), b"same bytes");
	assert!(!a.exists());
}

#[tokio::test]
async fn test_registering_a_path_twice_is_idempotent() {
	let fx = Fixture::new();
	let (catalog, mut events) = fx.open().await;
	let path = catalog.root().join("report.pdf");
	std::fs::write(&path, b"%PDF").unwrap();

	let first = catalog.register_file(&path, Origin::Local).await.unwrap();
	let again = catalog.register_file(&path, Origin::Local).await.unwrap();

	assert_eq!(first.package, again.package);
	assert!(!again.is_new);
	assert_eq!(catalog.fetch_all().await.len(), 1);

	match events.try_recv() {
		Ok(CatalogEvent::Added { package, origin }) => {
			assert_eq!(package.id(), first.package.id());
			assert_eq!(origin, Origin::Local);
		}
		other => panic!("expected one Added event, got {:?}", other),
	}
	assert!(events.try_recv().is_err());

	let file = first.package.as_file().unwrap();
	assert_eq!(file.name, "report");
	assert_eq!(file.ext, ".pdf");
	assert_eq!(file.size, 4);
	assert_eq!(file.download_state, DownloadState::NotDownloaded);
	assert_eq!(file.sync_state, SyncState::Unsynchronized);
}

#[tokio::test]
async fn test_new_content_at_a_reused_inbox_path_is_indexed() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	let path = catalog.root().join("report.txt");

	std::fs::write(&path, b"version one").unwrap();
	let first = catalog.register_file(&path, Origin::Local).await.unwrap();
	assert!(!path.exists());

	std::fs::write(&path, b"version two").unwrap();
	let second = catalog.register_file(&path, Origin::Local).await.unwrap();

	assert!(second.is_new);
	assert_ne!(first.package.id(), second.package.id());
	assert_eq!(second.package.hash(), Some(hash_bytes(b"version two").as_str()));
	assert!(!path.exists());
	assert_eq!(std::fs::read(catalog.object_path(second.package.id())).unwrap(), b"version two");
	assert_eq!(std::fs::read(catalog.object_path(first.package.id())).unwrap(), b"version one");
	assert_eq!(catalog.fetch_all().await.len(), 2);

	// Dropping the first version again is deduplicated, not re-added
	std::fs::write(&path, b"version one").unwrap();
	let third = catalog.register_file(&path, Origin::Local).await.unwrap();
	assert!(!third.is_new);
	assert_eq!(third.package.id(), first.package.id());
	assert_eq!(catalog.fetch_all().await.len(), 2);
}

#[tokio::test]
async fn test_relative_paths_resolve_against_root() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	std::fs::create_dir(catalog.root().join("music")).unwrap();

	let dir = catalog.register_dir(std::path::Path::new("music"), Origin::Local).await.unwrap();
	assert_eq!(catalog.path_of(dir.package.id()).await.unwrap(), catalog.root().join("music"));
}

// ============================================================================
// Part 2: Parent/child links
// ============================================================================

#[tokio::test]
async fn test_links_stay_bidirectional() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	let docs = catalog.root().join("docs");
	std::fs::create_dir(&docs).unwrap();
	std::fs::write(docs.join("x.txt"), b"x").unwrap();

	let dir = catalog.register_dir(&docs, Origin::Local).await.unwrap();
	let file = catalog.register_file(&docs.join("x.txt"), Origin::Local).await.unwrap();
	assert_eq!(file.package.parent_id(), dir.package.id());

	let stored_dir = catalog.fetch_one(dir.package.id()).await.unwrap();
	assert_eq!(stored_dir.as_dir().unwrap().child_id, vec![file.package.id().to_string()]);

	// A peer adds a subdirectory and a file under our directory
	let sub = network_dir("remote-sub", dir.package.id(), "inbox");
	catalog.sync_register(sub).await.unwrap();
	let remote_file = DataPackage::File(FileEntry::new(
		"remote-file".into(),
		"remote-sub".into(),
		"photo".into(),
		".jpg".into(),
		hash_bytes(b"jpeg"),
		4,
		Origin::Local,
	));
	catalog.sync_register(remote_file).await.unwrap();

	assert!(catalog.verify_links().await.is_empty());
	assert_eq!(catalog.path_of("remote-file").await.unwrap(), docs.join("inbox").join("photo.jpg"));
}

#[tokio::test]
async fn test_missing_parent_degrades_to_root_level() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	let nested = catalog.root().join("unindexed");
	std::fs::create_dir(&nested).unwrap();
	std::fs::write(nested.join("n.txt"), b"n").unwrap();

	let reg = catalog.register_file(&nested.join("n.txt"), Origin::Local).await.unwrap();
	assert_eq!(reg.package.parent_id(), "");
	assert!(catalog.verify_links().await.is_empty());
}

// ============================================================================
// Part 3: Network imports
// ============================================================================

#[tokio::test]
async fn test_sync_register_marks_network_and_synchronized() {
	let fx = Fixture::new();
	let (catalog, mut events) = fx.open().await;

	let stored = catalog.sync_register(network_dir("d1", "", "shared")).await.unwrap();
	assert_eq!(stored.origin(), Origin::Network);
	assert_eq!(stored.download_state(), DownloadState::Downloaded);
	assert_eq!(stored.sync_state(), SyncState::Synchronized);

	match events.try_recv() {
		Ok(CatalogEvent::Added { origin, .. }) => assert_eq!(origin, Origin::Network),
		other => panic!("expected network Added event, got {:?}", other),
	}

	// Confirming an existing entry is silent and keeps its origin
	catalog.sync_register(network_dir("d1", "", "shared")).await.unwrap();
	assert!(events.try_recv().is_err());
	assert_eq!(catalog.fetch_one("d1").await.unwrap().origin(), Origin::Network);
}

#[tokio::test]
async fn test_watcher_event_for_network_dir_is_ignored() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;

	catalog.sync_register(network_dir("d1", "", "shared")).await.unwrap();
	let path = catalog.path_of("d1").await.unwrap();
	std::fs::create_dir_all(&path).unwrap();

	catalog.apply_fs_batch(vec![FsEvent::Dir(path)]).await;

	let all = catalog.fetch_all().await;
	assert_eq!(all.len(), 1);
	assert_eq!(all[0].origin(), Origin::Network);
}

#[tokio::test]
async fn test_file_without_hash_is_rejected() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	let bad = DataPackage::File(FileEntry::new(
		"f".into(),
		"".into(),
		"x".into(),
		"".into(),
		String::new(),
		0,
		Origin::Network,
	));

	match catalog.sync_register(bad).await {
		Err(CatalogError::InvalidPackage { id, .. }) => assert_eq!(id, "f"),
		other => panic!("expected InvalidPackage, got {:?}", other),
	}
}

#[tokio::test]
async fn test_directory_arriving_after_its_file_is_linked() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;

	catalog.sync_register(network_file("f", "d", "notes", ".md", b"# notes")).await.unwrap();
	catalog.sync_register(network_dir("d", "", "docs")).await.unwrap();

	assert!(catalog.verify_links().await.is_empty());
	let dir = catalog.fetch_one("d").await.unwrap();
	assert_eq!(dir.as_dir().unwrap().child_id, vec!["f".to_string()]);
	assert_eq!(catalog.path_of("f").await.unwrap(), catalog.root().join("docs").join("notes.md"));
}

#[tokio::test]
async fn test_entries_escaping_the_tree_are_rejected() {
	let fx = Fixture::new();
	let (catalog, mut events) = fx.open().await;

	let hostile = vec![
		network_dir("../outside", "", "docs"),
		network_dir("d", "", "../../outside"),
		network_dir("d", "", ".."),
		network_dir("d", "../x", "docs"),
		network_file("../files/evil", "", "evil", "", b"evil"),
		network_file("f", "", "a/b", ".txt", b"evil"),
		network_file("f", "", "evil", "\\..", b"evil"),
		network_file("f", "", ".", "", b"evil"),
	];
	for package in hostile {
		let described = format!("{:?}", package);
		match catalog.sync_register(package).await {
			Err(CatalogError::InvalidPackage { .. }) => {}
			other => panic!("{} accepted: {:?}", described, other),
		}
	}

	assert!(catalog.fetch_all().await.is_empty());
	assert!(events.try_recv().is_err());
}

// ============================================================================
// Part 4: Batches and persistence
// ============================================================================

#[tokio::test]
async fn test_batch_indexes_directories_before_files() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;
	let dir = catalog.root().join("album");
	std::fs::create_dir(&dir).unwrap();
	std::fs::write(dir.join("track.flac"), b"flac").unwrap();

	catalog.apply_fs_batch(vec![FsEvent::File(dir.join("track.flac")), FsEvent::Dir(dir.clone())]).await;

	let all = catalog.fetch_all().await;
	assert_eq!(all.len(), 2);
	let album = all.iter().find(|p| p.is_dir()).unwrap();
	let track = all.iter().find(|p| !p.is_dir()).unwrap();
	assert_eq!(track.parent_id(), album.id());
	assert!(catalog.verify_links().await.is_empty());
}

#[tokio::test]
async fn test_catalog_survives_reopen() {
	let fx = Fixture::new();
	let id = {
		let (catalog, _events) = fx.open().await;
		let docs = catalog.root().join("docs");
		std::fs::create_dir(&docs).unwrap();
		std::fs::write(docs.join("a.md"), b"# a").unwrap();
		catalog.register_dir(&docs, Origin::Local).await.unwrap();
		catalog.register_file(&docs.join("a.md"), Origin::Local).await.unwrap().package.id().to_string()
	};

	let (catalog, _events) = fx.open().await;
	assert_eq!(catalog.fetch_all().await.len(), 2);
	assert_eq!(catalog.path_of(&id).await.unwrap(), catalog.root().join("docs").join("a.md"));
	assert!(catalog.verify_links().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_registrations_are_all_persisted() {
	let fx = Fixture::new();
	let (catalog, _events) = fx.open().await;

	let jobs: Vec<_> = (0..20)
		.map(|i| {
			let catalog = catalog.clone();
			let path = catalog.root().join(format!("file-{}.txt", i));
			std::fs::write(&path, format!("content {}", i)).unwrap();
			tokio::spawn(async move { catalog.register_file(&path, Origin::Local).await })
		})
		.collect();
	for job in jobs {
		assert!(job.await.unwrap().unwrap().is_new);
	}

	let persisted = JsonCatalogStore::in_dir(&fx.json_dir).load().await.unwrap();
	assert_eq!(persisted.len(), 20);
}

struct FailingStore;

#[async_trait]
impl CatalogStore for FailingStore {
	async fn load(&self) -> Result<Vec<DataPackage>, StoreError> {
		Ok(vec![])
	}

	async fn save(&self, _entries: &[DataPackage]) -> Result<(), StoreError> {
		Err(StoreError::SaveFailed {
			path: PathBuf::from("files-metadata.json"),
			source: Box::new(io::Error::new(io::ErrorKind::Other, "disk full")),
		})
	}
}

#[tokio::test]
async fn test_persistence_failure_is_reported() {
	let fx = Fixture::new();
	let (catalog, _events) =
		Catalog::open(&fx.files_dir, &fx.store_dir, Arc::new(Blake3Hasher), Arc::new(FailingStore)).await.unwrap();
	let path = catalog.root().join("a.txt");
	std::fs::write(&path, b"a").unwrap();

	match catalog.register_file(&path, Origin::Local).await {
		Err(CatalogError::Persist(_)) => {}
		other => panic!("expected persist failure, got {:?}", other),
	}
}

#[tokio::test]
async fn test_unreadable_store_aborts_open() {
	let fx = Fixture::new();
	std::fs::create_dir_all(&fx.json_dir).unwrap();
	std::fs::write(fx.json_dir.join("files-metadata.json"), b"garbage").unwrap();
	std::fs::write(fx.json_dir.join("files-metadata-backup.json"), b"garbage").unwrap();

	let result = Catalog::open(
		&fx.files_dir,
		&fx.store_dir,
		Arc::new(Blake3Hasher),
		Arc::new(JsonCatalogStore::in_dir(&fx.json_dir)),
	)
	.await;
	assert!(matches!(result, Err(CatalogError::Load(StoreError::Unrecoverable { .. }))));
}

// ============================================================================
// Part 5: Live watcher
// ============================================================================

#[tokio::test]
async fn test_watcher_indexes_new_files() {
	let fx = Fixture::new();
	let (catalog, mut events) = fx.open().await;
	let _watcher = catalog.watch(Duration::from_millis(50), Duration::from_millis(100), &[]).unwrap();

	tokio::time::sleep(Duration::from_millis(100)).await;
	std::fs::write(catalog.root().join("dropped.txt"), b"hello").unwrap();

	let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await.unwrap().unwrap();
	match event {
		CatalogEvent::Added { package, origin } => {
			assert_eq!(origin, Origin::Local);
			assert_eq!(package.as_file().unwrap().name, "dropped");
		}
	}
}

// vim: ts=4

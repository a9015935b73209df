//! Peer sync file (`sync-metadata.json`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::logging::*;
use crate::store::{read_json, write_json_atomic};
use crate::types::PeerSyncPersist;

/// On-disk shape: `{ "peers": { "<peerId>": PeerSyncPersist } }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncFile {
	pub peers: BTreeMap<String, PeerSyncPersist>,
}

/// Reads and writes the peer sync file. Callers serialize access.
#[derive(Debug, Clone)]
pub struct PeerSyncStore {
	path: PathBuf,
}

impl PeerSyncStore {
	pub fn new(path: PathBuf) -> Self {
		PeerSyncStore { path }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Current contents. A missing file is empty; an unreadable one is logged
	/// and treated as empty so that discovery keeps working.
	pub async fn load(&self) -> SyncFile {
		match read_json::<SyncFile>(&self.path).await {
			Ok(Some(file)) => file,
			Ok(None) => SyncFile::default(),
			Err(e) => {
				error!("Peer sync file unreadable, starting empty: {}", e);
				SyncFile::default()
			}
		}
	}

	pub async fn save(&self, file: &SyncFile) -> Result<(), StoreError> {
		write_json_atomic(&self.path, file).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::PeerInfo;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_round_trip_and_corrupt_file() {
		let dir = TempDir::new().unwrap();
		let store = PeerSyncStore::new(dir.path().join("json").join("sync-metadata.json"));
		assert!(store.load().await.peers.is_empty());

		let info = PeerInfo {
			id: "p2".into(),
			display_name: "nas".into(),
			address: "10.0.0.2".into(),
			port: 3000,
			last_seen: 1,
		};
		let mut file = SyncFile::default();
		file.peers.insert("p2".into(), PeerSyncPersist::from_info(&info));
		store.save(&file).await.unwrap();
		assert_eq!(store.load().await, file);

		let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
		assert_eq!(raw["peers"]["p2"]["lastAddress"], "10.0.0.2");
		assert!(raw["peers"]["p2"]["queue"]["toSend"].is_array());

		std::fs::write(store.path(), b"{{").unwrap();
		assert!(store.load().await.peers.is_empty());
	}
}

// vim: ts=4

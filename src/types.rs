//! Catalog and peer data model shared by every subsystem

use serde::{Deserialize, Serialize};

/// Visibility of a catalog entry to peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
	#[default]
	Public,
	Private,
}

impl Privacy {
	pub fn as_str(&self) -> &'static str {
		match self {
			Privacy::Public => "public",
			Privacy::Private => "private",
		}
	}

	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"public" => Some(Privacy::Public),
			"private" => Some(Privacy::Private),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
	#[default]
	NotDownloaded,
	Downloading,
	Downloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
	#[default]
	Unsynchronized,
	Synchronizing,
	Synchronized,
}

/// Where an entry came from: the local filesystem or a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
	#[default]
	Local,
	Network,
}

impl Origin {
	/// Initial transfer states for a freshly registered entry
	fn initial_states(self) -> (DownloadState, SyncState) {
		match self {
			Origin::Local => (DownloadState::NotDownloaded, SyncState::Unsynchronized),
			Origin::Network => (DownloadState::Downloaded, SyncState::Synchronized),
		}
	}
}

/// A content-addressed file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
	pub id: String,
	#[serde(default)]
	pub parent_id: String,
	pub name: String,
	#[serde(default)]
	pub ext: String,
	pub hash: String,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub privacy: Privacy,
	#[serde(default)]
	pub download_state: DownloadState,
	#[serde(default)]
	pub sync_state: SyncState,
	#[serde(default)]
	pub origin: Origin,
}

impl FileEntry {
	pub fn new(
		id: String,
		parent_id: String,
		name: String,
		ext: String,
		hash: String,
		size: u64,
		origin: Origin,
	) -> Self {
		let (download_state, sync_state) = origin.initial_states();
		FileEntry {
			id,
			parent_id,
			name,
			ext,
			hash,
			size,
			privacy: Privacy::Public,
			download_state,
			sync_state,
			origin,
		}
	}

	/// Name with extension, as it appears on disk
	pub fn file_name(&self) -> String {
		format!("{}{}", self.name, self.ext)
	}
}

/// A directory; not content-addressed, `hash` stays empty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
	pub id: String,
	#[serde(default)]
	pub parent_id: String,
	pub name: String,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub hash: String,
	#[serde(default)]
	pub child_id: Vec<String>,
	#[serde(default)]
	pub privacy: Privacy,
	#[serde(default)]
	pub download_state: DownloadState,
	#[serde(default)]
	pub sync_state: SyncState,
	#[serde(default)]
	pub origin: Origin,
}

impl DirEntry {
	pub fn new(id: String, parent_id: String, name: String, origin: Origin) -> Self {
		let (download_state, sync_state) = origin.initial_states();
		DirEntry {
			id,
			parent_id,
			name,
			size: 0,
			hash: String::new(),
			child_id: vec![],
			privacy: Privacy::Public,
			download_state,
			sync_state,
			origin,
		}
	}

	/// Append a child id unless already present
	pub fn link_child(&mut self, child_id: &str) -> bool {
		if self.child_id.iter().any(|c| c == child_id) {
			return false;
		}
		self.child_id.push(child_id.to_string());
		true
	}
}

/// The catalog's unit of storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataPackage {
	File(FileEntry),
	Dir(DirEntry),
}

impl DataPackage {
	pub fn id(&self) -> &str {
		match self {
			DataPackage::File(f) => &f.id,
			DataPackage::Dir(d) => &d.id,
		}
	}

	pub fn parent_id(&self) -> &str {
		match self {
			DataPackage::File(f) => &f.parent_id,
			DataPackage::Dir(d) => &d.parent_id,
		}
	}

	/// Path segment this entry contributes when rebuilding absolute paths
	pub fn segment(&self) -> String {
		match self {
			DataPackage::File(f) => f.file_name(),
			DataPackage::Dir(d) => d.name.clone(),
		}
	}

	pub fn size(&self) -> u64 {
		match self {
			DataPackage::File(f) => f.size,
			DataPackage::Dir(d) => d.size,
		}
	}

	/// Content hash; `None` for directories
	pub fn hash(&self) -> Option<&str> {
		match self {
			DataPackage::File(f) => Some(f.hash.as_str()),
			DataPackage::Dir(_) => None,
		}
	}

	pub fn origin(&self) -> Origin {
		match self {
			DataPackage::File(f) => f.origin,
			DataPackage::Dir(d) => d.origin,
		}
	}

	pub fn set_origin(&mut self, origin: Origin) {
		match self {
			DataPackage::File(f) => f.origin = origin,
			DataPackage::Dir(d) => d.origin = origin,
		}
	}

	pub fn download_state(&self) -> DownloadState {
		match self {
			DataPackage::File(f) => f.download_state,
			DataPackage::Dir(d) => d.download_state,
		}
	}

	pub fn sync_state(&self) -> SyncState {
		match self {
			DataPackage::File(f) => f.sync_state,
			DataPackage::Dir(d) => d.sync_state,
		}
	}

	pub fn mark_synchronized(&mut self) {
		match self {
			DataPackage::File(f) => {
				f.download_state = DownloadState::Downloaded;
				f.sync_state = SyncState::Synchronized;
			}
			DataPackage::Dir(d) => {
				d.download_state = DownloadState::Downloaded;
				d.sync_state = SyncState::Synchronized;
			}
		}
	}

	pub fn is_dir(&self) -> bool {
		matches!(self, DataPackage::Dir(_))
	}

	pub fn as_dir(&self) -> Option<&DirEntry> {
		match self {
			DataPackage::Dir(d) => Some(d),
			DataPackage::File(_) => None,
		}
	}

	pub fn as_dir_mut(&mut self) -> Option<&mut DirEntry> {
		match self {
			DataPackage::Dir(d) => Some(d),
			DataPackage::File(_) => None,
		}
	}

	pub fn as_file(&self) -> Option<&FileEntry> {
		match self {
			DataPackage::File(f) => Some(f),
			DataPackage::Dir(_) => None,
		}
	}
}

/// The local node's self-description, generated once at first run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
	pub peer_id: String,
	pub display_name: String,
	pub created_at: String,
}

/// A peer as currently observed on the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
	pub id: String,
	pub display_name: String,
	pub address: String,
	pub port: u16,
	/// Milliseconds since the Unix epoch
	pub last_seen: u64,
}

/// Outbound work persisted per peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct PeerQueues {
	pub to_send: Vec<DataPackage>,
	pub to_delete: Vec<DataPackage>,
	pub to_request: Vec<DataPackage>,
}

impl PeerQueues {
	/// Queue an item for sending unless its id is already queued
	pub fn push_send(&mut self, package: &DataPackage) -> bool {
		if self.to_send.iter().any(|p| p.id() == package.id()) {
			return false;
		}
		self.to_send.push(package.clone());
		true
	}

	pub fn remove_send(&mut self, id: &str) -> bool {
		let before = self.to_send.len();
		self.to_send.retain(|p| p.id() != id);
		before != self.to_send.len()
	}
}

/// Durable per-peer bookkeeping; survives the peer going offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSyncPersist {
	pub id: String,
	pub display_name: String,
	pub last_address: String,
	pub port: u16,
	pub last_seen: u64,
	#[serde(default)]
	pub queue: PeerQueues,
}

impl PeerSyncPersist {
	pub fn from_info(info: &PeerInfo) -> Self {
		PeerSyncPersist {
			id: info.id.clone(),
			display_name: info.display_name.clone(),
			last_address: info.address.clone(),
			port: info.port,
			last_seen: info.last_seen,
			queue: PeerQueues::default(),
		}
	}

	/// Apply a sighting; returns true when the reachable endpoint changed
	pub fn refresh(&mut self, info: &PeerInfo) -> bool {
		let moved = self.last_address != info.address || self.port != info.port;
		self.last_address = info.address.clone();
		self.port = info.port;
		self.last_seen = info.last_seen;
		if !info.display_name.is_empty() {
			self.display_name = info.display_name.clone();
		}
		moved
	}
}

/// Live pairing of what the network reports with what is persisted
#[derive(Debug, Clone)]
pub struct PeerState {
	pub info: PeerInfo,
	pub sync: PeerSyncPersist,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_file_package_wire_shape() {
		let pkg = DataPackage::File(FileEntry::new(
			"01".into(),
			"".into(),
			"photo".into(),
			".jpg".into(),
			"abc".into(),
			12,
			Origin::Local,
		));
		let json = serde_json::to_value(&pkg).unwrap();
		assert_eq!(json["type"], "file");
		assert_eq!(json["parentId"], "");
		assert_eq!(json["downloadState"], "not_downloaded");
		assert_eq!(json["syncState"], "unsynchronized");
		assert_eq!(json["origin"], "local");
	}

	#[test]
	fn test_dir_package_rejects_unknown_tag() {
		let raw = r#"{"type":"symlink","id":"x","name":"n"}"#;
		assert!(serde_json::from_str::<DataPackage>(raw).is_err());

		let raw = r#"{"type":"dir","id":"x","name":"n","childId":["a"]}"#;
		let pkg: DataPackage = serde_json::from_str(raw).unwrap();
		assert_eq!(pkg.as_dir().unwrap().child_id, vec!["a".to_string()]);
		assert_eq!(pkg.origin(), Origin::Local);
	}

	#[test]
	fn test_network_origin_starts_synchronized() {
		let dir = DirEntry::new("d".into(), "".into(), "docs".into(), Origin::Network);
		assert_eq!(dir.download_state, DownloadState::Downloaded);
		assert_eq!(dir.sync_state, SyncState::Synchronized);
	}

	#[test]
	fn test_queue_push_send_dedups_by_id() {
		let mut q = PeerQueues::default();
		let d = DataPackage::Dir(DirEntry::new("d".into(), "".into(), "docs".into(), Origin::Local));
		assert!(q.push_send(&d));
		assert!(!q.push_send(&d));
		assert!(q.remove_send("d"));
		assert!(q.to_send.is_empty());
	}
}

// vim: ts=4

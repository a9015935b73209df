//! Error types for peersync operations

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Main error type for node-level operations
#[derive(Debug)]
pub enum SyncError {
	/// I/O error
	Io(io::Error),

	/// Invalid configuration
	InvalidConfig { message: String },

	/// Peer is no longer in the live set
	PeerOffline { peer_id: String },

	/// Store error (nested)
	Store(StoreError),

	/// Catalog error (nested)
	Catalog(CatalogError),

	/// Discovery error (nested)
	Discovery(DiscoveryError),

	/// Transfer error (nested)
	Transfer(TransferError),

	/// Generic error message
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::InvalidConfig { message } => {
				write!(f, "Invalid configuration: {}", message)
			}
			SyncError::PeerOffline { peer_id } => write!(f, "Peer {} is offline", peer_id),
			SyncError::Store(e) => write!(f, "Store error: {}", e),
			SyncError::Catalog(e) => write!(f, "Catalog error: {}", e),
			SyncError::Discovery(e) => write!(f, "Discovery error: {}", e),
			SyncError::Transfer(e) => write!(f, "Transfer error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<CatalogError> for SyncError {
	fn from(e: CatalogError) -> Self {
		SyncError::Catalog(e)
	}
}

impl From<DiscoveryError> for SyncError {
	fn from(e: DiscoveryError) -> Self {
		SyncError::Discovery(e)
	}
}

impl From<TransferError> for SyncError {
	fn from(e: TransferError) -> Self {
		SyncError::Transfer(e)
	}
}

impl From<ConfigError> for SyncError {
	fn from(e: ConfigError) -> Self {
		SyncError::InvalidConfig { message: e.to_string() }
	}
}

/// Durable JSON store errors
#[derive(Debug)]
pub enum StoreError {
	/// Failed to read a store file
	LoadFailed { path: PathBuf, source: io::Error },

	/// Failed to write a store file
	SaveFailed { path: PathBuf, source: Box<dyn Error + Send + Sync> },

	/// Store file exists but does not parse
	Corrupted { path: PathBuf, message: String },

	/// Primary and backup copies are both unreadable
	Unrecoverable { primary: String, backup: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::LoadFailed { path, source } => {
				write!(f, "Failed to load {}: {}", path.display(), source)
			}
			StoreError::SaveFailed { path, source } => {
				write!(f, "Failed to save {}: {}", path.display(), source)
			}
			StoreError::Corrupted { path, message } => {
				write!(f, "{} is corrupted: {}", path.display(), message)
			}
			StoreError::Unrecoverable { primary, backup } => {
				write!(f, "Primary and backup are unreadable (primary: {}; backup: {})", primary, backup)
			}
		}
	}
}

impl Error for StoreError {}

/// Catalog errors
#[derive(Debug)]
pub enum CatalogError {
	/// Filesystem operation on an item failed
	Io { path: PathBuf, source: io::Error },

	/// Loading the persisted catalog failed
	Load(StoreError),

	/// Persisting the catalog failed after the index was mutated
	Persist(StoreError),

	/// Path cannot be registered (no file name, a directory given as file, ...)
	InvalidPath { path: PathBuf },

	/// Package received from a peer is not acceptable
	InvalidPackage { id: String, message: String },

	/// Filesystem watcher could not be started
	Watcher { message: String },
}

impl fmt::Display for CatalogError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CatalogError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
			CatalogError::Load(e) => write!(f, "Failed to load catalog: {}", e),
			CatalogError::Persist(e) => {
				write!(f, "Failed to persist catalog (memory and disk may diverge): {}", e)
			}
			CatalogError::InvalidPath { path } => write!(f, "Invalid path: {}", path.display()),
			CatalogError::InvalidPackage { id, message } => {
				write!(f, "Invalid package {}: {}", id, message)
			}
			CatalogError::Watcher { message } => write!(f, "Watcher error: {}", message),
		}
	}
}

impl Error for CatalogError {}

/// Discovery socket errors
#[derive(Debug)]
pub enum DiscoveryError {
	/// Socket could not be bound
	Bind { port: u16, source: io::Error },

	/// Joining the multicast group failed
	Multicast { group: String, source: io::Error },

	/// Sending an announce failed
	Send(io::Error),

	/// Receiving a datagram failed
	Receive(io::Error),
}

impl fmt::Display for DiscoveryError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DiscoveryError::Bind { port, source } => {
				write!(f, "Failed to bind discovery port {}: {}", port, source)
			}
			DiscoveryError::Multicast { group, source } => {
				write!(f, "Failed to join multicast group {}: {}", group, source)
			}
			DiscoveryError::Send(e) => write!(f, "Announce send failed: {}", e),
			DiscoveryError::Receive(e) => write!(f, "Datagram receive failed: {}", e),
		}
	}
}

impl Error for DiscoveryError {}

/// Transfer errors between peers
#[derive(Debug)]
pub enum TransferError {
	/// HTTP request could not be performed
	Request { url: String, message: String },

	/// Peer answered with a non-success status
	Status { url: String, status: u16 },

	/// Received bytes do not match the announced hash
	HashMismatch { id: String, expected: String },

	/// Required header missing or not valid UTF-8
	MissingHeader { name: &'static str },

	/// Local I/O failed while staging or reading a file
	Io(io::Error),

	/// Catalog rejected the item
	Catalog(CatalogError),
}

impl fmt::Display for TransferError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransferError::Request { url, message } => {
				write!(f, "Request to {} failed: {}", url, message)
			}
			TransferError::Status { url, status } => write!(f, "{} answered {}", url, status),
			TransferError::HashMismatch { id, expected } => {
				write!(f, "Hash mismatch for {}: expected {}", id, expected)
			}
			TransferError::MissingHeader { name } => write!(f, "Missing header: {}", name),
			TransferError::Io(e) => write!(f, "I/O error: {}", e),
			TransferError::Catalog(e) => write!(f, "Catalog error: {}", e),
		}
	}
}

impl Error for TransferError {}

impl From<io::Error> for TransferError {
	fn from(e: io::Error) -> Self {
		TransferError::Io(e)
	}
}

impl From<CatalogError> for TransferError {
	fn from(e: CatalogError) -> Self {
		TransferError::Catalog(e)
	}
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
	/// Config file could not be read
	Read { path: PathBuf, source: io::Error },

	/// Config file could not be parsed
	Parse { path: PathBuf, message: String },

	/// Config value out of range
	Invalid { message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Read { path, source } => {
				write!(f, "Cannot read {}: {}", path.display(), source)
			}
			ConfigError::Parse { path, message } => {
				write!(f, "Cannot parse {}: {}", path.display(), message)
			}
			ConfigError::Invalid { message } => write!(f, "{}", message),
		}
	}
}

impl Error for ConfigError {}


// vim: ts=4

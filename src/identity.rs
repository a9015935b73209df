//! Local peer identity, created once at first run

use std::path::Path;

use crate::error::StoreError;
use crate::logging::*;
use crate::store::{read_json, write_json_atomic};
use crate::types::PeerIdentity;
use crate::util;

/// Load the identity stored at `path`, creating and persisting a new one if absent
pub async fn load_or_create(path: &Path) -> Result<PeerIdentity, StoreError> {
	if let Some(identity) = read_json::<PeerIdentity>(path).await? {
		debug!("Loaded identity {} ({})", identity.peer_id, identity.display_name);
		return Ok(identity);
	}

	let identity = PeerIdentity {
		peer_id: util::new_id(),
		display_name: default_display_name(),
		created_at: chrono::Utc::now().to_rfc3339(),
	};
	write_json_atomic(path, &identity).await?;

	info!("Created identity {} ({}) at {}", identity.peer_id, identity.display_name, path.display());
	Ok(identity)
}

/// Host name, or a generic label when the OS does not report one
pub fn default_display_name() -> String {
	sysinfo::System::host_name().filter(|h| !h.is_empty()).unwrap_or_else(|| "peersync".to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_identity_is_created_once() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("json").join("identity.json");

		let first = load_or_create(&path).await.unwrap();
		let second = load_or_create(&path).await.unwrap();

		assert_eq!(first, second);
		assert!(!first.peer_id.is_empty());
		assert!(chrono::DateTime::parse_from_rfc3339(&first.created_at).is_ok());
	}
}

// vim: ts=4

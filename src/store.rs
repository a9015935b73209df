//! Durable JSON persistence
//!
//! Every file written here goes through [`write_json_atomic`]: the document is
//! written to `<file>.tmp` and renamed over the target, so readers only ever
//! see a complete snapshot. The catalog store additionally keeps a backup copy
//! that is used when the primary cannot be parsed.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::logging::*;
use crate::types::DataPackage;

/// Persistence interface consumed by the catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
	/// All persisted entries; empty when nothing was ever saved
	async fn load(&self) -> Result<Vec<DataPackage>, StoreError>;

	/// Replace the persisted entry set
	async fn save(&self, entries: &[DataPackage]) -> Result<(), StoreError>;
}

/// `<path>.tmp`, next to the target so the rename stays on one filesystem
fn tmp_path(path: &Path) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(".tmp");
	PathBuf::from(name)
}

/// Serialize `value` as pretty JSON and atomically replace `path`
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent)
			.await
			.map_err(|e| StoreError::SaveFailed { path: path.to_path_buf(), source: Box::new(e) })?;
	}

	let json = serde_json::to_vec_pretty(value)
		.map_err(|e| StoreError::SaveFailed { path: path.to_path_buf(), source: Box::new(e) })?;

	let tmp = tmp_path(path);
	tokio::fs::write(&tmp, json)
		.await
		.map_err(|e| StoreError::SaveFailed { path: tmp.clone(), source: Box::new(e) })?;

	tokio::fs::rename(&tmp, path)
		.await
		.map_err(|e| StoreError::SaveFailed { path: path.to_path_buf(), source: Box::new(e) })
}

/// Read and parse a JSON document; `Ok(None)` when the file does not exist
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
	let contents = match tokio::fs::read(path).await {
		Ok(c) => c,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(StoreError::LoadFailed { path: path.to_path_buf(), source: e }),
	};

	serde_json::from_slice(&contents).map(Some).map_err(|e| StoreError::Corrupted {
		path: path.to_path_buf(),
		message: format!("Failed to parse JSON: {}", e),
	})
}

/// Catalog entries as a flat JSON list, with a backup copy
pub struct JsonCatalogStore {
	data_file: PathBuf,
	backup_file: PathBuf,
}

impl JsonCatalogStore {
	pub fn new(data_file: PathBuf, backup_file: PathBuf) -> Self {
		JsonCatalogStore { data_file, backup_file }
	}

	/// `files-metadata.json` and its backup inside `json_dir`
	pub fn in_dir(json_dir: &Path) -> Self {
		JsonCatalogStore::new(
			json_dir.join("files-metadata.json"),
			json_dir.join("files-metadata-backup.json"),
		)
	}

	pub fn data_file(&self) -> &Path {
		&self.data_file
	}

	pub fn backup_file(&self) -> &Path {
		&self.backup_file
	}
}

#[async_trait]
impl CatalogStore for JsonCatalogStore {
	async fn load(&self) -> Result<Vec<DataPackage>, StoreError> {
		let primary_err = match read_json::<Vec<DataPackage>>(&self.data_file).await {
			Ok(Some(entries)) => return Ok(entries),
			Ok(None) => None,
			Err(e) => {
				warn!("Catalog file unreadable, trying backup: {}", e);
				Some(e)
			}
		};

		match read_json::<Vec<DataPackage>>(&self.backup_file).await {
			Ok(Some(entries)) => {
				info!("Loaded {} catalog entries from backup {}", entries.len(), self.backup_file.display());
				Ok(entries)
			}
			Ok(None) => match primary_err {
				// Neither file exists: first run
				None => Ok(vec![]),
				Some(e) => Err(StoreError::Unrecoverable {
					primary: e.to_string(),
					backup: "missing".to_string(),
				}),
			},
			Err(backup_err) => Err(StoreError::Unrecoverable {
				primary: primary_err.map(|e| e.to_string()).unwrap_or_else(|| "missing".to_string()),
				backup: backup_err.to_string(),
			}),
		}
	}

	async fn save(&self, entries: &[DataPackage]) -> Result<(), StoreError> {
		write_json_atomic(&self.data_file, entries).await?;

		tokio::fs::copy(&self.data_file, &self.backup_file)
			.await
			.map(|_| ())
			.map_err(|e| StoreError::SaveFailed { path: self.backup_file.clone(), source: Box::new(e) })
	}
}


// vim: ts=4

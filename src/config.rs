//! Unified configuration for a peersync node
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (`--config`, or `<dataDir>/peersync.toml`), TOML or JSON5
//! 3. Environment variables (`HTTP_PORT`, `DISCOVERY_PORT`, `PEERSYNC_*`)
//! 4. CLI flags (highest priority)

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Name of the config file looked up inside the data directory
pub const CONFIG_FILE_NAME: &str = "peersync.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// STORAGE LAYOUT
	// ========================================================================
	/// Root for all node state (~/.peersync)
	pub data_dir: PathBuf,

	/// Watched directory; defaults to `<dataDir>/files`
	pub files_dir: Option<PathBuf>,

	// ========================================================================
	// NETWORK
	// ========================================================================
	/// Port of the HTTP transfer endpoints
	pub http_port: u16,

	/// UDP port used for multicast announces
	pub discovery_port: u16,

	/// Multicast group joined by discovery (link-local, TTL 1)
	pub multicast_group: String,

	/// Seconds between two announces
	pub announce_interval_secs: u64,

	/// Peer considered gone after this many seconds without an announce
	pub liveness_timeout_secs: u64,

	/// Seconds between two liveness sweeps
	pub liveness_check_secs: u64,

	/// Timeout for a single outbound transfer request
	pub request_timeout_secs: u64,

	// ========================================================================
	// CATALOG
	// ========================================================================
	/// Debounce window for batched filesystem events
	pub debounce_ms: u64,

	/// A new file is indexed only once its size and mtime held still this long
	pub write_stability_ms: u64,

	/// Number of files hashed in parallel
	pub hash_concurrency: usize,

	/// Glob patterns (relative to the watched directory) the watcher ignores
	pub ignore_patterns: Vec<String>,

	// ========================================================================
	// OUTPUT & LOGGING
	// ========================================================================
	/// Log level (trace, debug, info, warn, error); RUST_LOG overrides
	pub log_level: String,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			data_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".peersync"))
				.unwrap_or_else(|| PathBuf::from(".peersync")),
			files_dir: None,

			http_port: 3000,
			discovery_port: 41234,
			multicast_group: "239.255.0.1".to_string(),
			announce_interval_secs: 5,
			liveness_timeout_secs: 15,
			liveness_check_secs: 5,
			request_timeout_secs: 300,

			debounce_ms: 250,
			write_stability_ms: 1500,
			hash_concurrency: 5,
			ignore_patterns: vec![".inprogress/**".to_string()],

			log_level: "info".to_string(),
		}
	}
}

impl Config {
	/// Config for a node rooted at `data_dir`, everything else default
	pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
		Config { data_dir: data_dir.into(), ..Config::default() }
	}

	/// Parse a config file; `.json`/`.json5` as JSON5, anything else as TOML
	pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
		let contents = std::fs::read_to_string(path)
			.map_err(|e| ConfigError::Read { path: path.to_path_buf(), source: e })?;

		let parsed = match path.extension().and_then(|e| e.to_str()) {
			Some("json") | Some("json5") => json5::from_str(&contents).map_err(|e| e.to_string()),
			_ => toml::from_str(&contents).map_err(|e| e.to_string()),
		};

		parsed.map_err(|message| ConfigError::Parse { path: path.to_path_buf(), message })
	}

	/// Defaults, overlaid with `explicit` or `<dataDir>/peersync.toml` if present,
	/// overlaid with the process environment
	pub fn load(explicit: Option<&Path>, data_dir: Option<&Path>) -> Result<Config, ConfigError> {
		let base_dir = data_dir.map(Path::to_path_buf).unwrap_or_else(|| Config::default().data_dir);

		let mut config = match explicit {
			Some(path) => Config::from_file(path)?,
			None => {
				let candidate = base_dir.join(CONFIG_FILE_NAME);
				if candidate.exists() {
					Config::from_file(&candidate)?
				} else {
					Config::default()
				}
			}
		};
		if let Some(dir) = data_dir {
			config.data_dir = dir.to_path_buf();
		}

		config.apply_env_from(|key| std::env::var(key).ok())?;
		Ok(config)
	}

	/// Overlay environment variables looked up through `lookup`
	pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(v) = lookup("HTTP_PORT") {
			self.http_port = parse_port("HTTP_PORT", &v)?;
		}
		if let Some(v) = lookup("DISCOVERY_PORT") {
			self.discovery_port = parse_port("DISCOVERY_PORT", &v)?;
		}
		if let Some(v) = lookup("PEERSYNC_DATA_DIR") {
			self.data_dir = PathBuf::from(v);
		}
		if let Some(v) = lookup("PEERSYNC_FILES_DIR") {
			self.files_dir = Some(PathBuf::from(v));
		}
		if let Some(v) = lookup("PEERSYNC_MULTICAST_GROUP") {
			self.multicast_group = v;
		}
		Ok(())
	}

	/// Reject values the node cannot run with
	pub fn validate(&self) -> Result<(), ConfigError> {
		let group: Ipv4Addr = self.multicast_group.parse().map_err(|_| ConfigError::Invalid {
			message: format!("multicastGroup '{}' is not an IPv4 address", self.multicast_group),
		})?;
		if !group.is_multicast() {
			return Err(ConfigError::Invalid {
				message: format!("multicastGroup {} is not a multicast address", group),
			});
		}
		if self.announce_interval_secs == 0 || self.liveness_check_secs == 0 {
			return Err(ConfigError::Invalid { message: "intervals must be > 0".to_string() });
		}
		if self.liveness_timeout_secs < self.announce_interval_secs {
			return Err(ConfigError::Invalid {
				message: "livenessTimeoutSecs must be >= announceIntervalSecs".to_string(),
			});
		}
		if self.hash_concurrency == 0 {
			return Err(ConfigError::Invalid { message: "hashConcurrency must be > 0".to_string() });
		}
		Ok(())
	}

	pub fn files_dir(&self) -> PathBuf {
		self.files_dir.clone().unwrap_or_else(|| self.data_dir.join("files"))
	}

	/// Canonical object store, one file per catalog id
	pub fn store_dir(&self) -> PathBuf {
		self.data_dir.join("store")
	}

	/// Staging area for incoming transfers
	pub fn staging_dir(&self) -> PathBuf {
		self.data_dir.join(".inprogress")
	}

	pub fn json_dir(&self) -> PathBuf {
		self.data_dir.join("json")
	}

	pub fn identity_file(&self) -> PathBuf {
		self.json_dir().join("identity.json")
	}

	pub fn sync_file(&self) -> PathBuf {
		self.json_dir().join("sync-metadata.json")
	}

	pub fn multicast_addr(&self) -> Result<Ipv4Addr, ConfigError> {
		self.multicast_group.parse().map_err(|_| ConfigError::Invalid {
			message: format!("multicastGroup '{}' is not an IPv4 address", self.multicast_group),
		})
	}

	pub fn announce_interval(&self) -> Duration {
		Duration::from_secs(self.announce_interval_secs)
	}

	pub fn liveness_timeout(&self) -> Duration {
		Duration::from_secs(self.liveness_timeout_secs)
	}

	pub fn liveness_check(&self) -> Duration {
		Duration::from_secs(self.liveness_check_secs)
	}

	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn write_stability(&self) -> Duration {
		Duration::from_millis(self.write_stability_ms)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::Invalid {
		message: format!("{}='{}' is not a valid port", key, value),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use tempfile::TempDir;

	#[test]
	fn test_config_default() {
		let config = Config::default();
		assert_eq!(config.announce_interval_secs, 5);
		assert_eq!(config.liveness_timeout_secs, 15);
		assert_eq!(config.debounce_ms, 250);
		assert_eq!(config.write_stability(), Duration::from_millis(1500));
		assert_eq!(config.hash_concurrency, 5);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_env_overrides_ports() {
		let env: HashMap<&str, &str> = [("HTTP_PORT", "8080"), ("DISCOVERY_PORT", "5000")].into_iter().collect();
		let mut config = Config::default();
		config.apply_env_from(|k| env.get(k).map(|v| v.to_string())).unwrap();
		assert_eq!(config.http_port, 8080);
		assert_eq!(config.discovery_port, 5000);
	}

	#[test]
	fn test_env_rejects_bad_port() {
		let mut config = Config::default();
		let result = config.apply_env_from(|k| if k == "HTTP_PORT" { Some("http".into()) } else { None });
		assert!(result.is_err());
	}

	#[test]
	fn test_toml_and_json5_files() {
		let dir = TempDir::new().unwrap();
		let toml_path = dir.path().join("peersync.toml");
		std::fs::write(&toml_path, "httpPort = 4000\nignorePatterns = [\"*.part\"]\n").unwrap();
		let config = Config::from_file(&toml_path).unwrap();
		assert_eq!(config.http_port, 4000);
		assert_eq!(config.ignore_patterns, vec!["*.part".to_string()]);
		assert_eq!(config.discovery_port, 41234);

		let json_path = dir.path().join("node.json5");
		std::fs::write(&json_path, "{ debounceMs: 100, // comment\n }").unwrap();
		assert_eq!(Config::from_file(&json_path).unwrap().debounce_ms, 100);
	}

	#[test]
	fn test_validate_rejects_unicast_group() {
		let config = Config { multicast_group: "10.0.0.1".into(), ..Config::default() };
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_layout_under_data_dir() {
		let config = Config::with_data_dir("/srv/node");
		assert_eq!(config.files_dir(), PathBuf::from("/srv/node/files"));
		assert_eq!(config.store_dir(), PathBuf::from("/srv/node/store"));
		assert_eq!(config.sync_file(), PathBuf::from("/srv/node/json/sync-metadata.json"));
	}
}

// vim: ts=4

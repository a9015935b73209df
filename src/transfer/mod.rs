//! Moving catalog entries between peers
//!
//! The engine only sees the [`Transport`] trait. [`HttpTransport`] is the
//! production client, [`server`] the receiving side, and [`StreamStore`] the
//! staging area incoming bytes pass through before they are committed.

pub mod client;
pub mod server;
pub mod stream;

pub use self::client::HttpTransport;
pub use self::stream::StreamStore;

use async_trait::async_trait;

use crate::error::TransferError;
use crate::types::{DataPackage, PeerInfo};

/// Header names used by `POST /v1/sync/file`
pub mod headers {
	pub const ID: &str = "id";
	pub const PARENT_ID: &str = "parentid";
	pub const NAME: &str = "name";
	pub const EXT: &str = "ext";
	pub const HASH: &str = "hash";
	pub const PRIVACY: &str = "privacy";
	pub const SIZE: &str = "size";
}

#[async_trait]
pub trait Transport: Send + Sync {
	/// Deliver one entry to `peer`; returns once the peer has accepted it
	async fn send(&self, peer: &PeerInfo, package: &DataPackage) -> Result<(), TransferError>;
}

// vim: ts=4

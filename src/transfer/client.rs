//! HTTP client side of peer transfers

use async_trait::async_trait;
use reqwest::{Body, Client, RequestBuilder};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use super::{headers, Transport};
use crate::error::TransferError;
use crate::logging::*;
use crate::types::{DataPackage, DirEntry, FileEntry, PeerInfo};
use crate::util;

/// Pushes entries to peers over HTTP; file bytes are streamed from the object store
#[derive(Clone)]
pub struct HttpTransport {
	client: Client,
	store_dir: PathBuf,
}

impl HttpTransport {
	pub fn new(store_dir: PathBuf, timeout: Duration) -> Result<Self, TransferError> {
		// Peers are on the LAN; never route them through a proxy
		let client = Client::builder()
			.no_proxy()
			.timeout(timeout)
			.build()
			.map_err(|e| TransferError::Request { url: String::new(), message: e.to_string() })?;
		Ok(HttpTransport { client, store_dir })
	}

	pub fn base_url(peer: &PeerInfo) -> String {
		format!("http://{}:{}", peer.address, peer.port)
	}

	/// The peer's full catalog (`GET /`)
	pub async fn fetch_catalog(&self, peer: &PeerInfo) -> Result<Vec<DataPackage>, TransferError> {
		let url = format!("{}/", Self::base_url(peer));
		let response = self.execute(&url, self.client.get(&url)).await?;
		response.json().await.map_err(|e| TransferError::Request { url, message: e.to_string() })
	}

	async fn send_file(&self, peer: &PeerInfo, file: &FileEntry) -> Result<(), TransferError> {
		let url = format!("{}/v1/sync/file", Self::base_url(peer));
		let source = tokio::fs::File::open(self.store_dir.join(&file.id)).await?;

		let request = self
			.client
			.post(&url)
			.header(headers::ID, &file.id)
			.header(headers::PARENT_ID, &file.parent_id)
			.header(headers::NAME, util::encode_header_text(&file.name))
			.header(headers::EXT, util::encode_header_text(&file.ext))
			.header(headers::HASH, &file.hash)
			.header(headers::PRIVACY, file.privacy.as_str())
			.header(headers::SIZE, file.size.to_string())
			.body(Body::wrap_stream(ReaderStream::new(source)));

		self.execute(&url, request).await?;
		debug!("Sent file {} ({} bytes) to {}", file.id, file.size, peer.id);
		Ok(())
	}

	async fn send_dir(&self, peer: &PeerInfo, dir: &DirEntry) -> Result<(), TransferError> {
		let url = format!("{}/v1/sync/dir", Self::base_url(peer));
		self.execute(&url, self.client.post(&url).json(dir)).await?;
		debug!("Sent dir {} to {}", dir.id, peer.id);
		Ok(())
	}

	async fn execute(&self, url: &str, request: RequestBuilder) -> Result<reqwest::Response, TransferError> {
		let response = request
			.send()
			.await
			.map_err(|e| TransferError::Request { url: url.to_string(), message: e.to_string() })?;

		let status = response.status();
		if !status.is_success() {
			return Err(TransferError::Status { url: url.to_string(), status: status.as_u16() });
		}
		Ok(response)
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn send(&self, peer: &PeerInfo, package: &DataPackage) -> Result<(), TransferError> {
		match package {
			DataPackage::File(file) => self.send_file(peer, file).await,
			DataPackage::Dir(dir) => self.send_dir(peer, dir).await,
		}
	}
}

// vim: ts=4

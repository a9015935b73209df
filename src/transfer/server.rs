//! HTTP endpoints peers push to and read from
//!
//! - `GET /` lists the catalog
//! - `GET /{id}/download` streams a stored file
//! - `POST /v1/sync/file` receives a file (metadata in headers, raw body)
//! - `POST /v1/sync/dir` receives a directory entry as JSON

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, TryStreamExt};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

use super::{headers, StreamStore};
use crate::catalog::{self, Catalog};
use crate::error::{CatalogError, TransferError};
use crate::hasher::Hasher;
use crate::logging::*;
use crate::types::{DataPackage, DirEntry, FileEntry, Origin, Privacy};
use crate::util;

#[derive(Clone)]
pub struct ServerState {
	pub catalog: Catalog,
	pub streams: StreamStore,
	pub hasher: Arc<dyn Hasher>,
}

pub fn router(state: ServerState) -> Router {
	Router::new()
		.route("/", get(list_catalog))
		.route("/{id}/download", get(download))
		.route("/v1/sync/file", post(receive_file))
		.route("/v1/sync/dir", post(receive_dir))
		// File bodies are streamed to disk, not buffered
		.layer(DefaultBodyLimit::disable())
		.with_state(state)
}

/// Serve until the task is aborted or the listener fails
pub async fn serve(listener: TcpListener, state: ServerState) -> io::Result<()> {
	if let Ok(addr) = listener.local_addr() {
		info!("HTTP endpoints listening on {}", addr);
	}
	axum::serve(listener, router(state)).await
}

/// Stage `body`, verify it against `entry.hash`, commit it to the object
/// store and register the entry. A hash mismatch deletes the staged bytes;
/// an entry naming paths outside the store is refused before anything is
/// written.
pub async fn ingest_file<S, B>(state: &ServerState, mut entry: FileEntry, body: S) -> Result<DataPackage, TransferError>
where
	S: Stream<Item = io::Result<B>> + Unpin,
	B: AsRef<[u8]>,
{
	catalog::check_package(&DataPackage::File(entry.clone()))?;
	let staged = state.streams.stage(body, &entry.id).await?;

	if !state.hasher.is_hashed(&entry.hash, &staged).await {
		state.streams.discard(&staged).await;
		warn!("Rejected {}: content does not match hash {}", entry.id, entry.hash);
		return Err(TransferError::HashMismatch { id: entry.id, expected: entry.hash });
	}

	entry.size = tokio::fs::metadata(&staged).await?.len();
	state.streams.commit(&staged, &entry.id).await?;
	let stored = state.catalog.sync_register(DataPackage::File(entry)).await?;

	info!("Received file {} ({} bytes)", stored.id(), stored.size());
	Ok(stored)
}

/// Build the announced entry from `POST /v1/sync/file` headers
pub fn file_entry_from_headers(map: &HeaderMap) -> Result<FileEntry, TransferError> {
	let text = |name: &'static str| map.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
	let required = |name: &'static str| {
		text(name).filter(|v| !v.is_empty()).map(str::to_string).ok_or(TransferError::MissingHeader { name })
	};
	let encoded = |name: &'static str| match text(name) {
		None => Ok(String::new()),
		Some(v) => util::decode_header_text(v).ok_or(TransferError::MissingHeader { name }),
	};

	let id = required(headers::ID)?;
	let hash = required(headers::HASH)?;
	let name = encoded(headers::NAME)?;
	if name.is_empty() {
		return Err(TransferError::MissingHeader { name: headers::NAME });
	}
	let ext = encoded(headers::EXT)?;
	let parent_id = text(headers::PARENT_ID).unwrap_or("").to_string();
	let size = text(headers::SIZE).and_then(|v| v.parse().ok()).unwrap_or(0);

	let mut entry = FileEntry::new(id, parent_id, name, ext, hash, size, Origin::Network);
	if let Some(privacy) = text(headers::PRIVACY).and_then(Privacy::parse) {
		entry.privacy = privacy;
	}
	Ok(entry)
}

async fn list_catalog(State(state): State<ServerState>) -> Json<Vec<DataPackage>> {
	Json(state.catalog.fetch_all().await)
}

async fn download(State(state): State<ServerState>, Path(id): Path<String>) -> Response {
	let file = match state.catalog.fetch_one(&id).await {
		Some(DataPackage::File(f)) => f,
		_ => return error_response(StatusCode::NOT_FOUND, format!("No file {}", id)),
	};

	match state.streams.read_stream(&state.catalog.object_path(&file.id)).await {
		Ok(stream) => (
			[(header::CONTENT_TYPE, "application/octet-stream".to_string()), (header::CONTENT_LENGTH, file.size.to_string())],
			Body::from_stream(stream),
		)
			.into_response(),
		Err(e) => {
			warn!("Object for {} unavailable: {}", file.id, e);
			error_response(StatusCode::NOT_FOUND, format!("No content for {}", id))
		}
	}
}

async fn receive_file(State(state): State<ServerState>, map: HeaderMap, body: Body) -> Response {
	let entry = match file_entry_from_headers(&map) {
		Ok(e) => e,
		Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
	};

	let stream = body.into_data_stream().map_err(io::Error::other);
	match ingest_file(&state, entry, stream).await {
		Ok(stored) => (StatusCode::OK, Json(stored)).into_response(),
		Err(e) => transfer_error_response(e),
	}
}

async fn receive_dir(State(state): State<ServerState>, Json(dir): Json<DirEntry>) -> Response {
	let stored = match state.catalog.sync_register(DataPackage::Dir(dir)).await {
		Ok(s) => s,
		Err(e) => return transfer_error_response(e.into()),
	};

	// Materialize the directory so local files can be dropped into it; the
	// watcher event this causes is recognized as a network import
	if let Some(path) = state.catalog.path_of(stored.id()).await {
		if let Err(e) = tokio::fs::create_dir_all(&path).await {
			warn!("Cannot create {}: {}", path.display(), e);
		}
	}

	info!("Received dir {}", stored.id());
	(StatusCode::OK, Json(stored)).into_response()
}

fn transfer_error_response(e: TransferError) -> Response {
	let status = match &e {
		TransferError::HashMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
		TransferError::MissingHeader { .. } => StatusCode::BAD_REQUEST,
		TransferError::Catalog(CatalogError::InvalidPackage { .. }) => StatusCode::BAD_REQUEST,
		_ => StatusCode::INTERNAL_SERVER_ERROR,
	};
	if status == StatusCode::INTERNAL_SERVER_ERROR {
		error!("Transfer failed: {}", e);
	}
	error_response(status, e.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
	(status, Json(serde_json::json!({ "status": "error", "error": message }))).into_response()
}


// vim: ts=4

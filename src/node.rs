//! A running peersync node: catalog, watcher, HTTP endpoints, discovery and
//! sync engine wired together

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::catalog::{Catalog, CatalogWatcher};
use crate::config::Config;
use crate::discovery::{Discovery, DiscoverySettings};
use crate::engine::{PeerSyncStore, SyncEngine, SyncEvent};
use crate::error::SyncError;
use crate::hasher::{Blake3Hasher, BoundedHasher, Hasher};
use crate::identity;
use crate::logging::*;
use crate::store::JsonCatalogStore;
use crate::transfer::server::{self, ServerState};
use crate::transfer::{HttpTransport, StreamStore};
use crate::types::PeerIdentity;

/// How long shutdown waits for queued transfers
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Node {
	identity: PeerIdentity,
	catalog: Catalog,
	engine: SyncEngine,
	http_addr: SocketAddr,
	watcher: CatalogWatcher,
	discovery: Discovery,
	tasks: Vec<JoinHandle<()>>,
}

impl Node {
	pub async fn start(config: Config) -> Result<Node, SyncError> {
		config.validate()?;

		let identity = identity::load_or_create(&config.identity_file()).await?;
		info!("Starting node {} ({})", identity.peer_id, identity.display_name);

		let hasher: Arc<dyn Hasher> = Arc::new(BoundedHasher::new(Blake3Hasher, config.hash_concurrency));
		let store = Arc::new(JsonCatalogStore::in_dir(&config.json_dir()));
		let (catalog, catalog_rx) =
			Catalog::open(&config.files_dir(), &config.store_dir(), hasher.clone(), store).await?;

		let transport = Arc::new(HttpTransport::new(config.store_dir(), config.request_timeout())?);
		let (engine, sync_rx) = SyncEngine::new(
			catalog.clone(),
			transport,
			PeerSyncStore::new(config.sync_file()),
			config.liveness_timeout(),
		);

		let mut tasks = Vec::new();

		let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
		let http_addr = listener.local_addr()?;
		let server_state = ServerState {
			catalog: catalog.clone(),
			streams: StreamStore::new(config.staging_dir(), config.store_dir()),
			hasher,
		};
		tasks.push(tokio::spawn(async move {
			if let Err(e) = server::serve(listener, server_state).await {
				error!("HTTP server stopped: {}", e);
			}
		}));

		let watcher = catalog.watch(config.debounce(), config.write_stability(), &config.ignore_patterns)?;

		let settings = DiscoverySettings {
			port: config.discovery_port,
			http_port: http_addr.port(),
			group: config.multicast_addr()?,
			interval: config.announce_interval(),
		};
		let (discovery, mut discovery_rx) = Discovery::start(identity.clone(), settings).await?;

		tasks.push(engine.spawn_liveness(config.liveness_check()));

		let handler = engine.clone();
		tasks.push(tokio::spawn(async move {
			while let Some(event) = discovery_rx.recv().await {
				handler.on_discovery_event(event).await;
			}
		}));

		let handler = engine.clone();
		let mut catalog_rx = catalog_rx;
		tasks.push(tokio::spawn(async move {
			while let Some(event) = catalog_rx.recv().await {
				handler.on_catalog_event(event).await;
			}
		}));

		let mut sync_rx = sync_rx;
		tasks.push(tokio::spawn(async move {
			while let Some(event) = sync_rx.recv().await {
				match event {
					SyncEvent::PeerDiscovered(peer) => debug!("peer up: {}", peer.id),
					SyncEvent::PeerDisconnected(peer) => debug!("peer down: {}", peer.id),
				}
			}
		}));

		Ok(Node { identity, catalog, engine, http_addr, watcher, discovery, tasks })
	}

	pub fn identity(&self) -> &PeerIdentity {
		&self.identity
	}

	pub fn catalog(&self) -> &Catalog {
		&self.catalog
	}

	pub fn engine(&self) -> &SyncEngine {
		&self.engine
	}

	pub fn http_addr(&self) -> SocketAddr {
		self.http_addr
	}

	/// Stop watching and announcing, give queued transfers a moment, then stop
	pub async fn shutdown(self) {
		self.watcher.stop();
		self.discovery.stop();

		if tokio::time::timeout(DRAIN_TIMEOUT, self.engine.scheduler().wait_idle()).await.is_err() {
			warn!("Shutting down with transfers still queued; they stay in the peer backlog");
		}
		for task in &self.tasks {
			task.abort();
		}
		info!("Node {} stopped", self.identity.peer_id);
	}
}

// vim: ts=4

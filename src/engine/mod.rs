//! Sync coordination engine
//!
//! Tracks live peers from discovery sightings, keeps a durable per-peer
//! backlog of items to send, and turns local catalog additions into transfer
//! jobs on the [`Scheduler`].
//!
//! Peer lifecycle:
//! - first sighting: the persisted record is created or refreshed,
//!   `PeerDiscovered` is emitted and the persisted `toSend` backlog is replayed
//!   at MEDIUM priority
//! - later sightings: address, port and last-seen are refreshed; the file is
//!   rewritten only when the endpoint moved. Queued items without a pending
//!   job (an earlier send failed) are scheduled again at MEDIUM priority
//! - no sighting within the liveness timeout: the peer leaves the live set and
//!   `PeerDisconnected` is emitted; its persisted queues stay on disk
//!
//! One async mutex guards the live peer table and every read-modify-write of
//! the sync file.

pub mod persist;
pub mod scheduler;

pub use self::persist::{PeerSyncStore, SyncFile};
pub use self::scheduler::{Priority, Scheduler};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::catalog::{Catalog, CatalogEvent};
use crate::discovery::DiscoveryEvent;
use crate::error::SyncError;
use crate::logging::*;
use crate::transfer::Transport;
use crate::types::{DataPackage, Origin, PeerInfo, PeerState, PeerSyncPersist};
use crate::util;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
	PeerDiscovered(PeerInfo),
	PeerDisconnected(PeerInfo),
}

#[derive(Default)]
struct EngineState {
	peers: HashMap<String, PeerState>,
	/// (peer id, item id) pairs with a job waiting or running
	scheduled: HashSet<(String, String)>,
}

struct Inner {
	catalog: Catalog,
	transport: Arc<dyn Transport>,
	store: PeerSyncStore,
	scheduler: Scheduler,
	liveness_timeout: Duration,
	state: Mutex<EngineState>,
	events: mpsc::UnboundedSender<SyncEvent>,
}

#[derive(Clone)]
pub struct SyncEngine {
	inner: Arc<Inner>,
}

impl SyncEngine {
	pub fn new(
		catalog: Catalog,
		transport: Arc<dyn Transport>,
		store: PeerSyncStore,
		liveness_timeout: Duration,
	) -> (SyncEngine, mpsc::UnboundedReceiver<SyncEvent>) {
		let (events, rx) = mpsc::unbounded_channel();
		let engine = SyncEngine {
			inner: Arc::new(Inner {
				catalog,
				transport,
				store,
				scheduler: Scheduler::new(),
				liveness_timeout,
				state: Mutex::new(EngineState::default()),
				events,
			}),
		};
		(engine, rx)
	}

	pub fn scheduler(&self) -> &Scheduler {
		&self.inner.scheduler
	}

	pub async fn live_peers(&self) -> Vec<PeerInfo> {
		let state = self.inner.state.lock().await;
		let mut peers: Vec<PeerInfo> = state.peers.values().map(|p| p.info.clone()).collect();
		peers.sort_by(|a, b| a.id.cmp(&b.id));
		peers
	}

	pub async fn peer(&self, peer_id: &str) -> Option<PeerState> {
		self.inner.state.lock().await.peers.get(peer_id).cloned()
	}

	/// Handle a discovery sighting
	pub async fn peer_seen(&self, info: PeerInfo) -> Result<(), SyncError> {
		let mut state = self.inner.state.lock().await;

		if let Some(known) = state.peers.get_mut(&info.id) {
			let moved = known.sync.refresh(&info);
			known.info.address = info.address.clone();
			known.info.port = info.port;
			known.info.last_seen = info.last_seen;
			if !info.display_name.is_empty() {
				known.info.display_name = info.display_name.clone();
			}

			if moved {
				info!("Peer {} moved to {}:{}", info.id, info.address, info.port);
				let mut file = self.inner.store.load().await;
				let record = file.peers.entry(info.id.clone()).or_insert_with(|| known.sync.clone());
				record.refresh(&info);
				known.sync = record.clone();
				self.inner.store.save(&file).await?;
			}

			let replayed = self.replay_backlog(&mut state, &info.id).await;
			if replayed > 0 {
				debug!("Retrying {} queued item(s) for {}", replayed, info.id);
			}
			return Ok(());
		}

		let mut file = self.inner.store.load().await;
		let record = match file.peers.get_mut(&info.id) {
			Some(existing) => {
				existing.refresh(&info);
				existing.clone()
			}
			None => {
				let fresh = PeerSyncPersist::from_info(&info);
				file.peers.insert(info.id.clone(), fresh.clone());
				fresh
			}
		};
		self.inner.store.save(&file).await?;

		let backlog = record.queue.to_send.len();
		state.peers.insert(info.id.clone(), PeerState { info: info.clone(), sync: record });
		info!(
			"Peer discovered: {} ({}) at {}:{}, {} item(s) pending",
			info.id,
			info.display_name,
			info.address,
			info.port,
			backlog
		);
		self.emit(SyncEvent::PeerDiscovered(info.clone()));

		self.replay_backlog(&mut state, &info.id).await;
		Ok(())
	}

	/// Queue a locally added item for every live peer. Returns the number of
	/// peers it was queued for; network-origin items are never fanned out.
	///
	/// Items left queued by earlier failed sends are retried alongside.
	pub async fn local_added(&self, package: DataPackage) -> Result<usize, SyncError> {
		if package.origin() != Origin::Local {
			debug!("Not fanning out network item {}", package.id());
			return Ok(0);
		}

		let mut state = self.inner.state.lock().await;
		if state.peers.is_empty() {
			debug!("No live peers for {}", package.id());
			return Ok(0);
		}

		let mut file = self.inner.store.load().await;
		let mut targets = Vec::new();
		for (peer_id, peer) in state.peers.iter_mut() {
			let record = file.peers.entry(peer_id.clone()).or_insert_with(|| peer.sync.clone());
			if record.queue.push_send(&package) {
				targets.push(peer_id.clone());
			}
			peer.sync = record.clone();
		}
		if !targets.is_empty() {
			self.inner.store.save(&file).await?;
			for peer_id in &targets {
				self.schedule_send(&mut state, Priority::High, peer_id, package.clone()).await;
			}
			info!("Queued {} for {} peer(s)", package.id(), targets.len());
		}

		let peer_ids: Vec<String> = state.peers.keys().cloned().collect();
		for peer_id in peer_ids {
			let replayed = self.replay_backlog(&mut state, &peer_id).await;
			if replayed > 0 {
				debug!("Retrying {} queued item(s) for {}", replayed, peer_id);
			}
		}
		Ok(targets.len())
	}

	/// Drop peers not seen for longer than the liveness timeout
	pub async fn sweep_expired(&self, now_ms: u64) -> Vec<PeerInfo> {
		let timeout_ms = self.inner.liveness_timeout.as_millis() as u64;
		let mut state = self.inner.state.lock().await;

		let expired: Vec<String> = state
			.peers
			.values()
			.filter(|p| now_ms.saturating_sub(p.info.last_seen) > timeout_ms)
			.map(|p| p.info.id.clone())
			.collect();

		let mut gone = Vec::new();
		for id in expired {
			if let Some(peer) = state.peers.remove(&id) {
				info!("Peer {} ({}) went offline", peer.info.id, peer.info.display_name);
				self.emit(SyncEvent::PeerDisconnected(peer.info.clone()));
				gone.push(peer.info);
			}
		}
		gone
	}

	/// Run the liveness sweep every `every` until the handle is aborted
	pub fn spawn_liveness(&self, every: Duration) -> JoinHandle<()> {
		let engine = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(every);
			loop {
				ticker.tick().await;
				engine.sweep_expired(util::now_millis()).await;
			}
		})
	}

	pub async fn on_discovery_event(&self, event: DiscoveryEvent) {
		match event {
			DiscoveryEvent::Ready { peer_id } => info!("Discovery ready as {}", peer_id),
			DiscoveryEvent::PeerSeen(info) => {
				let id = info.id.clone();
				if let Err(e) = self.peer_seen(info).await {
					error!("Cannot track peer {}: {}", id, e);
				}
			}
			DiscoveryEvent::Error(e) => warn!("Discovery: {}", e),
		}
	}

	pub async fn on_catalog_event(&self, event: CatalogEvent) {
		match event {
			CatalogEvent::Added { package, origin: Origin::Local } => {
				let id = package.id().to_string();
				if let Err(e) = self.local_added(package).await {
					error!("Cannot queue {} for peers: {}", id, e);
				}
			}
			CatalogEvent::Added { package, origin: Origin::Network } => {
				debug!("Received {} from network", package.id())
			}
		}
	}

	/// Schedule every queued item of `peer_id` that has no job yet
	async fn replay_backlog(&self, state: &mut EngineState, peer_id: &str) -> usize {
		let backlog = match state.peers.get(peer_id) {
			Some(peer) => peer.sync.queue.to_send.clone(),
			None => return 0,
		};
		let mut replayed = 0;
		for item in backlog {
			if self.schedule_send(state, Priority::Medium, peer_id, item).await {
				replayed += 1;
			}
		}
		replayed
	}

	/// Enqueue one delivery; false when a job for the pair already exists
	async fn schedule_send(&self, state: &mut EngineState, priority: Priority, peer_id: &str, package: DataPackage) -> bool {
		let key = (peer_id.to_string(), package.id().to_string());
		if !state.scheduled.insert(key.clone()) {
			return false;
		}

		let inner = self.inner.clone();
		let label = format!("send {} to {}", key.1, key.0);
		self.inner
			.scheduler
			.enqueue(priority, label, async move {
				let result = deliver(&inner, &key.0, package).await;
				inner.state.lock().await.scheduled.remove(&key);
				result
			})
			.await;
		true
	}

	fn emit(&self, event: SyncEvent) {
		if self.inner.events.send(event).is_err() {
			debug!("No subscriber for sync events");
		}
	}
}

/// Send one item to one peer and settle the bookkeeping on success
async fn deliver(inner: &Inner, peer_id: &str, package: DataPackage) -> Result<(), SyncError> {
	let peer = {
		let state = inner.state.lock().await;
		state.peers.get(peer_id).map(|p| p.info.clone())
	}
	.ok_or_else(|| SyncError::PeerOffline { peer_id: peer_id.to_string() })?;

	inner.transport.send(&peer, &package).await?;

	{
		let mut state = inner.state.lock().await;
		let mut file = inner.store.load().await;
		if let Some(record) = file.peers.get_mut(peer_id) {
			if record.queue.remove_send(package.id()) {
				inner.store.save(&file).await?;
			}
		}
		if let Some(live) = state.peers.get_mut(peer_id) {
			live.sync.queue.remove_send(package.id());
		}
	}

	let id = package.id().to_string();
	inner.catalog.sync_register(package).await?;
	info!("Delivered {} to {} ({})", id, peer.display_name, peer.id);
	Ok(())
}

// vim: ts=4

//! LAN peer discovery over UDP multicast
//!
//! Every node periodically announces its id, display name and HTTP port to a
//! link-local multicast group and listens for the announces of others. The
//! module only reports sightings; liveness tracking belongs to the engine.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::DiscoveryError;
use crate::logging::*;
use crate::types::{PeerIdentity, PeerInfo};
use crate::util;

const ANNOUNCE_TYPE: &str = "ANNOUNCE";
const MAX_DATAGRAM: usize = 2048;

/// Wire format of an announce datagram (JSON)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Announce {
	#[serde(rename = "type")]
	pub kind: String,
	pub peer_id: String,
	#[serde(default)]
	pub name: String,
	pub port: u16,
	#[serde(default)]
	pub time_stamp: u64,
}

impl Announce {
	pub fn new(identity: &PeerIdentity, http_port: u16) -> Self {
		Announce {
			kind: ANNOUNCE_TYPE.to_string(),
			peer_id: identity.peer_id.clone(),
			name: identity.display_name.clone(),
			port: http_port,
			time_stamp: util::now_millis(),
		}
	}
}

#[derive(Debug)]
pub enum DiscoveryEvent {
	/// Socket bound and group joined
	Ready { peer_id: String },
	/// Another node announced itself
	PeerSeen(PeerInfo),
	/// Send or receive failed; discovery keeps running
	Error(DiscoveryError),
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
	pub port: u16,
	pub http_port: u16,
	pub group: Ipv4Addr,
	pub interval: Duration,
}

/// Turn a received datagram into a sighting. Unparseable payloads, other
/// message types and our own announces yield `None`.
pub fn parse_announce(bytes: &[u8], source: IpAddr, local_id: &str, now: u64) -> Option<PeerInfo> {
	let announce: Announce = serde_json::from_slice(bytes).ok()?;
	if announce.kind != ANNOUNCE_TYPE || announce.peer_id.is_empty() || announce.peer_id == local_id {
		return None;
	}

	Some(PeerInfo {
		id: announce.peer_id,
		display_name: announce.name,
		address: source.to_string(),
		port: announce.port,
		last_seen: now,
	})
}

/// Running discovery; dropping it stops announcing and closes the socket
pub struct Discovery {
	local_addr: SocketAddr,
	task: JoinHandle<()>,
}

impl Discovery {
	/// Bind the discovery port, join the group and start announcing.
	/// A bind failure is returned; it is not retried.
	pub async fn start(
		identity: PeerIdentity,
		settings: DiscoverySettings,
	) -> Result<(Discovery, mpsc::UnboundedReceiver<DiscoveryEvent>), DiscoveryError> {
		let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, settings.port);
		let socket = UdpSocket::bind(bind_addr)
			.await
			.map_err(|e| DiscoveryError::Bind { port: settings.port, source: e })?;

		socket
			.join_multicast_v4(settings.group, Ipv4Addr::UNSPECIFIED)
			.map_err(|e| DiscoveryError::Multicast { group: settings.group.to_string(), source: e })?;
		socket
			.set_multicast_ttl_v4(1)
			.map_err(|e| DiscoveryError::Multicast { group: settings.group.to_string(), source: e })?;

		let local_addr = socket.local_addr().map_err(DiscoveryError::Receive)?;
		info!("Discovery listening on {} (group {})", local_addr, settings.group);

		let (tx, rx) = mpsc::unbounded_channel();
		let _ = tx.send(DiscoveryEvent::Ready { peer_id: identity.peer_id.clone() });

		let task = tokio::spawn(run(socket, identity, settings, tx));
		Ok((Discovery { local_addr, task }, rx))
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn stop(self) {
		info!("Discovery stopped");
	}
}

impl Drop for Discovery {
	fn drop(&mut self) {
		self.task.abort();
	}
}

async fn run(
	socket: UdpSocket,
	identity: PeerIdentity,
	settings: DiscoverySettings,
	tx: mpsc::UnboundedSender<DiscoveryEvent>,
) {
	let target = SocketAddrV4::new(settings.group, settings.port);
	let mut ticker = tokio::time::interval(settings.interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	let mut buf = vec![0u8; MAX_DATAGRAM];

	loop {
		let event = tokio::select! {
			_ = ticker.tick() => {
				let payload = match serde_json::to_vec(&Announce::new(&identity, settings.http_port)) {
					Ok(p) => p,
					Err(e) => {
						error!("Cannot encode announce: {}", e);
						continue;
					}
				};
				match socket.send_to(&payload, target).await {
					Ok(_) => {
						debug!("Announced {} on {}", identity.peer_id, target);
						continue;
					}
					Err(e) => {
						warn!("Announce failed: {}", e);
						DiscoveryEvent::Error(DiscoveryError::Send(e))
					}
				}
			}
			res = socket.recv_from(&mut buf) => match res {
				Ok((n, source)) => {
					match parse_announce(&buf[..n], source.ip(), &identity.peer_id, util::now_millis()) {
						Some(peer) => DiscoveryEvent::PeerSeen(peer),
						None => continue,
					}
				}
				Err(e) => {
					warn!("Discovery receive failed: {}", e);
					DiscoveryEvent::Error(DiscoveryError::Receive(e))
				}
			}
		};

		if tx.send(event).is_err() {
			debug!("Discovery consumer gone, stopping");
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn source() -> IpAddr {
		IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
	}

	#[test]
	fn test_parse_announce() {
		let raw = br#"{"type":"ANNOUNCE","peerId":"p2","name":"laptop","port":3001,"timeStamp":1}"#;
		let peer = parse_announce(raw, source(), "p1", 42).unwrap();
		assert_eq!(peer.id, "p2");
		assert_eq!(peer.display_name, "laptop");
		assert_eq!(peer.address, "192.168.1.20");
		assert_eq!(peer.port, 3001);
		assert_eq!(peer.last_seen, 42);
	}

	#[test]
	fn test_own_and_foreign_messages_are_dropped() {
		let own = br#"{"type":"ANNOUNCE","peerId":"p1","name":"me","port":3000,"timeStamp":1}"#;
		assert!(parse_announce(own, source(), "p1", 0).is_none());

		let other_type = br#"{"type":"HELLO","peerId":"p2","name":"x","port":3000}"#;
		assert!(parse_announce(other_type, source(), "p1", 0).is_none());

		assert!(parse_announce(b"not json", source(), "p1", 0).is_none());
	}

	#[test]
	fn test_announce_wire_shape() {
		let identity = PeerIdentity {
			peer_id: "p1".into(),
			display_name: "desk".into(),
			created_at: "2024-01-01T00:00:00Z".into(),
		};
		let json = serde_json::to_value(Announce::new(&identity, 3000)).unwrap();
		assert_eq!(json["type"], "ANNOUNCE");
		assert_eq!(json["peerId"], "p1");
		assert_eq!(json["port"], 3000);
		assert!(json["timeStamp"].as_u64().unwrap() > 0);
	}
}

// vim: ts=4

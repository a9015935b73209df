//! # peersync - LAN peer-to-peer file synchronization
//!
//! Each node watches a local directory, indexes what appears there in a
//! content-addressed catalog, discovers other nodes on the LAN through UDP
//! multicast and pushes new local items to every live peer over HTTP.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use peersync::{Config, Node};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::start(Config::with_data_dir("/srv/peersync")).await?;
//!     tokio::signal::ctrl_c().await?;
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod logging;
pub mod node;
pub mod store;
pub mod transfer;
pub mod types;
pub mod util;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogEvent};
pub use config::Config;
pub use engine::{SyncEngine, SyncEvent};
pub use error::{CatalogError, DiscoveryError, StoreError, SyncError, TransferError};
pub use node::Node;
pub use types::{DataPackage, DirEntry, FileEntry, Origin, PeerInfo};

// vim: ts=4

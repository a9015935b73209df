use clap::{value_parser, Arg, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;

use peersync::config::Config;
use peersync::engine::PeerSyncStore;
use peersync::logging::{self, *};
use peersync::store::{CatalogStore, JsonCatalogStore};
use peersync::{identity, Node};

///////////////////////
// Command handlers  //
///////////////////////

async fn run(mut config: Config, matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
	if let Some(port) = matches.get_one::<u16>("http-port") {
		config.http_port = *port;
	}
	if let Some(port) = matches.get_one::<u16>("discovery-port") {
		config.discovery_port = *port;
	}

	let node = Node::start(config).await?;
	info!(
		"Node {} serving on {}, watching {}",
		node.identity().peer_id,
		node.http_addr(),
		node.catalog().root().display()
	);

	tokio::signal::ctrl_c().await?;
	info!("Interrupted, shutting down");
	node.shutdown().await;
	Ok(())
}

async fn list(config: &Config) -> Result<(), Box<dyn Error>> {
	let entries = JsonCatalogStore::in_dir(&config.json_dir()).load().await?;
	println!("{}", serde_json::to_string_pretty(&entries)?);
	Ok(())
}

async fn peers(config: &Config) -> Result<(), Box<dyn Error>> {
	let file = PeerSyncStore::new(config.sync_file()).load().await;
	if file.peers.is_empty() {
		eprintln!("No peers recorded yet");
	}
	for peer in file.peers.values() {
		println!(
			"{}\t{}\t{}:{}\ttoSend={} toDelete={} toRequest={}",
			peer.id,
			peer.display_name,
			peer.last_address,
			peer.port,
			peer.queue.to_send.len(),
			peer.queue.to_delete.len(),
			peer.queue.to_request.len()
		);
	}
	Ok(())
}

async fn show_identity(config: &Config) -> Result<(), Box<dyn Error>> {
	let identity = identity::load_or_create(&config.identity_file()).await?;
	println!("{}", serde_json::to_string_pretty(&identity)?);
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("peersync")
		.version(env!("CARGO_PKG_VERSION"))
		.author("Szilard Hajba <szilu@symbion.hu>")
		.about("LAN peer-to-peer file sync agent")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.global(true)
				.help("Config file (TOML, or JSON5 with a .json/.json5 extension)"),
		)
		.arg(
			Arg::new("data-dir")
				.short('d')
				.long("data-dir")
				.value_name("DIR")
				.global(true)
				.help("Node state directory (default ~/.peersync)"),
		)
		.subcommand(
			Command::new("run")
				.about("Run the node until interrupted")
				.arg(
					Arg::new("http-port")
						.long("http-port")
						.value_name("PORT")
						.value_parser(value_parser!(u16)),
				)
				.arg(
					Arg::new("discovery-port")
						.long("discovery-port")
						.value_name("PORT")
						.value_parser(value_parser!(u16)),
				),
		)
		.subcommand(Command::new("list").about("Print the persisted catalog"))
		.subcommand(Command::new("peers").about("Print known peers and their queues"))
		.subcommand(Command::new("identity").about("Print the local identity, creating it if needed"))
		.get_matches();

	let config_file = matches.get_one::<String>("config").map(PathBuf::from);
	let data_dir = matches.get_one::<String>("data-dir").map(PathBuf::from);
	let config = Config::load(config_file.as_deref(), data_dir.as_deref())?;
	logging::init_tracing(&config.log_level);

	match matches.subcommand() {
		Some(("run", sub)) => run(config, sub).await,
		Some(("list", _)) => list(&config).await,
		Some(("peers", _)) => peers(&config).await,
		Some(("identity", _)) => show_identity(&config).await,
		_ => Err("unknown command".into()),
	}
}

// vim: ts=4

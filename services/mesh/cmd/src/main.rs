//! meshtalk node binary.
//!
//! Runs one chat node over the UDP mesh with a line-oriented console on
//! stdin/stdout. Logs go to stderr.

use clap::Parser;
use meshtalk_chat::{ChatApp, ChatHistory, ContactDirectory, MessageRouter, NodeIdentity};
use meshtalk_storage::{Storage, StorageMode};
use meshtalk_transport::UdpMesh;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

mod config;
mod console;
mod logging;

use config::{parse_address, parse_peer, MeshTalkConfig, PeerConfig};
use console::{Console, ParseError};

/// Store-and-forward chat node
#[derive(Parser, Debug)]
#[command(name = "meshtalk", version, about = "Store-and-forward chat over a mesh")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "meshtalk.yaml")]
    config: PathBuf,

    /// Display name (truncated to 10 bytes on the wire)
    #[arg(long)]
    name: Option<String>,

    /// Mesh address, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_address)]
    address: Option<u16>,

    /// UDP listen address, e.g. 0.0.0.0:7000
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Peer as address=host:port, e.g. 0x0002=127.0.0.1:7002 (repeatable)
    #[arg(long, value_parser = parse_peer)]
    peer: Vec<PeerConfig>,

    /// Persist contacts to this file instead of memory
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Periodic self-announcement, e.g. 60s
    #[arg(long)]
    announce_interval: Option<humantime::Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Command-line flags win over file and environment settings
    fn apply_to(&self, config: &mut MeshTalkConfig) {
        if let Some(name) = &self.name {
            config.node.name = name.clone();
        }
        if let Some(address) = self.address {
            config.node.address = address;
        }
        if let Some(listen) = self.listen {
            config.transport.listen = listen;
        }
        for peer in &self.peer {
            config.transport.peers.retain(|p| p.address != peer.address);
            config.transport.peers.push(peer.clone());
        }
        if let Some(path) = &self.storage_path {
            config.storage = StorageMode::File { path: path.clone() };
        }
        if let Some(interval) = &self.announce_interval {
            config.chat.announce_interval = Some(**interval);
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logging needs the resolved level, so load problems are reported after init
    let (mut config, load_error) = match MeshTalkConfig::load_from_file(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (MeshTalkConfig::from_env()?, Some(e)),
    };
    args.apply_to(&mut config);
    logging::init(&config.log_level)?;

    component_info!("main", "Starting meshtalk v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = load_error {
        component_warn!("main", "{:#}, using defaults", e);
    } else if !args.config.exists() {
        component_warn!("main", "Config file {:?} not found, using defaults", args.config);
    } else {
        component_info!("main", "Loaded configuration from {:?}", args.config);
    }
    config.validate()?;
    component_info!(
        "main",
        "Node {} at 0x{:04X}, listen {}, {} peers, storage {:?}",
        config.node.name,
        config.node.address,
        config.transport.listen,
        config.transport.peers.len(),
        config.storage
    );

    let storage = match Storage::from_mode(config.storage.clone()).await {
        Ok(storage) => storage,
        Err(e) => {
            component_warn!(
                "storage",
                "Failed to open {:?} [{}]: {}; contacts will not persist",
                config.storage,
                e.error_code(),
                e
            );
            Storage::from_mode(StorageMode::InMemory).await?
        }
    };

    let identity = Arc::new(NodeIdentity::new(
        config.node.name.as_str(),
        config.node.address,
    ));
    if !identity.is_provisioned() {
        component_warn!("main", "Node is not provisioned; use /provision <address>");
    }

    let directory = ContactDirectory::new(config.chat.max_contacts)
        .with_mirror(storage.contact_mirror())
        .with_lock_timeout(config.chat.lock_timeout);
    match directory.load_from_mirror().await {
        Ok(n) => component_info!("storage", "Restored {} contacts", n),
        Err(e) => component_warn!("storage", "Could not restore contacts: {}", e),
    }
    let history = ChatHistory::new(config.chat.max_contacts, config.chat.history_depth)
        .with_lock_timeout(config.chat.lock_timeout);

    let (udp, inbound) = UdpMesh::bind(config.udp_mesh_config()).await?;
    let udp = Arc::new(udp);
    let router = Arc::new(MessageRouter::new(udp.clone()));
    let pump = router.spawn_inbound(inbound);

    let app = Arc::new(
        ChatApp::new(
            identity.clone(),
            Arc::new(directory),
            Arc::new(history),
            router,
        )
        .await,
    );
    app.register_message_callback(|from, text| {
        println!("<{}> {}", from, text);
    })
    .await;

    component_info!(
        "main",
        "Node {} at 0x{:04X} ready on {}",
        identity.name(),
        identity.address(),
        udp.local_addr()?
    );

    let announcer = config.chat.announce_interval.map(|interval| {
        let app = app.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = app.broadcast_self_announce().await {
                    component_warn!("announce", "Self-announce failed: {}", e);
                }
            }
        })
    });

    run_console(Console::new(app.clone(), udp), config.chat.poll_interval).await;

    component_info!("main", "Shutting down");
    if let Some(announcer) = announcer {
        announcer.abort();
    }
    pump.abort();

    let stats = app.stats();
    component_info!(
        "main",
        "Frames in={} accepted={} out={}",
        stats.frames_in,
        stats.frames_accepted,
        stats.frames_out
    );
    Ok(())
}

/// Read commands from stdin until /quit, end of input or Ctrl-C
async fn run_console(mut console: Console, poll_interval: Duration) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    println!("meshtalk ready, /help for commands");
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match console::parse(&line) {
                    Ok(command) => {
                        if !console.execute(command).await {
                            break;
                        }
                    }
                    Err(ParseError::Empty) => {}
                    Err(e) => println!("! {}", e),
                },
                Ok(None) => {
                    component_info!("ui", "End of input");
                    break;
                }
                Err(e) => {
                    component_error!("ui", "Failed to read stdin: {}", e);
                    break;
                }
            },
            _ = poll.tick() => {
                if let Err(e) = console.refresh().await {
                    component_debug!("ui", "Refresh skipped: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                component_info!("main", "Received Ctrl-C");
                break;
            }
        }
    }
}

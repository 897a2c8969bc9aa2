use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use log::{debug, error, info, warn};

use p2p_manager::config::{Config, ConfigError};
use p2p_manager::init_logger;
use p2p_manager::network::{EventType, HostSpec, ManagerError, ManagerEvent, PeerManager};

#[derive(Debug, StructOpt)]
#[structopt(name = "p2p-manager", about = "Keeps a population of Bitcoin-family peers connected")]
struct Opt {
    /// Configuration file
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file and exit
    #[structopt(long, parse(from_os_str))]
    generate: Option<PathBuf>,

    /// Listen and default peer port
    #[structopt(long)]
    port: Option<u16>,

    /// Network magic, decimal or 0x-prefixed hex
    #[structopt(long)]
    magic: Option<String>,

    /// Minimum active peers
    #[structopt(long)]
    min_peers: Option<usize>,

    /// Maximum active peers
    #[structopt(long)]
    max_peers: Option<usize>,

    /// Do not accept inbound connections
    #[structopt(long)]
    no_listen: bool,

    /// Seed peers, as `host` or `host:port`
    seeds: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("signal handling failed: {0}")]
    Signal(#[from] std::io::Error),
}

/// `host`, `host:port` or `[v6addr]:port`
fn parse_seed(seed: &str) -> HostSpec {
    if let Some(rest) = seed.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once("]:") {
            if let Ok(port) = port.parse() {
                return HostSpec::HostPort(host.to_string(), port);
            }
        }
        return HostSpec::Host(rest.trim_end_matches(']').to_string());
    }

    match seed.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => HostSpec::HostPort(host.to_string(), port),
            Err(_) => HostSpec::Host(seed.to_string()),
        },
        _ => HostSpec::Host(seed.to_string()),
    }
}

fn load_config(opt: &Opt) -> Result<Config, CliError> {
    let mut config = match &opt.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(port) = opt.port {
        config.network.port = port;
    }
    if let Some(magic) = &opt.magic {
        config.set_magic(magic)?;
    }
    if let Some(min_peers) = opt.min_peers {
        config.network.min_peers = min_peers;
    }
    if let Some(max_peers) = opt.max_peers {
        config.network.max_peers = max_peers;
    }
    if opt.no_listen {
        config.network.listen = false;
    }
    config.network = config.network.normalize();

    Ok(config)
}

async fn wait_drained(manager: &PeerManager) {
    loop {
        match manager.active_peer_count().await {
            Ok(0) | Err(_) => return,
            Ok(active) => debug!("Waiting for {} peers to close", active),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn run(opt: Opt) -> Result<(), CliError> {
    let config = load_config(&opt)?;

    if let Some(path) = &opt.generate {
        config.save(path)?;
        info!("Wrote configuration to {:?}", path);
        return Ok(());
    }

    let mut seeds = config.seed_hosts();
    seeds.extend(opt.seeds.iter().map(|seed| parse_seed(seed)));

    let manager = PeerManager::new(config.network.clone());
    let mut events = manager.subscribe(EventType::All).await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ManagerEvent::Message(message) => {
                    info!("{}: {} {}", message.addr, message.command, hex::encode(&message.data));
                }
                ManagerEvent::Status { num_active, pool_size } => {
                    info!("{} active peers, {} waiting in pool", num_active, pool_size);
                }
                ManagerEvent::Error(notice) => debug!("[{}] {}", notice.severity, notice.message),
                ManagerEvent::PeerConnect(_, addr) => info!("Connected to {}", addr),
                ManagerEvent::PeerEnd(_, addr) => info!("{} hung up", addr),
                ManagerEvent::PeerError(_, addr, error) => warn!("{} failed: {}", addr, error),
                ManagerEvent::ListenConnect(_, addr) => info!("Inbound connection from {}", addr),
            }
        }
    });

    let seeds = if seeds.is_empty() { None } else { Some(seeds) };
    if let Some(addr) = manager.launch(seeds).await? {
        info!("Accepting peers on {}", addr);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, press Ctrl-C again to exit immediately");
    manager.shutdown().await?;

    tokio::select! {
        _ = wait_drained(&manager) => info!("All peers closed"),
        _ = tokio::signal::ctrl_c() => warn!("Exiting with peers still open"),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_logger();

    let opt = Opt::from_args();
    if let Err(e) = run(opt).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

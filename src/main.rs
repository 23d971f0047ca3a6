//! CampusCash (CCASH) consensus node
//!
//! Runs the consensus parameter engine behind the masternode payment
//! gossip protocol.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use ccash_core::constants::CHAIN_FULL_NAME;
use ccash_core::masternode::InMemoryRegistry;
use ccash_core::node::{
    create_genesis_header, init_logging, ConsensusEngine, GenesisInfo, Network, NodeConfig, NodeService,
};
use ccash_core::storage::HeaderChain;

#[derive(Parser, Debug)]
#[command(name = "ccash-node", version, about = "CampusCash consensus parameter node")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Follow the test network
    #[arg(long, conflicts_with = "regtest")]
    testnet: bool,

    /// Follow the regression test network
    #[arg(long)]
    regtest: bool,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Default log level (RUST_LOG overrides)
    #[arg(long)]
    log_level: Option<String>,

    /// Reset difficulty at this tip height (live test fork)
    #[arg(long)]
    live_fork_height: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut NodeConfig) {
        if self.testnet {
            config.network = Network::Testnet;
        }
        if self.regtest {
            config.network = Network::Regtest;
        }
        if let Some(listen) = self.listen {
            config.listen = Some(listen);
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if self.live_fork_height.is_some() {
            config.live_fork_height = self.live_fork_height;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    cli.apply(&mut config);
    init_logging(&config.log_level)?;

    let params = config.chain_params()?;
    let genesis_info = GenesisInfo::new(&params);
    info!(
        chain = CHAIN_FULL_NAME,
        network = ?params.network,
        genesis = %genesis_info.hash,
        bits = format_args!("{:08x}", genesis_info.bits),
        "Starting node"
    );

    let genesis = create_genesis_header(&params);
    let chain = HeaderChain::new(genesis);
    let listen = config.listen_addr(&params);
    let engine = ConsensusEngine::new(params, InMemoryRegistry::new(), genesis_info.hash);

    if let Some(key) = config.payments_private_key()? {
        if let Err(e) = engine.payments().set_private_key(key) {
            warn!(error = %e, "Masternode payments signing disabled");
        }
    }

    let service = NodeService::new(engine, chain);
    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "Listening for peers");

    let maintenance = service.clone();
    let interval = Duration::from_secs(config.cleanup_interval_secs.max(1));

    tokio::select! {
        result = service.serve(listener) => {
            result?;
        }
        _ = maintenance.run_maintenance(interval) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping node");
        }
    }

    Ok(())
}

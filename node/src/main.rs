mod args;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use args::Args;
use guardian_engine::casper::NullCasperClient;
use guardian_engine::network::{Message, NetworkHandle, PeerId};
use guardian_engine::staterecomp::IdentityTransition;
use guardian_engine::txtracker::NullTxOutcomeReader;
use guardian_engine::GuardianEngine;
use structopt::StructOpt;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Logs every outbound message instead of delivering it. Peer transport is
/// out of scope for this node (message framing and peer selection belong
/// to whatever deployment wires a real one in); this keeps the engine
/// runnable standalone, the same role [`NullCasperClient`] and
/// [`IdentityTransition`] play for their own external collaborators.
#[derive(Default)]
struct LoggingNetwork;

impl NetworkHandle for LoggingNetwork {
    fn broadcast(&self, msg: &Message) {
        log::debug!("broadcast: {msg:?}");
    }

    fn direct_send(&self, to: &PeerId, msg: &Message) {
        log::debug!("direct send to {}: {:?}", hex::encode(&to.0), msg);
    }

    fn send_to_one(&self, msg: &Message) {
        log::debug!("send to one: {msg:?}");
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs()
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env("RUST_LOG")
        .parse_filters("guardian_node=debug,guardian_engine=debug,warn")
        .init();

    let opt = Args::from_args();
    log::info!("guardian-node v{VERSION} initializing...");

    let backend = opt.backend()?;
    let signer = opt.signer()?;
    let my_address = opt.my_address(signer.as_ref())?;
    let genesis_state_root = opt.genesis_state_root()?;
    let induction_height = opt.induction_height();
    let config = opt.config(signer)?;

    let mut engine = GuardianEngine::new(
        backend,
        my_address,
        genesis_state_root,
        induction_height,
        config,
        std::sync::Arc::new(NullCasperClient),
        std::sync::Arc::new(LoggingNetwork),
        std::sync::Arc::new(IdentityTransition),
        std::sync::Arc::new(NullTxOutcomeReader),
    )
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    log::info!("guardian address {}", hex::encode(my_address.0));

    let interval = Duration::from_secs(opt.tick_interval_secs());
    loop {
        if let Err(e) = engine.tick(now_secs()) {
            if e.is_fatal() {
                log::error!("fatal invariant violation, shutting down: {e}");
                std::process::exit(1);
            }
            log::warn!("tick failed, will retry next round: {e}");
        }
        std::thread::sleep(interval);
    }
}

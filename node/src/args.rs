use std::convert::TryInto;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use guardian_engine::config::ProtocolConstants;
use guardian_engine::crypto::{Ed25519Signer, GuardianSigner, HashVal, SecKey};
use guardian_engine::GuardianConfig;
use guardian_persistence::{DbBackend, SledBackend};
use serde::Deserialize;
use structopt::StructOpt;
use tap::Tap;

#[derive(Debug, StructOpt)]
#[structopt(about = "A probabilistic-betting guardian node")]
pub struct Args {
    /// Database path.
    #[structopt(long, default_value = "/var/guardian-node/")]
    database: PathBuf,

    /// Hex-encoded 32-byte ed25519 secret key this guardian signs with. If
    /// omitted, a fresh key is generated and this node only observes.
    #[structopt(long)]
    signing_secret: Option<String>,

    /// Hex-encoded address this guardian's deposit is registered under. If
    /// omitted, derived from the signing key's public key.
    #[structopt(long)]
    my_address: Option<String>,

    /// Hex-encoded genesis state root.
    #[structopt(long, default_value = "0000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000")]
    genesis_state_root: String,

    /// Height at which this guardian's bet/block induction begins.
    #[structopt(long, default_value = "0")]
    induction_height: u64,

    /// Finalization convergence rate in `(0, 1]`; closer to 1 bets more
    /// aggressively toward 0/1.
    #[structopt(long, default_value = "0.92")]
    bravery: f64,

    /// Lower bound on the gas price of transactions relayed or included.
    #[structopt(long, default_value = "1000000000")]
    min_gas_price: u128,

    /// Target block height at which to submit a join transaction.
    #[structopt(long)]
    join_at_block: Option<u64>,

    /// Hex-encoded validation code submitted with `join`. Required if
    /// `--join-at-block` is set.
    #[structopt(long)]
    validation_code: Option<String>,

    /// Deposit size, in wei, required before submitting `join`.
    #[structopt(long, default_value = "0")]
    required_deposit: u128,

    /// Interval, in seconds, between scheduling rounds.
    #[structopt(long, default_value = "5")]
    tick_interval_secs: u64,

    /// Path to a YAML file overriding the default protocol constants
    /// (enter/exit delay, validator rounds, block time, gas limit, ...).
    #[structopt(long)]
    override_constants: Option<PathBuf>,
}

/// YAML-deserializable mirror of [`ProtocolConstants`], so a deployment can
/// override any subset without recompiling.
#[derive(Debug, Deserialize)]
struct ConstantsOverride {
    enter_exit_delay: Option<u64>,
    validator_rounds: Option<u64>,
    blktime_secs: Option<u64>,
    genesis_time: Option<u64>,
    max_recalc: Option<u64>,
    max_long_recalc: Option<u64>,
    gaslimit: Option<u128>,
}

fn parse_hash(s: &str) -> anyhow::Result<HashVal> {
    let bytes = hex::decode(s).context("hex decode failed")?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected exactly 32 bytes"))?;
    Ok(HashVal(arr))
}

impl Args {
    pub fn tick_interval_secs(&self) -> u64 {
        self.tick_interval_secs
    }

    pub fn genesis_state_root(&self) -> anyhow::Result<HashVal> {
        parse_hash(&self.genesis_state_root)
    }

    pub fn induction_height(&self) -> u64 {
        self.induction_height
    }

    /// Builds this node's signing collaborator. A fresh key is generated
    /// (and logged, so it can be copied into `--signing-secret` for the
    /// next run) when none was supplied.
    pub fn signer(&self) -> anyhow::Result<Arc<dyn GuardianSigner>> {
        let seckey = match &self.signing_secret {
            Some(hexed) => {
                let bytes = hex::decode(hexed).context("cannot decode signing secret")?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("signing secret must be 32 bytes"))?;
                SecKey(arr)
            }
            None => {
                let mut raw = [0u8; 32];
                for byte in raw.iter_mut() {
                    *byte = fastrand::u8(..);
                }
                log::warn!(
                    "no --signing-secret given, generated ephemeral key {}",
                    hex::encode(raw)
                );
                SecKey(raw)
            }
        };
        Ok(Arc::new(Ed25519Signer::new(seckey)))
    }

    /// This guardian's on-chain address. Falls back to the signer's own
    /// public key when not separately configured — the common case for a
    /// guardian whose validation code is just "check my own signature".
    pub fn my_address(&self, signer: &dyn GuardianSigner) -> anyhow::Result<HashVal> {
        match &self.my_address {
            Some(hexed) => parse_hash(hexed),
            None => Ok(guardian_engine::crypto::hash_single(signer.public_key().0)),
        }
    }

    pub fn constants(&self) -> anyhow::Result<ProtocolConstants> {
        let mut constants = ProtocolConstants::default();
        if let Some(path) = &self.override_constants {
            let contents = std::fs::read(path).context("cannot read constants override")?;
            let over: ConstantsOverride =
                serde_yaml::from_slice(&contents).context("error while parsing constants override")?;
            if let Some(v) = over.enter_exit_delay {
                constants.enter_exit_delay = v;
            }
            if let Some(v) = over.validator_rounds {
                constants.validator_rounds = v;
            }
            if let Some(v) = over.blktime_secs {
                constants.blktime_secs = v;
            }
            if let Some(v) = over.genesis_time {
                constants.genesis_time = v;
            }
            if let Some(v) = over.max_recalc {
                constants.max_recalc = v;
            }
            if let Some(v) = over.max_long_recalc {
                constants.max_long_recalc = v;
            }
            if let Some(v) = over.gaslimit {
                constants.gaslimit = v;
            }
        }
        Ok(constants)
    }

    pub fn config(&self, signer: Arc<dyn GuardianSigner>) -> anyhow::Result<GuardianConfig> {
        let mut config = GuardianConfig::new(signer);
        config.bravery = self.bravery;
        config.min_gas_price = self.min_gas_price;
        config.join_at_block = self.join_at_block;
        config.required_deposit = self.required_deposit;
        config.validation_code = match &self.validation_code {
            Some(hexed) => hex::decode(hexed).context("cannot decode validation code")?,
            None => Vec::new(),
        };
        config.constants = self.constants()?;
        config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(config)
    }

    /// Opens (creating if necessary) the durable, `sled`-backed store this
    /// node persists its chain/bet/proposer state in.
    pub fn backend(&self) -> anyhow::Result<Arc<dyn DbBackend>> {
        std::fs::create_dir_all(&self.database)
            .with_context(|| format!("cannot create database dir {:?}", self.database))?;
        let db_path = self.database.clone().tap_mut(|p| p.push("guardian.sled"));
        let db = sled::open(&db_path).with_context(|| format!("cannot open sled db at {db_path:?}"))?;
        let tree = db.open_tree("guardian").context("cannot open guardian tree")?;
        Ok(Arc::new(SledBackend::new(tree)))
    }
}

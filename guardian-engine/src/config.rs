use std::sync::Arc;

use crate::crypto::GuardianSigner;

/// Protocol constants governing guardian-set settling, round-robin betting
/// cadence, and target slot duration, exposed as an immutable configuration
/// object rather than compile-time globals.
#[derive(Clone, Copy, Debug)]
pub struct ProtocolConstants {
    pub enter_exit_delay: u64,
    pub validator_rounds: u64,
    pub blktime_secs: u64,
    pub genesis_time: u64,
    pub max_recalc: u64,
    pub max_long_recalc: u64,
    pub gaslimit: u128,
}

impl Default for ProtocolConstants {
    fn default() -> Self {
        Self {
            enter_exit_delay: 100,
            validator_rounds: 7,
            blktime_secs: 5,
            genesis_time: 0,
            max_recalc: 9,
            max_long_recalc: 14,
            gaslimit: 4_712_388,
        }
    }
}

/// Options accepted at construction.
pub struct GuardianConfig {
    /// This guardian's signing collaborator.
    pub signer: Arc<dyn GuardianSigner>,
    /// Test-only: skews this node's local clock.
    pub clockwrong: bool,
    /// Finalization convergence rate, in `(0, 1]`.
    pub bravery: f64,
    /// Test-only: makes random bets instead of following the strategy.
    pub crazy_bet: bool,
    /// Test-only: height at which to self-slash via a double block.
    pub double_block_suicide: u64,
    /// Test-only: sequence number at which to self-slash via a double bet.
    pub double_bet_suicide: u64,
    /// Lower bound on the gas price of transactions this node will relay.
    pub min_gas_price: u128,
    /// Target block height at which to submit a `join` transaction.
    pub join_at_block: Option<u64>,
    /// This node's validation code, submitted with `join` once it is
    /// eligible. Empty until a node intends to become a guardian.
    pub validation_code: Vec<u8>,
    /// Deposit size required to join, checked against this node's own
    /// balance before submitting `join`.
    pub required_deposit: u128,
    pub constants: ProtocolConstants,
}

impl GuardianConfig {
    pub fn new(signer: Arc<dyn GuardianSigner>) -> Self {
        Self {
            signer,
            clockwrong: false,
            bravery: 0.92,
            crazy_bet: false,
            double_block_suicide: u64::MAX,
            double_bet_suicide: u64::MAX,
            min_gas_price: 1_000_000_000,
            join_at_block: None,
            validation_code: Vec::new(),
            required_deposit: 0,
            constants: ProtocolConstants::default(),
        }
    }

    pub fn validate(&self) -> Result<(), crate::error::EngineError> {
        if !(self.bravery > 0.0 && self.bravery <= 1.0) {
            return Err(crate::error::EngineError::InvalidConfig(
                "bravery must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }
}

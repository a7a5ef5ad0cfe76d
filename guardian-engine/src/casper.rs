//! The on-chain Casper contract is an external collaborator: this engine
//! never encodes ABI calls itself, it calls through this trait and trusts
//! the answers. Uses the same injection pattern as
//! [`crate::crypto::GuardianSigner`], separating "what the protocol needs
//! to know" from "how that's fetched".

use crate::crypto::HashVal;
use crate::error::EngineError;

/// A guardian's on-chain signup record, as read from the Casper contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardianSignup {
    pub index: u32,
    pub address: HashVal,
    pub validation_code: Vec<u8>,
    pub induction_height: u64,
    pub deposit: u128,
}

/// Read/write access to the Casper contract, at a given state root. Kept as
/// a trait so the engine can run against a real EVM state (via a
/// [`crate::staterecomp::StateTransition`] implementor) or a scripted test
/// double with no contract at all.
pub trait CasperClient: Send + Sync + 'static {
    /// Total number of guardians the contract has ever registered, used to
    /// detect new signups (`getGuardianSignups`).
    fn guardian_signups(&self, stateroot: HashVal) -> Result<u64, EngineError>;

    /// The next free guardian slot index (`getNextGuardianIndex`).
    fn next_guardian_index(&self, stateroot: HashVal) -> Result<u32, EngineError>;

    /// Looks up one guardian's signup record by index. `None` if the slot
    /// is unfilled.
    fn guardian_signup(
        &self,
        stateroot: HashVal,
        index: u32,
    ) -> Result<Option<GuardianSignup>, EngineError>;

    /// A monotonically increasing counter used to detect first-sight of a
    /// given signup (`getGuardianCounter`).
    fn guardian_counter(&self, stateroot: HashVal, index: u32) -> Result<u64, EngineError>;

    /// Current deposit size for a guardian, re-queried periodically as
    /// finalization advances (`getGuardianDeposit`).
    fn guardian_deposit(&self, stateroot: HashVal, index: u32) -> Result<u128, EngineError>;

    /// The sequence number the contract has recorded as the guardian's
    /// latest accepted bet (`getGuardianSeq`), used when building a block
    /// to decide which buffered bets still need including.
    fn guardian_seq(&self, stateroot: HashVal, index: u32) -> Result<u64, EngineError>;

    /// The guardian index assigned to propose at `height`, derived from
    /// the round-robin schedule committed to `stateroot`
    /// (`get_guardian_index`).
    fn guardian_index_for_height(&self, stateroot: HashVal, height: u64) -> Result<u32, EngineError>;

    /// An address's ether balance at `stateroot`, used only by the
    /// pre-induction bootstrap flow to decide whether this node has
    /// enough of a deposit to join.
    fn address_balance(&self, stateroot: HashVal, address: HashVal) -> Result<u128, EngineError>;
}

/// A fixed-answer stand-in, for engines running with no live chain behind
/// them (unit tests, or a node that only tracks bets/blocks without ever
/// producing transactions).
#[derive(Default)]
pub struct NullCasperClient;

impl CasperClient for NullCasperClient {
    fn guardian_signups(&self, _stateroot: HashVal) -> Result<u64, EngineError> {
        Ok(0)
    }

    fn next_guardian_index(&self, _stateroot: HashVal) -> Result<u32, EngineError> {
        Ok(0)
    }

    fn guardian_signup(
        &self,
        _stateroot: HashVal,
        _index: u32,
    ) -> Result<Option<GuardianSignup>, EngineError> {
        Ok(None)
    }

    fn guardian_counter(&self, _stateroot: HashVal, _index: u32) -> Result<u64, EngineError> {
        Ok(0)
    }

    fn guardian_deposit(&self, _stateroot: HashVal, _index: u32) -> Result<u128, EngineError> {
        Ok(0)
    }

    fn guardian_seq(&self, _stateroot: HashVal, _index: u32) -> Result<u64, EngineError> {
        Ok(0)
    }

    fn guardian_index_for_height(&self, _stateroot: HashVal, _height: u64) -> Result<u32, EngineError> {
        Ok(0)
    }

    fn address_balance(&self, _stateroot: HashVal, _address: HashVal) -> Result<u128, EngineError> {
        Ok(0)
    }
}

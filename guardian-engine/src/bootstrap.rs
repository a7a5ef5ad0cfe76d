//! The pre-induction join flow and the post-withdrawal deposit-reclaim
//! helper. Neither is part of the core betting algorithm (§4.1-§4.11 of
//! the betting strategy proper): a node that isn't yet a guardian has no
//! opinions to aggregate and no bets to emit, but it still needs to get
//! itself inducted, and a former guardian still needs a way to build the
//! transaction that reclaims its deposit.

use crate::casper::CasperClient;
use crate::chainstore::Transaction;
use crate::crypto::{hash_single, HashVal};
use crate::error::EngineError;
use crate::network::{Message, NetworkHandle};

const JOIN_TX_GAS: u64 = 300_000;
const WITHDRAW_TX_GAS: u64 = 200_000;

/// Builds the `join(validation_code)` transaction. No Casper ABI encoding
/// is in scope (the contract is an excluded external collaborator), so
/// this only needs to be a stable payload the node can hand to its own
/// transaction-submission path.
pub fn join_tx(validation_code: &[u8], deposit: u128) -> Transaction {
    let data = stdcode::serialize(&(validation_code.to_vec(), deposit)).expect("join payload always serializes");
    Transaction {
        hash: hash_single(&data),
        gas: JOIN_TX_GAS,
        gas_price: 0,
        data,
    }
}

/// Builds the `withdraw(former_index)` transaction a former guardian uses
/// to reclaim its deposit after withdrawing. Per the Open Question this
/// spec resolves (see DESIGN.md), this is intentionally **not**
/// broadcast anywhere in this crate — callers decide whether and when to
/// submit it.
pub fn finalize_withdrawal_tx(former_index: u32) -> Transaction {
    let data = stdcode::serialize(&former_index).expect("u32 always serializes");
    Transaction {
        hash: hash_single(&data),
        gas: WITHDRAW_TX_GAS,
        gas_price: 0,
        data,
    }
}

/// Tracks the state of a not-yet-inducted node working through the join
/// sequence: wait for a sufficient deposit balance (requesting it from a
/// peer via `FAUCET` if short), then submit `join` once `join_at_block`
/// is reached.
#[derive(Default)]
pub struct BootstrapState {
    pub joined_at_block: Option<u64>,
    last_faucet_request: Option<u64>,
}

const FAUCET_RETRY_SECS: u64 = 30;

#[allow(clippy::too_many_arguments)]
pub fn tick_bootstrap(
    state: &mut BootstrapState,
    my_address: HashVal,
    validation_code: &[u8],
    required_deposit: u128,
    join_at_block: Option<u64>,
    current_height: u64,
    stateroot: HashVal,
    now: u64,
    casper: &dyn CasperClient,
    network: &dyn NetworkHandle,
) -> Result<Option<Transaction>, EngineError> {
    if state.joined_at_block.is_some() {
        return Ok(None);
    }
    let Some(target) = join_at_block else { return Ok(None) };

    let balance = casper.address_balance(stateroot, my_address)?;
    if balance < required_deposit {
        let last = state.last_faucet_request.unwrap_or(0);
        if now > last + FAUCET_RETRY_SECS {
            network.send_to_one(&Message::Faucet { to: my_address, amount: required_deposit });
            state.last_faucet_request = Some(now);
        }
        return Ok(None);
    }

    if current_height < target {
        return Ok(None);
    }

    state.joined_at_block = Some(current_height);
    Ok(Some(join_tx(validation_code, required_deposit)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::RecordingNetwork;

    struct FixedBalance(u128);
    impl CasperClient for FixedBalance {
        fn guardian_signups(&self, _s: HashVal) -> Result<u64, EngineError> {
            Ok(0)
        }
        fn next_guardian_index(&self, _s: HashVal) -> Result<u32, EngineError> {
            Ok(0)
        }
        fn guardian_signup(&self, _s: HashVal, _i: u32) -> Result<Option<crate::casper::GuardianSignup>, EngineError> {
            Ok(None)
        }
        fn guardian_counter(&self, _s: HashVal, _i: u32) -> Result<u64, EngineError> {
            Ok(0)
        }
        fn guardian_deposit(&self, _s: HashVal, _i: u32) -> Result<u128, EngineError> {
            Ok(0)
        }
        fn guardian_seq(&self, _s: HashVal, _i: u32) -> Result<u64, EngineError> {
            Ok(0)
        }
        fn guardian_index_for_height(&self, _s: HashVal, _h: u64) -> Result<u32, EngineError> {
            Ok(0)
        }
        fn address_balance(&self, _s: HashVal, _a: HashVal) -> Result<u128, EngineError> {
            Ok(self.0)
        }
    }

    #[test]
    fn requests_faucet_when_balance_is_short() {
        let mut state = BootstrapState::default();
        let network = RecordingNetwork::default();
        let out = tick_bootstrap(
            &mut state,
            HashVal::ZERO,
            b"code",
            1000,
            Some(10),
            0,
            HashVal::ZERO,
            100,
            &FixedBalance(0),
            &network,
        )
        .unwrap();
        assert!(out.is_none());
        assert_eq!(network.direct_sends.lock().len(), 1);
        assert!(state.joined_at_block.is_none());
    }

    #[test]
    fn joins_once_funded_and_at_target_height() {
        let mut state = BootstrapState::default();
        let network = RecordingNetwork::default();
        let out = tick_bootstrap(
            &mut state,
            HashVal::ZERO,
            b"code",
            1000,
            Some(10),
            10,
            HashVal::ZERO,
            100,
            &FixedBalance(1000),
            &network,
        )
        .unwrap();
        assert!(out.is_some());
        assert_eq!(state.joined_at_block, Some(10));
    }

    #[test]
    fn waits_for_target_height_even_if_funded() {
        let mut state = BootstrapState::default();
        let network = RecordingNetwork::default();
        let out = tick_bootstrap(
            &mut state,
            HashVal::ZERO,
            b"code",
            1000,
            Some(10),
            5,
            HashVal::ZERO,
            100,
            &FixedBalance(1000),
            &network,
        )
        .unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn finalize_withdrawal_tx_is_built_but_this_module_never_broadcasts_it() {
        let tx = finalize_withdrawal_tx(3);
        assert!(tx.gas > 0);
    }
}

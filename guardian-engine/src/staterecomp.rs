//! Incremental chain settlement via state-root recomputation. Running the
//! EVM over a block is an external collaborator — this module owns only
//! the *policy* of how far to recompute and in what order, delegating the
//! actual state transition to [`StateTransition`].

use crate::chainstore::{Block, ChainStore};
use crate::crypto::HashVal;
use crate::error::EngineError;

/// The state-transition function this engine runs against. An
/// implementor executes one block (or, if `block` is `None`, an
/// empty/skip transition for a height with no accepted block) starting
/// from `prior_root` and returns the resulting root.
pub trait StateTransition: Send + Sync + 'static {
    fn apply(&self, prior_root: HashVal, block: Option<&Block>) -> Result<HashVal, EngineError>;
}

/// A transition function that always returns the prior root unchanged —
/// useful for engines that track consensus only and never execute
/// transactions.
#[derive(Default)]
pub struct IdentityTransition;

impl StateTransition for IdentityTransition {
    fn apply(&self, prior_root: HashVal, _block: Option<&Block>) -> Result<HashVal, EngineError> {
        Ok(prior_root)
    }
}

/// Recomputes state roots for a bounded run of heights starting at
/// `calc_state_roots_from`, with a near-term/long-term recompute budget
/// split: a short `max_recalc` burst when close to the tip, a longer
/// `max_long_recalc` burst once far enough behind that a bigger batch is
/// worth it.
pub fn recalc_state_roots(
    store: &ChainStore,
    transition: &dyn StateTransition,
    max_recalc: u64,
    max_long_recalc: u64,
) -> Result<(), EngineError> {
    let frm = store.calc_state_roots_from()?;
    let total = store.len()?;

    let recalc_limit = if (frm as i64) > (total as i64) - 20 {
        max_recalc
    } else {
        max_long_recalc
    };

    let mut run_root = store.stateroot_at(frm as i64 - 1)?;
    let end = (frm + recalc_limit).min(total);
    for h in frm..end {
        let prob = store.probs.get(h as i64)?.unwrap_or_default();
        let block = store.blocks.get(h as i64)?;
        let block_ref = if prob.as_f64() >= 0.5 { block.as_ref() } else { None };
        run_root = transition.apply(run_root, block_ref)?;
        store.stateroots.set(h as i64, Some(run_root))?;
    }
    for h in end..total {
        store.stateroots.set(h as i64, Some(HashVal::ZERO))?;
    }
    store.set_calc_state_roots_from(end)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::prob::Prob;
    use guardian_persistence::InMemoryBackend;

    fn block(n: u64) -> Block {
        Block {
            number: n,
            hash: HashVal([n as u8 + 1; 32]),
            prevhash: HashVal::ZERO,
            proposer_index: 0,
            transactions: vec![],
            sig: crate::crypto::Signature(vec![]),
        }
    }

    #[test]
    fn recalc_advances_calc_from_and_fills_roots() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        for n in 0..5u64 {
            store.receive_block(block(n)).unwrap();
            store.probs.set(n as i64, Some(Prob::from_f64(0.9))).unwrap();
        }
        recalc_state_roots(&store, &IdentityTransition, 9, 14).unwrap();
        assert_eq!(store.calc_state_roots_from().unwrap(), 5);
        for n in 0..5 {
            assert!(store.stateroots.get(n).unwrap().is_some());
        }
    }

    #[test]
    fn recalc_picks_long_budget_when_far_behind() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        for n in 0..30u64 {
            store.receive_block(block(n)).unwrap();
        }
        recalc_state_roots(&store, &IdentityTransition, 9, 14).unwrap();
        assert_eq!(store.calc_state_roots_from().unwrap(), 14);
    }
}

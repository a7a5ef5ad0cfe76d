//! Pending/unconfirmed/finalized transaction indices, advanced purely by
//! the probability a containing block is itself finalized.

use std::collections::HashMap;

use crate::chainstore::{ChainStore, Transaction};
use crate::crypto::HashVal;
use crate::error::EngineError;
use crate::prob::{Prob, FINALITY_HIGH};

/// Where in a block a transaction was seen: block number, block hash, and
/// its position within the block's transaction groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxPosition {
    pub block_number: u64,
    pub block_hash: HashVal,
    pub group_index: usize,
    pub tx_index: usize,
}

/// Outcome of running a transaction against the block's computed state,
/// in place of the excluded EVM log-decoding this engine never performs
/// itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxOutcome {
    /// Not included in this block (e.g. ran out of gas) — retry elsewhere.
    NotIncluded,
    /// Included but the transaction itself reverted.
    IncludedFailed,
    /// Included and succeeded.
    IncludedSucceeded,
}

/// Supplies the one piece of information the sweep needs from execution:
/// what actually happened to a transaction at a given position. An
/// external collaborator, same footing as [`crate::staterecomp::StateTransition`].
pub trait TxOutcomeReader: Send + Sync + 'static {
    fn outcome_at(&self, position: &TxPosition) -> Result<TxOutcome, EngineError>;
}

/// A stand-in for nodes running with no EVM behind them: every position
/// reports as not-yet-included, so the sweep keeps retrying rather than
/// ever wrongly declaring success or failure.
#[derive(Default)]
pub struct NullTxOutcomeReader;

impl TxOutcomeReader for NullTxOutcomeReader {
    fn outcome_at(&self, _position: &TxPosition) -> Result<TxOutcome, EngineError> {
        Ok(TxOutcome::NotIncluded)
    }
}

pub struct TransactionTracker {
    pub txpool: HashMap<HashVal, Transaction>,
    pub unconfirmed: HashMap<HashVal, Vec<TxPosition>>,
    pub finalized: HashMap<HashVal, TxOutcome>,
    pub exceptions: HashMap<HashVal, u32>,
    pub tracked: Vec<HashVal>,
}

const STRIKE_LIMIT: u32 = 10;

impl Default for TransactionTracker {
    fn default() -> Self {
        Self {
            txpool: HashMap::new(),
            unconfirmed: HashMap::new(),
            finalized: HashMap::new(),
            exceptions: HashMap::new(),
            tracked: Vec::new(),
        }
    }
}

impl TransactionTracker {
    pub fn add_transaction(&mut self, tx: Transaction, track: bool) {
        if track {
            self.tracked.push(tx.hash);
        }
        self.txpool.insert(tx.hash, tx);
    }

    pub fn index_block_transactions(&mut self, block_number: u64, block_hash: HashVal, transactions: &[Transaction]) {
        for (group_index, tx) in transactions.iter().enumerate() {
            if self.finalized.contains_key(&tx.hash) {
                continue;
            }
            self.unconfirmed
                .entry(tx.hash)
                .or_default()
                .push(TxPosition {
                    block_number,
                    block_hash,
                    group_index,
                    tx_index: 0,
                });
        }
    }

    /// Advances every unconfirmed transaction's positions according to the
    /// probability the containing block is finalized.
    pub fn sweep(&mut self, store: &ChainStore, outcomes: &dyn TxOutcomeReader) -> Result<(), EngineError> {
        let mut drained = Vec::new();
        for (hash, positions) in self.unconfirmed.iter_mut() {
            let mut i = 0;
            while i < positions.len() {
                let pos = positions[i].clone();
                let root = store.stateroots.get(pos.block_number as i64)?.unwrap_or(HashVal::ZERO);
                if root.is_zero() {
                    i += 1;
                    continue;
                }
                let p: Prob = store
                    .probs
                    .get(pos.block_number as i64)?
                    .unwrap_or_default();
                let pf = p.as_f64();

                if pf > 0.95 {
                    let outcome = outcomes.outcome_at(&pos)?;
                    match outcome {
                        TxOutcome::IncludedSucceeded if pf > FINALITY_HIGH => {
                            self.finalized.insert(*hash, outcome);
                            self.txpool.remove(hash);
                            positions.remove(i);
                        }
                        TxOutcome::IncludedFailed => {
                            let strikes = self.exceptions.entry(*hash).or_insert(0);
                            *strikes += 1;
                            if *strikes >= STRIKE_LIMIT {
                                self.txpool.remove(hash);
                            }
                            positions.remove(i);
                        }
                        TxOutcome::NotIncluded => {
                            positions.remove(i);
                        }
                        TxOutcome::IncludedSucceeded => {
                            i += 1;
                        }
                    }
                } else if pf < 0.05 {
                    positions.remove(i);
                } else {
                    i += 1;
                }
            }
            if positions.is_empty() {
                drained.push(*hash);
            }
        }
        for hash in drained {
            self.unconfirmed.remove(&hash);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::chainstore::Block;
    use guardian_persistence::InMemoryBackend;

    struct FixedOutcome(TxOutcome);
    impl TxOutcomeReader for FixedOutcome {
        fn outcome_at(&self, _p: &TxPosition) -> Result<TxOutcome, EngineError> {
            Ok(self.0)
        }
    }

    fn store_with_block(prob: f64, stateroot_present: bool) -> ChainStore {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        store
            .receive_block(Block {
                number: 0,
                hash: HashVal([1; 32]),
                prevhash: HashVal::ZERO,
                proposer_index: 0,
                transactions: vec![],
                sig: crate::crypto::Signature(vec![]),
            })
            .unwrap();
        store.probs.set(0, Some(Prob::from_f64(prob))).unwrap();
        if stateroot_present {
            store.stateroots.set(0, Some(HashVal([2; 32]))).unwrap();
        }
        store
    }

    #[test]
    fn finalizes_when_probability_crosses_threshold() {
        let mut tracker = TransactionTracker::default();
        let hash = HashVal([9; 32]);
        tracker.txpool.insert(hash, Transaction { hash, gas: 0, gas_price: 0, data: vec![] });
        tracker.unconfirmed.insert(
            hash,
            vec![TxPosition { block_number: 0, block_hash: HashVal([1; 32]), group_index: 0, tx_index: 0 }],
        );
        let store = store_with_block(0.99999, true);
        tracker.sweep(&store, &FixedOutcome(TxOutcome::IncludedSucceeded)).unwrap();
        assert!(tracker.finalized.contains_key(&hash));
        assert!(!tracker.txpool.contains_key(&hash));
        assert!(!tracker.unconfirmed.contains_key(&hash));
    }

    #[test]
    fn skips_positions_with_no_stateroot_yet() {
        let mut tracker = TransactionTracker::default();
        let hash = HashVal([9; 32]);
        tracker.unconfirmed.insert(
            hash,
            vec![TxPosition { block_number: 0, block_hash: HashVal([1; 32]), group_index: 0, tx_index: 0 }],
        );
        let store = store_with_block(0.99999, false);
        tracker.sweep(&store, &FixedOutcome(TxOutcome::IncludedSucceeded)).unwrap();
        assert!(tracker.unconfirmed.contains_key(&hash));
    }
}

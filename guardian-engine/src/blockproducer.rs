//! Block assembly: transaction selection, bundling buffered bets into
//! Casper `submitBet` transactions, and self-signing the resulting block.

use fastrand::Rng;

use crate::casper::CasperClient;
use crate::chainstore::{Block, ChainStore, Transaction};
use crate::crypto::{GuardianSigner, HashVal};
use crate::error::EngineError;
use crate::network::{Message, NetworkHandle};
use crate::registry::GuardianRegistry;
use crate::txtracker::TransactionTracker;

const GAS_PER_PROB_BYTE: u64 = 6600;
const GAS_PER_HASH: u64 = 10000;
const BET_TX_BASE_GAS: u64 = 200_000;

fn bet_tx_gas(bet: &crate::bet::Bet) -> u64 {
    BET_TX_BASE_GAS
        + GAS_PER_PROB_BYTE * bet.probs.len() as u64
        + GAS_PER_HASH * (bet.blockhashes.len() + bet.stateroots.len()) as u64
}

/// Builds, signs, broadcasts and locally applies a new block at
/// `next_height`, running the transaction selection and buffered-bet
/// inclusion steps. `double_block_suicide` is a test-only byzantine
/// trigger: at or past that height, a second conflicting block is built
/// and broadcast to deliberately invite self-slashing.
#[allow(clippy::too_many_arguments)]
pub fn make_block(
    store: &ChainStore,
    registry: &mut GuardianRegistry,
    tracker: &mut TransactionTracker,
    casper: &dyn CasperClient,
    signer: &dyn GuardianSigner,
    network: &dyn NetworkHandle,
    next_height: u64,
    gaslimit: u64,
    double_block_suicide: u64,
) -> Result<Block, EngineError> {
    let mut gas_remaining = gaslimit;
    let mut txs = Vec::new();

    for (hash, tx) in tracker.txpool.iter() {
        if tracker.unconfirmed.contains_key(hash) || tracker.finalized.contains_key(hash) {
            continue;
        }
        if tx.gas > gas_remaining {
            continue;
        }
        gas_remaining -= tx.gas;
        txs.push(tx.clone());
    }

    let mut h = 0u64;
    let len = store.len()?;
    while h < len {
        let root = store.stateroots.get(h as i64)?.unwrap_or(HashVal::ZERO);
        if root.is_zero() {
            break;
        }
        h += 1;
    }
    let latest_state_root = if h > 0 {
        store.stateroots.get(h as i64 - 1)?.unwrap_or(HashVal::ZERO)
    } else {
        store.genesis_state_root
    };

    let mut indices: Vec<u32> = registry.opinions.keys().copied().collect();
    let rng = Rng::new();
    shuffle(&mut indices, &rng);

    for i in indices {
        let latest_seq = casper.guardian_seq(latest_state_root, i)?;
        let mut bet_height = latest_seq;
        let bets = registry.bets.get(&i).cloned().unwrap_or_default();
        while let Some(bet) = bets.get(&bet_height) {
            let gas = bet_tx_gas(bet);
            if gas > gas_remaining {
                break;
            }
            let tx = Transaction {
                hash: crate::crypto::hash_single(bet.serialize()),
                gas,
                gas_price: 0,
                data: bet.serialize(),
            };
            if bet.is_withdrawal() {
                tracker.tracked.push(tx.hash);
            }
            gas_remaining -= gas;
            txs.push(tx);
            bet_height += 1;
        }
        let opinion_seq = registry.opinions.get(&i).map(|o| o.seq).unwrap_or(0);
        if opinion_seq < latest_seq {
            network.broadcast(&Message::BetRequest { index: i, from_seq: opinion_seq + 1 });
        }
    }

    let prevhash = store
        .blocks
        .get(next_height as i64 - 1)
        .ok()
        .flatten()
        .map(|b| b.hash)
        .unwrap_or(HashVal::ZERO);
    let proposer_index = registry.my_index.unwrap_or(0);

    let block = Block {
        number: next_height,
        hash: HashVal::ZERO,
        prevhash,
        proposer_index,
        transactions: txs,
        sig: crate::crypto::Signature(vec![]),
    };
    let signed = sign_block(block, signer);
    network.broadcast(&Message::Block(signed.clone()));
    store.receive_block(signed.clone())?;

    if next_height >= double_block_suicide {
        log::warn!("byzantine test mode: producing a double block at height {}", next_height);
        let mut benign_txs = signed.transactions.clone();
        benign_txs.push(Transaction {
            hash: crate::crypto::hash_single(format!("double-block-{next_height}").into_bytes()),
            gas: 0,
            gas_price: 0,
            data: vec![],
        });
        let second = Block {
            number: next_height,
            hash: HashVal::ZERO,
            prevhash,
            proposer_index,
            transactions: benign_txs,
            sig: crate::crypto::Signature(vec![]),
        };
        let signed_second = sign_block(second, signer);
        network.broadcast(&Message::Block(signed_second));
    }

    Ok(signed)
}

/// Hashes the block's unsigned fields and signs over that hash, so the
/// signature covers the content hash rather than the raw bytes.
fn sign_block(mut block: Block, signer: &dyn GuardianSigner) -> Block {
    let unsigned = Block { hash: HashVal::ZERO, sig: crate::crypto::Signature(vec![]), ..block.clone() };
    let bytes = stdcode::serialize(&unsigned).expect("block always serializes");
    block.hash = crate::crypto::hash_single(&bytes);
    block.sig = signer.sign(&bytes);
    block
}

fn shuffle(items: &mut [u32], rng: &Rng) {
    for i in (1..items.len()).rev() {
        let j = rng.usize(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::casper::GuardianSignup;
    use crate::crypto::{Ed25519Signer, SecKey};
    use crate::network::RecordingNetwork;
    use guardian_persistence::InMemoryBackend;

    struct ZeroCasper;
    impl CasperClient for ZeroCasper {
        fn guardian_signups(&self, _s: HashVal) -> Result<u64, EngineError> {
            Ok(0)
        }
        fn next_guardian_index(&self, _s: HashVal) -> Result<u32, EngineError> {
            Ok(0)
        }
        fn guardian_signup(&self, _s: HashVal, _i: u32) -> Result<Option<GuardianSignup>, EngineError> {
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
            Ok(0)
        }
    }

    #[test]
    fn assembles_and_applies_an_empty_block() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let signer = Ed25519Signer::new(SecKey([4; 32]));
        let network = RecordingNetwork::default();

        let block = make_block(&store, &mut registry, &mut tracker, &ZeroCasper, &signer, &network, 0, 4_712_388, u64::MAX).unwrap();
        assert_eq!(block.number, 0);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(network.broadcasts.lock().len(), 1);
    }

    #[test]
    fn double_block_suicide_broadcasts_a_second_conflicting_block() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let signer = Ed25519Signer::new(SecKey([4; 32]));
        let network = RecordingNetwork::default();

        make_block(&store, &mut registry, &mut tracker, &ZeroCasper, &signer, &network, 0, 4_712_388, 0).unwrap();
        assert_eq!(network.broadcasts.lock().len(), 2);
    }
}

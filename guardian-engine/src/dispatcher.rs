//! Consumes typed network messages and fans them out to the chain store,
//! guardian registry or transaction tracker.

use crate::casper::CasperClient;
use crate::chainstore::{ChainStore, Transaction};
use crate::crypto::HashVal;
use crate::error::EngineError;
use crate::network::{Message, NetworkHandle, PeerId};
use crate::registry::GuardianRegistry;
use crate::txtracker::TransactionTracker;

const FAUCET_TX_GAS: u64 = 21_000;

/// A plain value transfer of `amount` to `to`. No contract ABI for this
/// call is in scope (the EVM/Casper write path is an excluded external
/// collaborator), so this carries only the flat transfer gas cost, the
/// same minimal shape `slash_blocks_tx`/`slash_bets_tx` use for their own
/// out-of-scope calls.
fn faucet_tx(to: HashVal, amount: u128) -> Transaction {
    let data = stdcode::serialize(&(to, amount)).expect("faucet payload always serializes");
    Transaction {
        hash: crate::crypto::hash_single(&data),
        gas: FAUCET_TX_GAS,
        gas_price: 0,
        data,
    }
}

/// Admits or rejects a transaction for relaying/inclusion. Account-code
/// and gas-price checks run against the EVM — an excluded external
/// collaborator. The one check this engine still owns directly is the
/// local `min_gas_price` floor.
pub fn should_include_transaction(tx: &crate::chainstore::Transaction, min_gas_price: u128) -> bool {
    tx.gas_price >= min_gas_price
}

/// Dispatches one message, mutating engine state and issuing any reply
/// traffic through `network`. `sender` identifies who sent it, for
/// direct-send replies; recursion through `Message::List` reuses this
/// same function. `now` and `enter_exit_delay` drive the sync guard and
/// the bet-request rate limit.
#[allow(clippy::too_many_arguments)]
pub fn on_receive(
    msg: Message,
    sender: &PeerId,
    now: u64,
    enter_exit_delay: u64,
    store: &ChainStore,
    registry: &mut GuardianRegistry,
    tracker: &mut TransactionTracker,
    casper: &dyn CasperClient,
    network: &dyn NetworkHandle,
    min_gas_price: u128,
) -> Result<(), EngineError> {
    match msg {
        Message::Block(block) => {
            if store.is_too_far_ahead(block.number, enter_exit_delay)? {
                let last_asked = store.last_time_sent_getblocks()?;
                if now > last_asked + 5 {
                    let from_height = (store.max_finalized_height()?.max(-1) + 1) as u64;
                    network.broadcast(&Message::GetBlocks { from_height });
                    store.set_last_time_sent_getblocks(now)?;
                }
                return Ok(());
            }
            let block_hash = block.hash;
            let number = block.number;
            let txs = block.transactions.clone();
            let incoming = block.clone();
            match store.receive_block(block)? {
                Some(existing) => {
                    let tx = crate::chainstore::slash_blocks_tx(&existing, &incoming);
                    tracker.add_transaction(tx, true);
                }
                None => {
                    tracker.index_block_transactions(number, block_hash, &txs);
                    network.broadcast(&Message::Block(store.blocks.get(number as i64)?.unwrap()));
                }
            }
        }
        Message::Bet(bet) => {
            let index = bet.index;
            let (applied, slashing) = registry.receive_bet(bet.clone())?;
            network.broadcast(&Message::Bet(bet));
            if let Some(s) = slashing {
                let tx = crate::bet::slash_bets_tx(&s.first, &s.second);
                tracker.add_transaction(tx, true);
            }
            if applied == 0 && registry.should_ask_for_bets(index, now) {
                let from_seq = (*registry.highest_bet_processed.get(&index).unwrap_or(&-1) + 1) as u64;
                network.send_to_one(&Message::BetRequest { index, from_seq });
            }
        }
        Message::BetRequest { index, from_seq } => {
            let highest = *registry.highest_bet_processed.get(&index).unwrap_or(&-1);
            if let Some(chain) = registry.bets.get(&index) {
                if highest >= from_seq as i64 {
                    let bets: Vec<Message> = (from_seq..=highest as u64)
                        .filter_map(|seq| chain.get(&seq).cloned())
                        .map(Message::Bet)
                        .collect();
                    if !bets.is_empty() {
                        network.direct_send(sender, &Message::List(bets));
                    }
                }
            }
        }
        Message::Transaction(tx) => {
            if should_include_transaction(&tx, min_gas_price) {
                tracker.add_transaction(tx, false);
            }
        }
        Message::GetBlockByHeight(height) => {
            if let Some(block) = store.blocks.get(height as i64)? {
                network.direct_send(sender, &Message::Block(block));
            }
        }
        Message::GetBlockByHash(hash) => {
            let len = store.len()?;
            for h in 0..len {
                if let Some(block) = store.blocks.get(h as i64)? {
                    if block.hash == hash {
                        network.direct_send(sender, &Message::Block(block));
                        break;
                    }
                }
            }
        }
        Message::GetBlocks { from_height } => {
            let len = store.len()?;
            let end = (from_height + 30).min(len);
            let mut blocks = Vec::new();
            for h in from_height..end {
                if let Some(block) = store.blocks.get(h as i64)? {
                    blocks.push(Message::Block(block));
                }
            }
            network.direct_send(sender, &Message::List(blocks));
        }
        Message::List(messages) => {
            for m in messages {
                on_receive(
                    m,
                    sender,
                    now,
                    enter_exit_delay,
                    store,
                    registry,
                    tracker,
                    casper,
                    network,
                    min_gas_price,
                )?;
            }
        }
        Message::Faucet { to, amount } => {
            // Spec §4.10: service the request locally if this node's own
            // balance covers it twice over, otherwise forward it to a peer
            // who might.
            let stateroot = store.stateroot_at(store.calc_state_roots_from()? as i64 - 1)?;
            let my_balance = casper.address_balance(stateroot, registry.my_address())?;
            let needed = amount.checked_mul(2);
            if needed.map(|needed| my_balance >= needed).unwrap_or(false) {
                tracker.add_transaction(faucet_tx(to, amount), false);
            } else {
                network.send_to_one(&Message::Faucet { to, amount });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::casper::GuardianSignup;
    use crate::chainstore::Block;
    use crate::crypto::{HashVal, Signature};
    use crate::network::RecordingNetwork;
    use guardian_persistence::InMemoryBackend;

    struct NoopCasper;
    impl CasperClient for NoopCasper {
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

    /// Like [`NoopCasper`] but with a configurable own balance, for the
    /// faucet branch tests.
    struct FundedCasper(u128);
    impl CasperClient for FundedCasper {
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
            Ok(self.0)
        }
    }

    #[test]
    fn faucet_is_serviced_locally_when_balance_covers_it_twice_over() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let network = RecordingNetwork::default();
        let sender = PeerId(vec![1]);

        on_receive(
            Message::Faucet { to: HashVal([9; 32]), amount: 50 },
            &sender,
            1_000,
            100,
            &store,
            &mut registry,
            &mut tracker,
            &FundedCasper(100),
            &network,
            0,
        )
        .unwrap();

        assert_eq!(tracker.txpool.len(), 1);
        assert!(network.direct_sends.lock().is_empty());
    }

    #[test]
    fn faucet_is_forwarded_when_balance_is_insufficient() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let network = RecordingNetwork::default();
        let sender = PeerId(vec![1]);

        on_receive(
            Message::Faucet { to: HashVal([9; 32]), amount: 50 },
            &sender,
            1_000,
            100,
            &store,
            &mut registry,
            &mut tracker,
            &FundedCasper(99),
            &network,
            0,
        )
        .unwrap();

        assert!(tracker.txpool.is_empty());
        assert_eq!(network.direct_sends.lock().len(), 1);
    }

    #[test]
    fn block_message_gets_indexed_and_rebroadcast() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let network = RecordingNetwork::default();
        let sender = PeerId(vec![1]);

        let block = Block {
            number: 0,
            hash: HashVal([1; 32]),
            prevhash: HashVal::ZERO,
            proposer_index: 0,
            transactions: vec![],
            sig: Signature(vec![]),
        };
        on_receive(
            Message::Block(block),
            &sender,
            1_000,
            100,
            &store,
            &mut registry,
            &mut tracker,
            &NoopCasper,
            &network,
            0,
        )
        .unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(network.broadcasts.lock().len(), 1);
    }

    #[test]
    fn low_gas_price_transaction_is_rejected() {
        let tx = crate::chainstore::Transaction {
            hash: HashVal::ZERO,
            gas: 100,
            gas_price: 5,
            data: vec![],
        };
        assert!(!should_include_transaction(&tx, 10));
        assert!(should_include_transaction(&tx, 5));
    }

    #[test]
    fn double_block_message_yields_a_tracked_slash_tx() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let network = RecordingNetwork::default();
        let sender = PeerId(vec![1]);

        let first = Block {
            number: 0,
            hash: HashVal([1; 32]),
            prevhash: HashVal::ZERO,
            proposer_index: 0,
            transactions: vec![],
            sig: Signature(vec![]),
        };
        let second = Block { hash: HashVal([2; 32]), ..first.clone() };

        on_receive(Message::Block(first), &sender, 1_000, 100, &store, &mut registry, &mut tracker, &NoopCasper, &network, 0).unwrap();
        on_receive(Message::Block(second), &sender, 1_000, 100, &store, &mut registry, &mut tracker, &NoopCasper, &network, 0).unwrap();

        assert_eq!(tracker.tracked.len(), 1);
        assert_eq!(tracker.txpool.len(), 1);
    }

    #[test]
    fn block_far_ahead_of_recomputed_state_is_deferred() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        let mut tracker = TransactionTracker::default();
        let network = RecordingNetwork::default();
        let sender = PeerId(vec![1]);

        let far_block = Block {
            number: 500,
            hash: HashVal([1; 32]),
            prevhash: HashVal::ZERO,
            proposer_index: 0,
            transactions: vec![],
            sig: Signature(vec![]),
        };
        on_receive(Message::Block(far_block), &sender, 1_000, 100, &store, &mut registry, &mut tracker, &NoopCasper, &network, 0).unwrap();

        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(network.broadcasts.lock().len(), 1);
    }

    #[test]
    fn double_bet_message_yields_a_tracked_slash_tx() {
        use crate::bet::BetHeight;
        use crate::crypto::{Ed25519Signer, GuardianSigner, SecKey};

        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut registry = GuardianRegistry::new(HashVal::ZERO);
        registry.opinions.insert(0, crate::opinion::Opinion::new(vec![], 0, 0));
        registry.bets.insert(0, Default::default());
        registry.highest_bet_processed.insert(0, -1);
        let mut tracker = TransactionTracker::default();
        let network = RecordingNetwork::default();
        let sender = PeerId(vec![1]);

        let s = Ed25519Signer::new(SecKey([3; 32]));
        let first = crate::bet::Bet::sign(0, BetHeight::Height(0), vec![], vec![], vec![], vec![], HashVal::ZERO, 0, &s);
        let mut second = first.clone();
        second.prevhash = HashVal([9; 32]);
        second.sig = s.sign(b"different");

        on_receive(Message::Bet(first), &sender, 1_000, 100, &store, &mut registry, &mut tracker, &NoopCasper, &network, 0).unwrap();
        on_receive(Message::Bet(second), &sender, 1_000, 100, &store, &mut registry, &mut tracker, &NoopCasper, &network, 0).unwrap();

        assert_eq!(tracker.tracked.len(), 1);
    }
}

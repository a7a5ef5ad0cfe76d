//! Wires every component into one cooperatively-scheduled node.
//! All work happens inside `on_receive` or `tick`; neither suspends
//! mid-call, and nothing here spawns a thread or an async task — that
//! split is left entirely to the `node` binary's networking seam.

use std::sync::Arc;

use guardian_persistence::DbBackend;

use crate::betproducer::{mkbet, BetProducerState};
use crate::blockproducer::make_block;
use crate::bootstrap::{tick_bootstrap, BootstrapState};
use crate::casper::CasperClient;
use crate::chainstore::ChainStore;
use crate::config::GuardianConfig;
use crate::crypto::HashVal;
use crate::dispatcher::on_receive;
use crate::error::EngineError;
use crate::network::{Message, NetworkHandle, PeerId};
use crate::proposers::ProposerSchedule;
use crate::registry::GuardianRegistry;
use crate::staterecomp::{recalc_state_roots, StateTransition};
use crate::txtracker::{TransactionTracker, TxOutcomeReader};

pub struct GuardianEngine {
    pub store: ChainStore,
    pub registry: GuardianRegistry,
    pub proposers: ProposerSchedule,
    pub tracker: TransactionTracker,
    pub bet_state: BetProducerState,
    pub bootstrap_state: BootstrapState,
    pub config: GuardianConfig,
    casper: Arc<dyn CasperClient>,
    network: Arc<dyn NetworkHandle>,
    transition: Arc<dyn StateTransition>,
    tx_outcomes: Arc<dyn TxOutcomeReader>,
    backend: Arc<dyn DbBackend>,
    last_block_produced: Option<u64>,
}

impl GuardianEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn DbBackend>,
        my_address: HashVal,
        genesis_state_root: HashVal,
        induction_height: u64,
        config: GuardianConfig,
        casper: Arc<dyn CasperClient>,
        network: Arc<dyn NetworkHandle>,
        transition: Arc<dyn StateTransition>,
        tx_outcomes: Arc<dyn TxOutcomeReader>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            store: ChainStore::new(backend.clone(), genesis_state_root, induction_height),
            registry: GuardianRegistry::new(my_address),
            proposers: ProposerSchedule::new(backend.clone()),
            tracker: TransactionTracker::default(),
            bet_state: BetProducerState::default(),
            bootstrap_state: BootstrapState::default(),
            config,
            casper,
            network,
            transition,
            tx_outcomes,
            backend,
            last_block_produced: None,
        })
    }

    /// Routes one inbound network message. Per spec §4.3 step 10, a block
    /// whose height falls on this guardian's round-robin slot also kicks
    /// off a `mkbet` pass immediately, rather than waiting for the next
    /// periodic tick (`mkbet`'s own 2s rate limit still applies).
    pub fn on_receive(&mut self, msg: Message, sender: &PeerId, now: u64) -> Result<(), EngineError> {
        let block_round = match &msg {
            Message::Block(b) => Some(b.number),
            _ => None,
        };

        on_receive(
            msg,
            sender,
            now,
            self.config.constants.enter_exit_delay,
            &self.store,
            &mut self.registry,
            &mut self.tracker,
            self.casper.as_ref(),
            self.network.as_ref(),
            self.config.min_gas_price,
        )?;

        if let Some(number) = block_round {
            if let Some(my_index) = self.registry.my_index {
                let rounds = self.config.constants.validator_rounds.max(1);
                if (my_index as u64) % rounds == number % rounds {
                    mkbet(
                        &self.store,
                        &mut self.registry,
                        &mut self.bet_state,
                        &self.config,
                        self.casper.as_ref(),
                        self.transition.as_ref(),
                        self.network.as_ref(),
                        now,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Runs one scheduling round: produce a block
    /// if it's our turn and due, otherwise extend the proposer schedule;
    /// refresh the guardian set; sweep transactions; make a bet if the
    /// rate limit allows; flush storage.
    pub fn tick(&mut self, now: u64) -> Result<(), EngineError> {
        const BYZANTINE_CLOCK_SKEW_SECS: u64 = 3_600;
        let now = if self.config.clockwrong { now.saturating_add(BYZANTINE_CLOCK_SKEW_SECS) } else { now };

        let check_root = self.store.stateroot_at(self.store.calc_state_roots_from()? as i64 - 1)?;
        self.registry.update_guardian_set(self.casper.as_ref(), check_root)?;

        if self.registry.my_index.is_none() {
            if let Some(tx) = tick_bootstrap(
                &mut self.bootstrap_state,
                self.registry.my_address(),
                &self.config.validation_code,
                self.config.required_deposit,
                self.config.join_at_block,
                self.store.len()?,
                check_root,
                now,
                self.casper.as_ref(),
                self.network.as_ref(),
            )? {
                self.tracker.add_transaction(tx, false);
            }
        }

        match self.proposers.next_block_to_produce {
            Some(target_height) if self.registry.my_index.is_some() => {
                let target_time = self.config.constants.genesis_time
                    + self.config.constants.blktime_secs * target_height;
                if now >= target_time {
                    recalc_state_roots(
                        &self.store,
                        self.transition.as_ref(),
                        self.config.constants.max_recalc,
                        self.config.constants.max_long_recalc,
                    )?;
                    let signer = self.config.signer.as_ref();
                    make_block(
                        &self.store,
                        &mut self.registry,
                        &mut self.tracker,
                        self.casper.as_ref(),
                        signer,
                        self.network.as_ref(),
                        target_height,
                        self.config.constants.gaslimit as u64,
                        self.config.double_block_suicide,
                    )?;
                    self.last_block_produced = Some(target_height);
                    let max_finalized = self.store.max_finalized_height()?;
                    self.proposers.add_proposers(
                        &self.store,
                        self.casper.as_ref(),
                        max_finalized,
                        self.config.constants.enter_exit_delay,
                        self.registry.my_index,
                    )?;
                }
            }
            None => {
                let max_finalized = self.store.max_finalized_height()?;
                self.proposers.add_proposers(
                    &self.store,
                    self.casper.as_ref(),
                    max_finalized,
                    self.config.constants.enter_exit_delay,
                    self.registry.my_index,
                )?;
            }
            _ => {}
        }

        self.tracker.sweep(&self.store, self.tx_outcomes.as_ref())?;

        let bet_deadline = self.config.constants.blktime_secs * self.config.constants.validator_rounds * 3 / 2;
        if self.bet_state.last_bet_made + bet_deadline < now {
            mkbet(
                &self.store,
                &mut self.registry,
                &mut self.bet_state,
                &self.config,
                self.casper.as_ref(),
                self.transition.as_ref(),
                self.network.as_ref(),
                now,
            )?;
        }

        self.backend.flush().map_err(guardian_persistence::PersistError::from)?;
        Ok(())
    }

    pub fn last_block_produced(&self) -> Option<u64> {
        self.last_block_produced
    }
}

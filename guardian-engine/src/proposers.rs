//! Precomputes future block proposers as far ahead as the finalized chain
//! allows.

use guardian_persistence::{DbBackend, PersistentSeq, StdcodeCodec};
use std::sync::Arc;

use crate::casper::CasperClient;
use crate::chainstore::ChainStore;
use crate::error::EngineError;

pub struct ProposerSchedule {
    proposers: PersistentSeq<u32, StdcodeCodec>,
    pub next_block_to_produce: Option<u64>,
}

impl ProposerSchedule {
    pub fn new(backend: Arc<dyn DbBackend>) -> Self {
        Self {
            proposers: PersistentSeq::new(backend, "proposers", StdcodeCodec),
            next_block_to_produce: None,
        }
    }

    pub fn proposer_at(&self, height: u64) -> Result<Option<u32>, EngineError> {
        Ok(self.proposers.get(height as i64)?)
    }

    /// Extends the schedule up to `max_finalized_height + enter_exit_delay
    /// - 1`, using the finalized state as of the latest settled root, and
    /// records the next height (if any) at which `my_index` is due to
    /// propose.
    pub fn add_proposers(
        &mut self,
        store: &ChainStore,
        casper: &dyn CasperClient,
        max_finalized_height: i64,
        enter_exit_delay: u64,
        my_index: Option<u32>,
    ) -> Result<(), EngineError> {
        let settled_root = latest_settled_root(store)?;
        let max_h = (max_finalized_height + enter_exit_delay as i64 - 1).max(-1);
        let mut h = self.proposers.len()?;
        self.next_block_to_produce = None;
        while (h as i64) < max_h {
            let proposer = casper.guardian_index_for_height(settled_root, h)?;
            self.proposers.append(Some(proposer))?;
            if Some(proposer) == my_index {
                self.next_block_to_produce = Some(h);
                return Ok(());
            }
            h += 1;
        }
        Ok(())
    }
}

fn latest_settled_root(store: &ChainStore) -> Result<crate::crypto::HashVal, EngineError> {
    let mut h = store.finalized_hashes.len()? as i64 - 1;
    while h >= 0 {
        let root = store.stateroots.get(h)?;
        match root {
            Some(r) if !r.is_zero() => return Ok(r),
            _ => h -= 1,
        }
    }
    Ok(store.genesis_state_root)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::HashVal;
    use guardian_persistence::InMemoryBackend;

    struct FixedProposer;
    impl CasperClient for FixedProposer {
        fn guardian_signups(&self, _s: HashVal) -> Result<u64, EngineError> {
            Ok(0)
        }
        fn next_guardian_index(&self, _s: HashVal) -> Result<u32, EngineError> {
            Ok(0)
        }
        fn guardian_signup(
            &self,
            _s: HashVal,
            _i: u32,
        ) -> Result<Option<crate::casper::GuardianSignup>, EngineError> {
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
        fn guardian_index_for_height(&self, _s: HashVal, height: u64) -> Result<u32, EngineError> {
            Ok((height % 3) as u32)
        }
        fn address_balance(&self, _s: HashVal, _a: HashVal) -> Result<u128, EngineError> {
            Ok(0)
        }
    }

    #[test]
    fn schedules_up_to_finalized_plus_delay_and_finds_own_slot() {
        let store = ChainStore::new(Arc::new(InMemoryBackend::default()), HashVal::ZERO, 0);
        let mut sched = ProposerSchedule::new(Arc::new(InMemoryBackend::default()));
        sched
            .add_proposers(&store, &FixedProposer, -1, 5, Some(1))
            .unwrap();
        assert_eq!(sched.proposer_at(0).unwrap(), Some(0));
        assert_eq!(sched.proposer_at(1).unwrap(), Some(1));
        assert_eq!(sched.next_block_to_produce, Some(1));
    }
}

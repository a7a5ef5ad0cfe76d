//! Tracks the live guardian set and the bet chain received from each
//! guardian. Opinions are rebuilt purely from replayed bets, so unlike
//! [`crate::chainstore::ChainStore`] this lives in memory only — losing
//! it on restart costs nothing but a resync.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::bet::Bet;
use crate::casper::CasperClient;
use crate::crypto::HashVal;
use crate::error::EngineError;
use crate::opinion::Opinion;

pub struct GuardianRegistry {
    pub opinions: HashMap<u32, Opinion>,
    /// All bets received per guardian, keyed by sequence number, so gaps
    /// can be detected and filled by request.
    pub bets: HashMap<u32, BTreeMap<u64, Bet>>,
    pub highest_bet_processed: HashMap<u32, i64>,
    seen_counters: HashSet<u64>,
    seen_bet_hashes: HashSet<HashVal>,
    /// Last wall-clock time a `BET_REQUEST` was sent for a given guardian,
    /// so a guardian with a persistent gap isn't re-asked every message.
    last_asked_for_bets: HashMap<u32, u64>,
    pub my_index: Option<u32>,
    my_address: HashVal,
}

const BET_REQUEST_RATE_LIMIT_SECS: u64 = 10;

/// A double-bet or double-block sighting the engine reports upward so the
/// dispatcher can build a `slashBets`/`slashBlocks` Casper transaction.
#[derive(Debug)]
pub struct SlashableDoubleBet {
    pub index: u32,
    pub first: Bet,
    pub second: Bet,
}

impl GuardianRegistry {
    pub fn new(my_address: HashVal) -> Self {
        Self {
            opinions: HashMap::new(),
            bets: HashMap::new(),
            highest_bet_processed: HashMap::new(),
            seen_counters: HashSet::new(),
            seen_bet_hashes: HashSet::new(),
            last_asked_for_bets: HashMap::new(),
            my_index: None,
            my_address,
        }
    }

    pub fn my_address(&self) -> HashVal {
        self.my_address
    }

    /// Whether it's time to re-send a `BET_REQUEST` for `index`, and
    /// records that we just did if so.
    pub fn should_ask_for_bets(&mut self, index: u32, now: u64) -> bool {
        let last = self.last_asked_for_bets.get(&index).copied().unwrap_or(0);
        if now > last + BET_REQUEST_RATE_LIMIT_SECS {
            self.last_asked_for_bets.insert(index, now);
            true
        } else {
            false
        }
    }

    /// Polls the Casper contract for newly-signed-up guardians and adds
    /// them to the tracked set. Detects whether one of the new slots is
    /// this node's own address.
    pub fn update_guardian_set(
        &mut self,
        casper: &dyn CasperClient,
        check_stateroot: HashVal,
    ) -> Result<(), EngineError> {
        let count = casper.next_guardian_index(check_stateroot)?;
        for i in 0..count {
            let counter = casper.guardian_counter(check_stateroot, i)?;
            if self.seen_counters.contains(&counter) {
                continue;
            }
            self.seen_counters.insert(counter);
            let signup = match casper.guardian_signup(check_stateroot, i)? {
                Some(s) => s,
                None => continue,
            };
            let mut opinion = Opinion::new(signup.validation_code.clone(), i, signup.induction_height);
            opinion.deposit_size = signup.deposit;
            log::info!("guardian {} inducted at height {}", i, signup.induction_height);
            self.opinions.insert(i, opinion);
            self.bets.insert(i, BTreeMap::new());
            self.highest_bet_processed.insert(i, -1);

            if signup.address == self.my_address {
                self.my_index = Some(i);
                log::info!("this node has been inducted as guardian {}", i);
            }
        }
        Ok(())
    }

    /// Folds a newly-received bet into the tracked chain for its guardian,
    /// then replays any now-contiguous run of bets into that guardian's
    /// opinion. Returns a slashing report if this bet collides with an
    /// already-recorded sequence number, and the count of bets that were
    /// actually applied (zero means a gap — the caller should request the
    /// missing range).
    pub fn receive_bet(&mut self, bet: Bet) -> Result<(usize, Option<SlashableDoubleBet>), EngineError> {
        let bet_hash = bet.hash();
        if self.seen_bet_hashes.contains(&bet_hash) || !self.opinions.contains_key(&bet.index) {
            return Ok((0, None));
        }
        self.seen_bet_hashes.insert(bet_hash);

        let index = bet.index;
        let slashing = {
            let chain = self.bets.entry(index).or_default();
            let collision = chain.get(&bet.seq).cloned();
            chain.insert(bet.seq, bet.clone());
            collision.map(|existing| SlashableDoubleBet {
                index,
                first: existing,
                second: bet.clone(),
            })
        };
        if slashing.is_some() {
            log::warn!("caught a double bet from guardian {}", index);
        }

        let mut applied = 0usize;
        loop {
            let next_seq = (*self.highest_bet_processed.get(&index).unwrap_or(&-1) + 1) as u64;
            let next_bet = match self.bets.get(&index).and_then(|c| c.get(&next_seq)).cloned() {
                Some(b) => b,
                None => break,
            };
            let opinion = self
                .opinions
                .get_mut(&index)
                .ok_or_else(|| EngineError::Invariant("bet for unknown guardian".into()))?;
            opinion.process_bet(&next_bet)?;
            *self.highest_bet_processed.get_mut(&index).unwrap() = next_seq as i64;
            applied += 1;
        }
        Ok((applied, slashing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bet::BetHeight;
    use crate::casper::GuardianSignup;
    use crate::crypto::{Ed25519Signer, GuardianSigner, SecKey};

    struct FakeCasper {
        signups: Vec<GuardianSignup>,
    }

    impl CasperClient for FakeCasper {
        fn guardian_signups(&self, _s: HashVal) -> Result<u64, EngineError> {
            Ok(self.signups.len() as u64)
        }
        fn next_guardian_index(&self, _s: HashVal) -> Result<u32, EngineError> {
            Ok(self.signups.len() as u32)
        }
        fn guardian_signup(&self, _s: HashVal, i: u32) -> Result<Option<GuardianSignup>, EngineError> {
            Ok(self.signups.get(i as usize).cloned())
        }
        fn guardian_counter(&self, _s: HashVal, i: u32) -> Result<u64, EngineError> {
            Ok(i as u64)
        }
        fn guardian_deposit(&self, _s: HashVal, i: u32) -> Result<u128, EngineError> {
            Ok(self.signups[i as usize].deposit)
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
    fn update_guardian_set_inducts_new_signups() {
        let mut reg = GuardianRegistry::new(HashVal([7; 32]));
        let casper = FakeCasper {
            signups: vec![GuardianSignup {
                index: 0,
                address: HashVal([7; 32]),
                validation_code: vec![],
                induction_height: 5,
                deposit: 1000,
            }],
        };
        reg.update_guardian_set(&casper, HashVal::ZERO).unwrap();
        assert_eq!(reg.my_index, Some(0));
        assert!(reg.opinions.contains_key(&0));
    }

    #[test]
    fn receive_bet_applies_contiguous_run_and_detects_gap() {
        let mut reg = GuardianRegistry::new(HashVal::ZERO);
        reg.opinions.insert(0, Opinion::new(vec![], 0, 0));
        reg.bets.insert(0, BTreeMap::new());
        reg.highest_bet_processed.insert(0, -1);

        let s = Ed25519Signer::new(SecKey([3; 32]));
        let bet0 = Bet::sign(0, BetHeight::Height(0), vec![], vec![], vec![], vec![], HashVal::ZERO, 0, &s);
        let h0 = bet0.hash();
        let bet2 = Bet::sign(0, BetHeight::Height(0), vec![], vec![], vec![], vec![], HashVal::ZERO, 2, &s);

        let (applied, slashing) = reg.receive_bet(bet2).unwrap();
        assert_eq!(applied, 0);
        assert!(slashing.is_none());

        let (applied, _) = reg.receive_bet(bet0).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(reg.highest_bet_processed[&0], 0);
        let _ = h0;
    }

    #[test]
    fn receive_bet_flags_double_bet() {
        let mut reg = GuardianRegistry::new(HashVal::ZERO);
        reg.opinions.insert(0, Opinion::new(vec![], 0, 0));
        reg.bets.insert(0, BTreeMap::new());
        reg.highest_bet_processed.insert(0, -1);

        let s = Ed25519Signer::new(SecKey([3; 32]));
        let first = Bet::sign(0, BetHeight::Height(0), vec![], vec![], vec![], vec![], HashVal::ZERO, 0, &s);
        let mut second = first.clone();
        second.seq = 0;
        second.prevhash = HashVal([1; 32]);
        second.sig = s.sign(b"different");

        reg.receive_bet(first).unwrap();
        let (_, slashing) = reg.receive_bet(second).unwrap();
        assert!(slashing.is_some());
    }
}

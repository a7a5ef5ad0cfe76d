//! A guardian's reduced view, built by applying their bet chain in order.
//! Held purely in memory: only the node's own chain state (blocks,
//! probabilities, state roots) needs to survive a restart — other
//! guardians' opinions are cheaply rebuilt by replaying their bets.

use crate::bet::{Bet, BetHeight};
use crate::crypto::HashVal;
use crate::error::EngineError;
use crate::prob::Prob;

#[derive(Clone, Debug)]
pub struct Opinion {
    pub validation_code: Vec<u8>,
    pub index: u32,
    pub blockhashes: Vec<Option<HashVal>>,
    pub stateroots: Vec<Option<HashVal>>,
    pub probs: Vec<Option<Prob>>,
    pub stateroot_probs: Vec<Option<Prob>>,
    pub prevhash: HashVal,
    pub seq: u64,
    pub induction_height: u64,
    pub withdrawal_height: u64,
    pub withdrawn: bool,
    pub deposit_size: u128,
}

impl Opinion {
    pub fn new(validation_code: Vec<u8>, index: u32, induction_height: u64) -> Self {
        Self {
            validation_code,
            index,
            blockhashes: Vec::new(),
            stateroots: Vec::new(),
            probs: Vec::new(),
            stateroot_probs: Vec::new(),
            prevhash: HashVal::ZERO,
            seq: 0,
            induction_height,
            withdrawal_height: u64::MAX,
            withdrawn: false,
            deposit_size: 0,
        }
    }

    pub fn max_height(&self) -> Option<u64> {
        self.probs.len().checked_sub(1).map(|h| h as u64)
    }

    fn extend_to(&mut self, len: usize) {
        while self.blockhashes.len() < len {
            self.blockhashes.push(None);
            self.stateroots.push(None);
            self.probs.push(None);
            self.stateroot_probs.push(None);
        }
    }

    /// Applies one bet to this opinion. Mismatches in sequence number or
    /// prevhash are logged but never abort processing — the dispatcher is
    /// responsible for buffering and replaying bets in order. A bet
    /// received after withdrawal is the one fatal condition here.
    pub fn process_bet(&mut self, bet: &Bet) -> Result<(), EngineError> {
        if bet.seq != self.seq {
            log::warn!(
                "bet sequence mismatch for guardian {}: got {}, expected {}",
                self.index,
                bet.seq,
                self.seq
            );
        }
        if bet.prevhash != self.prevhash {
            log::warn!(
                "bet prevhash mismatch for guardian {}: got {:?}, expected {:?} (seq {})",
                self.index,
                bet.prevhash,
                self.prevhash,
                bet.seq
            );
        }
        if self.withdrawn {
            return Err(EngineError::Slashing(format!(
                "guardian {} bet after withdrawal",
                self.index
            )));
        }

        let max_height_before = self.max_height();
        self.seq = bet.seq + 1;
        self.prevhash = bet.hash();

        if bet.height.is_withdrawal() {
            self.withdrawn = true;
            self.withdrawal_height = max_height_before.unwrap_or(0);
            log::info!("guardian {} is withdrawing", self.index);
            return Ok(());
        }
        let max_height = match bet.height {
            BetHeight::Height(h) => h,
            BetHeight::Withdraw => unreachable!(),
        };

        self.extend_to(max_height as usize + 1);
        for (i, p) in bet.probs.iter().enumerate() {
            self.probs[max_height as usize - i] = Some(*p);
        }
        for (i, h) in bet.blockhashes.iter().enumerate() {
            self.blockhashes[max_height as usize - i] = Some(*h);
        }
        for (i, r) in bet.stateroots.iter().enumerate() {
            self.stateroots[max_height as usize - i] = Some(*r);
        }
        for (i, p) in bet.stateroot_probs.iter().enumerate() {
            self.stateroot_probs[max_height as usize - i] = Some(*p);
        }
        Ok(())
    }

    pub fn get_prob(&self, h: u64) -> Option<Prob> {
        self.probs.get(h as usize).copied().flatten()
    }

    pub fn get_blockhash(&self, h: u64) -> Option<HashVal> {
        self.blockhashes.get(h as usize).copied().flatten()
    }

    pub fn get_stateroot(&self, h: u64) -> Option<HashVal> {
        self.stateroots.get(h as usize).copied().flatten()
    }
}

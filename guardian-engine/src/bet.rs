//! The bet record: an immutable, signed message anchoring a guardian's
//! probability vector at a height, chained to their previous bet.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_single, GuardianSigner, HashVal, PubKey, Signature};
use crate::prob::Prob;

/// `max_height` is conceptually `2^256 - 1` for a withdrawal bet — a value
/// no `u64` can hold. Rather than reserve a magic sentinel, the withdrawal
/// signal gets its own variant, matching the sum-type-over-holes approach
/// the rest of this engine uses for anything that would otherwise overload
/// a special scalar.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BetHeight {
    Height(u64),
    Withdraw,
}

impl BetHeight {
    pub fn is_withdrawal(self) -> bool {
        matches!(self, BetHeight::Withdraw)
    }

    pub fn value(self) -> Option<u64> {
        match self {
            BetHeight::Height(h) => Some(h),
            BetHeight::Withdraw => None,
        }
    }
}

/// A guardian's signed, sequenced bet. The four probability/hash arrays are
/// indexed *downwards* from `height`: element 0 covers `height`, element 1
/// covers `height - 1`, and so on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub index: u32,
    pub height: BetHeight,
    pub probs: Vec<Prob>,
    pub blockhashes: Vec<HashVal>,
    pub stateroots: Vec<HashVal>,
    pub stateroot_probs: Vec<Prob>,
    pub prevhash: HashVal,
    pub seq: u64,
    pub sig: Signature,
}

/// The fields that get signed over — everything except the signature
/// itself.
#[derive(Serialize)]
struct SigningPayload<'a> {
    index: u32,
    height: BetHeight,
    probs: &'a [Prob],
    blockhashes: &'a [HashVal],
    stateroots: &'a [HashVal],
    stateroot_probs: &'a [Prob],
    prevhash: HashVal,
    seq: u64,
}

impl Bet {
    fn signing_bytes(
        index: u32,
        height: BetHeight,
        probs: &[Prob],
        blockhashes: &[HashVal],
        stateroots: &[HashVal],
        stateroot_probs: &[Prob],
        prevhash: HashVal,
        seq: u64,
    ) -> Vec<u8> {
        stdcode::serialize(&SigningPayload {
            index,
            height,
            probs,
            blockhashes,
            stateroots,
            stateroot_probs,
            prevhash,
            seq,
        })
        .expect("bet payload always serializes")
    }

    /// Builds and signs a new bet.
    #[allow(clippy::too_many_arguments)]
    pub fn sign(
        index: u32,
        height: BetHeight,
        probs: Vec<Prob>,
        blockhashes: Vec<HashVal>,
        stateroots: Vec<HashVal>,
        stateroot_probs: Vec<Prob>,
        prevhash: HashVal,
        seq: u64,
        signer: &dyn GuardianSigner,
    ) -> Self {
        let to_sign = Self::signing_bytes(
            index,
            height,
            &probs,
            &blockhashes,
            &stateroots,
            &stateroot_probs,
            prevhash,
            seq,
        );
        let sig = signer.sign(&to_sign);
        Bet {
            index,
            height,
            probs,
            blockhashes,
            stateroots,
            stateroot_probs,
            prevhash,
            seq,
            sig,
        }
    }

    /// Builds the voluntary-withdrawal sentinel bet.
    pub fn sign_withdrawal(
        index: u32,
        prevhash: HashVal,
        seq: u64,
        signer: &dyn GuardianSigner,
    ) -> Self {
        Self::sign(
            index,
            BetHeight::Withdraw,
            vec![],
            vec![],
            vec![],
            vec![],
            prevhash,
            seq,
            signer,
        )
    }

    pub fn verify(&self, pubkey: PubKey) -> bool {
        let to_sign = Self::signing_bytes(
            self.index,
            self.height,
            &self.probs,
            &self.blockhashes,
            &self.stateroots,
            &self.stateroot_probs,
            self.prevhash,
            self.seq,
        );
        pubkey.verify(&to_sign, &self.sig)
    }

    /// Canonical wire encoding, equivalent to a Casper `submitBet` call
    /// payload. ABI-compatibility with the Casper contract's exact byte
    /// layout is out of scope (Casper's ABI is itself an excluded external
    /// collaborator); this encoding only needs to be a stable, self
    /// -describing wire format between guardians and this node.
    pub fn serialize(&self) -> Vec<u8> {
        stdcode::serialize(self).expect("bet always serializes")
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, stdcode::Error> {
        stdcode::deserialize(bytes)
    }

    /// The bet's content hash, used to chain bets and to dedup on receipt.
    pub fn hash(&self) -> HashVal {
        hash_single(self.serialize())
    }

    pub fn is_withdrawal(&self) -> bool {
        self.height.is_withdrawal()
    }
}

const SLASH_BETS_GAS: u64 = 300_000;

/// Builds the `slashBets` transaction for two conflicting bets recorded at
/// the same `(index, seq)`.
pub fn slash_bets_tx(first: &Bet, second: &Bet) -> crate::chainstore::Transaction {
    let mut data = first.serialize();
    data.extend(second.serialize());
    crate::chainstore::Transaction {
        hash: hash_single(&data),
        gas: SLASH_BETS_GAS,
        gas_price: 0,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Ed25519Signer, SecKey};

    fn signer() -> Ed25519Signer {
        Ed25519Signer::new(SecKey([7u8; 32]))
    }

    #[test]
    fn roundtrips_through_serialize() {
        let s = signer();
        let bet = Bet::sign(
            0,
            BetHeight::Height(10),
            vec![Prob::from_f64(0.92)],
            vec![HashVal([1u8; 32])],
            vec![HashVal([2u8; 32])],
            vec![Prob::from_f64(0.8)],
            HashVal::ZERO,
            0,
            &s,
        );
        let bytes = bet.serialize();
        let back = Bet::deserialize(&bytes).unwrap();
        assert_eq!(bet, back);
        assert_eq!(bet.hash(), back.hash());
    }

    #[test]
    fn signature_verifies() {
        let s = signer();
        let bet = Bet::sign_withdrawal(3, HashVal::ZERO, 5, &s);
        assert!(bet.verify(s.public_key()));
        assert!(bet.is_withdrawal());
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let s = signer();
        let mut bet = Bet::sign_withdrawal(3, HashVal::ZERO, 5, &s);
        bet.seq = 6;
        assert!(!bet.verify(s.public_key()));
    }
}

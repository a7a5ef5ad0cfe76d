//! Probabilities are encoded into a single byte via a log-odds table, the
//! same representation used on the wire for a bet's `probs`/`stateroot_probs`
//! arrays. Keeping the in-memory [`Prob`] type
//! pinned to that one-byte grid (rather than a raw `f64`) means every
//! computed probability is automatically the value that would round-trip
//! through serialization, with no separate quantization step needed at the
//! wire boundary.

use serde::{Deserialize, Serialize};

/// Above this, a block is considered finalized as part of the canonical
/// chain.
pub const FINALITY_HIGH: f64 = 0.9999;
/// Below this, a block is considered finalized as *not* part of the
/// canonical chain.
pub const FINALITY_LOW: f64 = 0.0001;

const LOGODDS_SCALE: f64 = 16.0;
const LOGODDS_CENTER: f64 = 128.0;

fn encode_byte(p: f64) -> u8 {
    let p = p.clamp(1e-6, 1.0 - 1e-6);
    let logit = (p / (1.0 - p)).ln();
    let raw = LOGODDS_CENTER + LOGODDS_SCALE * logit;
    raw.round().clamp(0.0, 255.0) as u8
}

fn decode_byte(b: u8) -> f64 {
    let logit = (b as f64 - LOGODDS_CENTER) / LOGODDS_SCALE;
    1.0 / (1.0 + (-logit).exp())
}

/// A probability, represented canonically as the byte it would encode to
/// on the wire.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Prob(u8);

impl Prob {
    pub const HALF: Prob = Prob(LOGODDS_CENTER as u8);

    pub fn from_f64(p: f64) -> Self {
        Prob(encode_byte(p))
    }

    pub fn as_f64(self) -> f64 {
        decode_byte(self.0)
    }

    pub fn byte(self) -> u8 {
        self.0
    }

    pub fn from_byte(b: u8) -> Self {
        Prob(b)
    }

    pub fn is_finalized_in(self) -> bool {
        self.as_f64() > FINALITY_HIGH
    }

    pub fn is_finalized_out(self) -> bool {
        self.as_f64() < FINALITY_LOW
    }
}

impl std::fmt::Debug for Prob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.as_f64())
    }
}

impl Default for Prob {
    fn default() -> Self {
        Prob::HALF
    }
}

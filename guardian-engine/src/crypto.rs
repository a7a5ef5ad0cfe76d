//! Hash, address and signature types, plus the signer seam the betting
//! engine calls through. Actual cryptographic primitives (ed25519, block
//! hashing, address derivation) are an external collaborator per the
//! engine's scope — this module defines the types everything else is built
//! on and a default implementation, not the only possible one.

use std::convert::TryInto;
use std::fmt;
use std::ops::Deref;

use ed25519_dalek::{Signer as _, Verifier as _};
use serde::{Deserialize, Serialize};

/// A 256-bit hash value, used for block hashes, bet hashes and state roots.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
pub struct HashVal(pub [u8; 32]);

impl HashVal {
    pub const ZERO: HashVal = HashVal([0u8; 32]);

    /// The withdrawal sentinel height, `2^256 - 1`, represented the only
    /// way it needs to be: as a distinguished "is this a withdrawal bet"
    /// flag, since `u64` heights can't literally hold `2^256 - 1`.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for HashVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<{}>", hex::encode(self.0))
    }
}

impl Deref for HashVal {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Hashes a byte string with blake3, this stack's general-purpose hash.
/// Hashing is an external collaborator per scope, so the concrete
/// algorithm is whatever the surrounding crypto stack already uses rather
/// than anything this crate mandates on its own.
pub fn hash_single(data: impl AsRef<[u8]>) -> HashVal {
    HashVal(*blake3::hash(data.as_ref()).as_bytes())
}

/// An ed25519 public key.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PubKey(pub [u8; 32]);

impl PubKey {
    pub fn verify(&self, msg: &[u8], sig: &Signature) -> bool {
        let pk = match ed25519_dalek::PublicKey::from_bytes(&self.0) {
            Ok(pk) => pk,
            Err(_) => return false,
        };
        let sig = match ed25519_dalek::Signature::try_from(sig.0.as_slice()) {
            Ok(s) => s,
            Err(_) => return false,
        };
        pk.verify(msg, &sig).is_ok()
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<pk:{}>", hex::encode(&self.0[..4]))
    }
}

/// An ed25519 signature, detached from any particular curve representation
/// so callers never have to import `ed25519_dalek` themselves.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<sig:{}>", hex::encode(&self.0[..4.min(self.0.len())]))
    }
}

/// An ed25519 secret key, kept only by the guardian running this node.
#[derive(Clone)]
pub struct SecKey(pub [u8; 32]);

impl SecKey {
    pub fn to_public(&self) -> PubKey {
        let kp = ed25519_dalek::SecretKey::from_bytes(&self.0)
            .map(|sk| ed25519_dalek::PublicKey::from(&sk))
            .expect("32-byte secret key is always valid");
        PubKey(kp.to_bytes())
    }
}

/// The collaborator a guardian node signs bets and blocks through. Kept as
/// a trait, injected at construction, so the engine never hardcodes a
/// signature scheme (per the design note on collaborator injection).
pub trait GuardianSigner: Send + Sync + 'static {
    fn public_key(&self) -> PubKey;
    fn sign(&self, msg: &[u8]) -> Signature;
}

/// The default signer: a plain ed25519 keypair held in memory.
pub struct Ed25519Signer {
    sk: SecKey,
}

impl Ed25519Signer {
    pub fn new(sk: SecKey) -> Self {
        Self { sk }
    }
}

impl GuardianSigner for Ed25519Signer {
    fn public_key(&self) -> PubKey {
        self.sk.to_public()
    }

    fn sign(&self, msg: &[u8]) -> Signature {
        let secret = ed25519_dalek::SecretKey::from_bytes(&self.sk.0)
            .expect("32-byte secret key is always valid");
        let public: ed25519_dalek::PublicKey = (&secret).into();
        let kp = ed25519_dalek::Keypair { secret, public };
        Signature(kp.sign(msg).to_bytes().to_vec())
    }
}

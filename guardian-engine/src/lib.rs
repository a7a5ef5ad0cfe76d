//! Betting-strategy engine for a probabilistic proof-of-stake guardian
//! node: maintains per-guardian opinions from their bet chains, derives
//! this node's own block/state-root probabilities, drives finalization,
//! slashing detection, proposer scheduling and bet/block production.
//!
//! The EVM, the Casper contract ABI, cryptographic primitives and the
//! network transport are all external collaborators, reached only
//! through the traits in [`staterecomp`], [`casper`], [`crypto`] and
//! [`network`] respectively.

pub mod bet;
pub mod betproducer;
pub mod blockproducer;
pub mod bootstrap;
pub mod casper;
pub mod chainstore;
pub mod config;
pub mod crypto;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod network;
pub mod opinion;
pub mod prob;
pub mod proposers;
pub mod registry;
pub mod staterecomp;
pub mod txtracker;

pub use bet::{Bet, BetHeight};
pub use config::{GuardianConfig, ProtocolConstants};
pub use engine::GuardianEngine;
pub use error::EngineError;
pub use opinion::Opinion;
pub use prob::Prob;

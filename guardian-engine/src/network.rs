//! Peer transport is an external collaborator: message framing, peer
//! selection and delivery all live outside this crate. This module only
//! fixes the wire vocabulary both sides agree on.

use serde::{Deserialize, Serialize};

use crate::bet::Bet;
use crate::chainstore::Block;
use crate::crypto::HashVal;

/// One request/reply/gossip message passed between guardian nodes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Message {
    Block(Block),
    Bet(Bet),
    BetRequest { index: u32, from_seq: u64 },
    Transaction(crate::chainstore::Transaction),
    GetBlockByHeight(u64),
    GetBlockByHash(HashVal),
    GetBlocks { from_height: u64 },
    List(Vec<Message>),
    Faucet { to: HashVal, amount: u128 },
}

/// Opaque peer handle. The transport owns what this actually identifies;
/// the engine only ever passes it back to `direct_send`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct PeerId(pub Vec<u8>);

/// The collaborator a node sends outbound traffic through.
pub trait NetworkHandle: Send + Sync + 'static {
    fn broadcast(&self, msg: &Message);
    fn direct_send(&self, to: &PeerId, msg: &Message);
    /// Sends to a single, arbitrarily-chosen connected peer (used for
    /// bet-request retries and faucet forwarding).
    fn send_to_one(&self, msg: &Message);
}

/// A handle that records everything sent instead of delivering it, for
/// tests and for single-node/no-network configurations.
#[derive(Default)]
pub struct RecordingNetwork {
    pub broadcasts: parking_lot::Mutex<Vec<Message>>,
    pub direct_sends: parking_lot::Mutex<Vec<Message>>,
}

impl NetworkHandle for RecordingNetwork {
    fn broadcast(&self, msg: &Message) {
        self.broadcasts.lock().push(msg.clone());
    }

    fn direct_send(&self, _to: &PeerId, msg: &Message) {
        self.direct_sends.lock().push(msg.clone());
    }

    fn send_to_one(&self, msg: &Message) {
        self.direct_sends.lock().push(msg.clone());
    }
}

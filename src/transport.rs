//! Interface to the peer-to-peer transport.
//!
//! Peer discovery, encryption and the anonymizing overlay live in the transport. Inbound
//! messages are pushed into [TradeManager::on_direct_message] or
//! [TradeManager::on_mailbox_message], depending on how they were delivered.
//!
//! [TradeManager::on_direct_message]: crate::trade::TradeManager::on_direct_message
//! [TradeManager::on_mailbox_message]: crate::trade::TradeManager::on_mailbox_message

use crate::{
    error::NetError,
    protocol::messages::{PeerAddress, TradeMessage},
};

/// How a sent message reached the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The peer was online and received the message.
    Delivered,
    /// The peer was unreachable; the message waits in its mailbox.
    QueuedInMailbox,
}

/// Errors reported by the transport.
#[derive(Debug)]
pub enum TransportError {
    /// The peer is unreachable and the message can't be stored for it either.
    PeerUnreachable(PeerAddress),
    /// Framing or IO failure.
    Net(NetError),
    /// Represents a general error with a descriptive message.
    General(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TransportError {}

impl From<NetError> for TransportError {
    fn from(value: NetError) -> Self {
        Self::Net(value)
    }
}

/// Sends trade messages to peers.
pub trait Transport: Send + Sync {
    /// Sends `message` to `peer`, falling back to store-and-forward delivery when
    /// the peer is offline. Sends are never retried by the protocol.
    fn send(&self, peer: &PeerAddress, message: &TradeMessage)
        -> Result<SendOutcome, TransportError>;

    /// The address peers reach the local node at.
    fn local_address(&self) -> PeerAddress;
}

//! Arbitration related errors.

use crate::protocol::messages::PeerAddress;

/// Errors from arbitrator selection and dispute handling.
#[derive(Debug)]
pub enum ArbitrationError {
    /// Offer and user share no accepted arbitrator.
    NoCommonArbitrator,
    /// No arbitrator was selected for the trade yet.
    NoArbitratorSelected,
    /// The arbitrator isn't registered.
    UnknownArbitrator(PeerAddress),
    /// A dispute or support ticket is already open for the trade.
    DisputeAlreadyOpen,
    /// The dispute couldn't be delivered to the arbitrator.
    Delivery(String),
}

impl std::fmt::Display for ArbitrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ArbitrationError {}

//! All protocol validation errors.

use bitcoin::{secp256k1, Txid};

use super::messages::PeerAddress;

/// Errors raised when an inbound message or its content fails validation.
///
/// Encapsulates errors from:
/// - Message correlation (trade id, message type, sender)
/// - Contract and signature checks
/// - Transaction checks
#[derive(Debug)]
pub enum ProtocolError {
    /// Message belongs to another trade.
    TradeIdMismatch {
        /// Id of the trade handling the message.
        expected: String,
        /// Id carried by the message.
        received: String,
    },
    /// Received unexpected message in protocol sequence.
    WrongMessage {
        /// Message the step expected.
        expected: String,
        /// Message actually found.
        received: String,
    },
    /// Message came from a peer not entitled to send it for this trade.
    UnexpectedSender {
        /// Address the message was expected from, if one is known yet.
        expected: Option<PeerAddress>,
        /// Address the message came from.
        received: PeerAddress,
    },
    /// A field required by the step was never set.
    MissingField(&'static str),
    /// Offerer's contract signature didn't verify.
    InvalidContractSignature,
    /// Contract content doesn't match the locally known trade data.
    ContractMismatch(&'static str),
    /// Trade amount is zero or exceeds the offer.
    InvalidTradeAmount,
    /// Arbitrator isn't one both peers accepted.
    ArbitratorNotAccepted(PeerAddress),
    /// Taker picked another arbitrator than the selection rule yields.
    ArbitratorSelectionMismatch {
        /// Arbitrator derived by the local selection rule.
        expected: PeerAddress,
        /// Arbitrator named in the request.
        received: PeerAddress,
    },
    /// Take-offer fee transaction doesn't pay the expected fee.
    InvalidFeeTx(Txid),
    /// Payout transaction doesn't spend the deposit transaction.
    PayoutNotSpendingDeposit(Txid),
    /// Contract JSON error.
    Json(serde_json::Error),
    /// Secp256k1 cryptographic errors.
    Secp(secp256k1::Error),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl From<secp256k1::Error> for ProtocolError {
    fn from(value: secp256k1::Error) -> Self {
        Self::Secp(value)
    }
}

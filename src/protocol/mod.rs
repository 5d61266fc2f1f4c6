//! Trade protocol wire types: messages, validation errors and framing.

pub mod error;
pub mod messages;
pub mod wire;

pub use error::ProtocolError;
pub use messages::{
    ContractCountersigned, DepositTxPublished, DisputeResult, FiatTransferStarted, FinalizePayoutTxRequest,
    MailboxMessage, PayoutTxFinalized, PeerAddress, PeerOpenedDispute, TakeOfferRequest,
    TradeMessage,
};

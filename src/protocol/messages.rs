//! Trade Protocol Messages.
//!
//! Messages are exchanged between the two trading peers of one trade. Arbitrators only get
//! involved through the dispute messages.
//!
//! Messages are named in terms of the *Offerer* (the peer who published the offer) and the
//! *Taker* (the peer who accepted it), and in terms of the fiat roles *Buyer* and *Seller*.
//! The two axes are orthogonal: a Buyer can be either Offerer or Taker.
//!
//! The happy path of one trade:
//!
//! ```shell
//! ********* Deposit *********
//! Taker -> Offerer: [TradeMessage::TakeOfferRequest] (take-offer fee tx already paid)
//! Offerer signs the contract, builds, signs and publishes the 2-of-3 deposit tx.
//! Offerer -> Taker: [TradeMessage::DepositTxPublished]
//! Taker -> Offerer: [TradeMessage::ContractCountersigned]
//!
//! ********* Fiat payment *********
//! Buyer -> Seller: [TradeMessage::FiatTransferStarted]
//!
//! ********* Payout *********
//! Seller -> Buyer: [TradeMessage::FinalizePayoutTxRequest] (payout tx signed by the Seller)
//! Buyer -> Seller: [TradeMessage::PayoutTxFinalized] (payout tx signed by both)
//! ```
//!
//! All messages except [TradeMessage::TakeOfferRequest] may be delivered through the
//! store-and-forward mailbox, wrapped in a [MailboxMessage] carrying the claimed sender.

use std::fmt::{self, Display};

use bitcoin::{
    secp256k1::{ecdsa::Signature, PublicKey},
    Amount, Transaction, Txid,
};
use serde::{Deserialize, Serialize};

/// Network address of a peer, as understood by the transport (usually `host:port`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerAddress(pub String);

impl PeerAddress {
    /// Creates a peer address from anything string-like.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sent by the Taker to start a trade on one of the Offerer's offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeOfferRequest {
    /// Trade id. Equal to the offer id.
    pub trade_id: String,
    /// Id of the offer being taken.
    pub offer_id: String,
    /// Bitcoin amount the taker wants to trade.
    pub trade_amount: Amount,
    /// Txid of the take-offer fee transaction paid by the taker.
    pub take_offer_fee_txid: Txid,
    /// Address the taker is reachable at.
    pub taker_address: PeerAddress,
    /// Taker's multisig key for the deposit transaction.
    pub taker_pubkey: PublicKey,
    /// Taker's payout address for the payout transaction.
    pub taker_payout_address: String,
    /// Arbitrators the taker accepts. The offerer re-runs the selection rule on them.
    pub accepted_arbitrator_addresses: Vec<PeerAddress>,
    /// Arbitrator selected by the taker.
    pub arbitrator_address: PeerAddress,
}

/// Sent by the Offerer once the deposit transaction is signed and published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositTxPublished {
    /// Trade id.
    pub trade_id: String,
    /// The published deposit transaction.
    pub deposit_tx: Transaction,
    /// Canonical JSON of the trade contract.
    pub contract_json: String,
    /// Offerer's signature over the contract hash.
    pub offerer_contract_signature: Signature,
    /// Offerer's trade key. Signs the contract and is the offerer's multisig key.
    pub offerer_pubkey: PublicKey,
    /// Block height after which the payout transaction becomes valid.
    pub lock_time_height: u32,
    /// Block height after which a dispute may be opened.
    pub open_dispute_height: u32,
}

/// Sent by the Taker once it accepted and signed the offerer's contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractCountersigned {
    /// Trade id.
    pub trade_id: String,
    /// Taker's signature over the contract hash.
    pub taker_contract_signature: Signature,
}

/// Sent by the Buyer after starting the fiat transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiatTransferStarted {
    /// Trade id.
    pub trade_id: String,
}

/// Sent by the Seller after receiving the fiat payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizePayoutTxRequest {
    /// Trade id.
    pub trade_id: String,
    /// Payout transaction, signed by the seller only.
    pub payout_tx: Transaction,
}

/// Sent by the Buyer after countersigning and committing the payout transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutTxFinalized {
    /// Trade id.
    pub trade_id: String,
    /// Fully signed payout transaction.
    pub payout_tx: Transaction,
}

/// Relayed by the arbitrator when the counterparty opened a dispute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerOpenedDispute {
    /// Trade id.
    pub trade_id: String,
    /// Whether the peer opened a support ticket instead of a dispute.
    pub is_support_ticket: bool,
}

/// Sent by the arbitrator when a dispute is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeResult {
    /// Trade id.
    pub trade_id: String,
    /// Human readable summary of the decision.
    pub summary: String,
}

/// All messages a trade protocol can receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TradeMessage {
    /// Taker asks the offerer to start the trade.
    TakeOfferRequest(TakeOfferRequest),
    /// Offerer published the deposit transaction.
    DepositTxPublished(Box<DepositTxPublished>),
    /// Taker countersigned the contract.
    ContractCountersigned(ContractCountersigned),
    /// Buyer started the fiat transfer.
    FiatTransferStarted(FiatTransferStarted),
    /// Seller received the fiat and asks for the payout to be finalized.
    FinalizePayoutTxRequest(FinalizePayoutTxRequest),
    /// Buyer finalized the payout.
    PayoutTxFinalized(PayoutTxFinalized),
    /// The counterparty opened a dispute.
    PeerOpenedDispute(PeerOpenedDispute),
    /// The arbitrator closed the dispute.
    DisputeResult(DisputeResult),
}

impl TradeMessage {
    /// Trade id carried by the message, used for correlation.
    pub fn trade_id(&self) -> &str {
        match self {
            TradeMessage::TakeOfferRequest(m) => &m.trade_id,
            TradeMessage::DepositTxPublished(m) => &m.trade_id,
            TradeMessage::ContractCountersigned(m) => &m.trade_id,
            TradeMessage::FiatTransferStarted(m) => &m.trade_id,
            TradeMessage::FinalizePayoutTxRequest(m) => &m.trade_id,
            TradeMessage::PayoutTxFinalized(m) => &m.trade_id,
            TradeMessage::PeerOpenedDispute(m) => &m.trade_id,
            TradeMessage::DisputeResult(m) => &m.trade_id,
        }
    }

    /// Whether the message may travel through the store-and-forward mailbox.
    pub fn is_mailbox_message(&self) -> bool {
        !matches!(self, TradeMessage::TakeOfferRequest(_))
    }

    /// Static name of the message variant.
    pub fn kind(&self) -> &'static str {
        match self {
            TradeMessage::TakeOfferRequest(_) => "TakeOfferRequest",
            TradeMessage::DepositTxPublished(_) => "DepositTxPublished",
            TradeMessage::ContractCountersigned(_) => "ContractCountersigned",
            TradeMessage::FiatTransferStarted(_) => "FiatTransferStarted",
            TradeMessage::FinalizePayoutTxRequest(_) => "FinalizePayoutTxRequest",
            TradeMessage::PayoutTxFinalized(_) => "PayoutTxFinalized",
            TradeMessage::PeerOpenedDispute(_) => "PeerOpenedDispute",
            TradeMessage::DisputeResult(_) => "DisputeResult",
        }
    }
}

impl Display for TradeMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind(), self.trade_id())
    }
}

/// A message recovered from store-and-forward delivery.
///
/// The sender was offline or unreachable when the message was first sent, so the
/// sender address travels with the message instead of coming from the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailboxMessage {
    /// Address the sender claims to be reachable at.
    pub sender_address: PeerAddress,
    /// The wrapped protocol message.
    pub message: TradeMessage,
}

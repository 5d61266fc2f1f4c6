//! Trade states.
//!
//! A trade moves along two independent axes:
//!
//! - [TradeState], fine grained and role specific, which maps onto the coarse
//!   [Phase] shared by both peers. Phase never moves backwards.
//! - [DisputeState], the escalation axis. It can leave [DisputeState::None] from any
//!   phase and [DisputeState::DisputeClosed] is absorbing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse trade progress, observed identically by both peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Offer taken, nothing on chain yet.
    Preparation,
    /// Taker paid the take-offer fee and sent the request.
    TakerFeePaid,
    /// Deposit transaction published.
    DepositPublished,
    /// Buyer started the fiat transfer.
    FiatPaymentStarted,
    /// Seller confirmed the fiat receipt.
    FiatPaymentReceipt,
    /// Payout transaction signed by both and committed.
    PayoutPaid,
    /// Funds withdrawn, trade over.
    Withdrawn,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Preparation => "PREPARATION",
            Phase::TakerFeePaid => "TAKER_FEE_PAID",
            Phase::DepositPublished => "DEPOSIT_PUBLISHED",
            Phase::FiatPaymentStarted => "FIAT_PAYMENT_STARTED",
            Phase::FiatPaymentReceipt => "FIAT_PAYMENT_RECEIPT",
            Phase::PayoutPaid => "PAYOUT_PAID",
            Phase::Withdrawn => "WITHDRAWN",
        };
        write!(f, "{}", name)
    }
}

/// Detailed trade state, as seen by the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TradeState {
    /// Trade created.
    Preparation,
    /// Take-offer fee paid and request sent (taker).
    TakerFeePaid,
    /// Deposit published (offerer).
    DepositPublished,
    /// Deposit notice sent (offerer).
    DepositPublishedMsgSent,
    /// Deposit notice applied (taker).
    DepositPublishedMsgReceived,
    /// Deposit confirmed on chain.
    DepositConfirmed,
    /// Buyer pressed "payment started".
    FiatPaymentStarted,
    /// Fiat transfer notice sent (buyer).
    FiatPaymentStartedMsgSent,
    /// Fiat transfer notice applied (seller).
    FiatPaymentStartedMsgReceived,
    /// Seller pressed "payment received".
    FiatPaymentReceipt,
    /// Finalize payout request sent (seller).
    FinalizePayoutRequestSent,
    /// Payout committed to the wallet.
    PayoutTxCommitted,
    /// Payout finalized notice sent (buyer).
    PayoutTxSent,
    /// Payout finalized notice applied (seller).
    PayoutTxReceived,
    /// Payout broadcast after lock time.
    PayoutBroadcast,
    /// Funds withdrawn.
    WithdrawCompleted,
}

impl TradeState {
    /// Phase this state belongs to.
    pub fn phase(&self) -> Phase {
        match self {
            TradeState::Preparation => Phase::Preparation,
            TradeState::TakerFeePaid => Phase::TakerFeePaid,
            TradeState::DepositPublished
            | TradeState::DepositPublishedMsgSent
            | TradeState::DepositPublishedMsgReceived
            | TradeState::DepositConfirmed => Phase::DepositPublished,
            TradeState::FiatPaymentStarted
            | TradeState::FiatPaymentStartedMsgSent
            | TradeState::FiatPaymentStartedMsgReceived => Phase::FiatPaymentStarted,
            TradeState::FiatPaymentReceipt | TradeState::FinalizePayoutRequestSent => {
                Phase::FiatPaymentReceipt
            }
            TradeState::PayoutTxCommitted
            | TradeState::PayoutTxSent
            | TradeState::PayoutTxReceived
            | TradeState::PayoutBroadcast => Phase::PayoutPaid,
            TradeState::WithdrawCompleted => Phase::Withdrawn,
        }
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Dispute escalation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeState {
    /// No dispute.
    None,
    /// The local trader opened a dispute or support ticket.
    DisputeRequested,
    /// The counterparty opened a dispute.
    DisputeStartedByPeer,
    /// The arbitrator closed the dispute.
    DisputeClosed,
}

impl DisputeState {
    fn rank(&self) -> u8 {
        match self {
            DisputeState::None => 0,
            DisputeState::DisputeRequested | DisputeState::DisputeStartedByPeer => 1,
            DisputeState::DisputeClosed => 2,
        }
    }

    /// Whether a dispute is in progress.
    pub fn is_open(&self) -> bool {
        self.rank() == 1
    }

    /// Dispute state only moves forward.
    pub fn can_transition_to(&self, next: DisputeState) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for DisputeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisputeState::None => "NONE",
            DisputeState::DisputeRequested => "DISPUTE_REQUESTED",
            DisputeState::DisputeStartedByPeer => "DISPUTE_STARTED_BY_PEER",
            DisputeState::DisputeClosed => "DISPUTE_CLOSED",
        };
        write!(f, "{}", name)
    }
}

//! Protocol steps, grouped by the side that runs them.
//!
//! Every task is a plain function over the [Trade]. Tasks read their inputs from the
//! trade and its process model, call the external services and store their results
//! back. State commits are left to the protocol.

pub(crate) mod buyer;
pub(crate) mod offerer;
pub(crate) mod seller;
pub(crate) mod shared;
pub(crate) mod taker;

use bitcoin::{Transaction, Txid};

use super::{model::Trade, process_model::Services};
use crate::{
    arbitration::{ArbitrationError, Arbitrator},
    protocol::{error::ProtocolError, TradeMessage},
    task::TaskError,
    transport::SendOutcome,
    utill::short_id,
};

fn services(trade: &Trade) -> Result<Services, TaskError> {
    trade.process_model.services().cloned()
}

fn require<T>(value: Option<T>, field: &'static str) -> Result<T, TaskError> {
    value.ok_or(TaskError::Protocol(ProtocolError::MissingField(field)))
}

fn wrong_message(expected: &str, received: Option<TradeMessage>) -> TaskError {
    TaskError::Protocol(ProtocolError::WrongMessage {
        expected: expected.to_string(),
        received: received
            .map(|m| m.kind().to_string())
            .unwrap_or_else(|| "none".to_string()),
    })
}

fn check_trade_id(trade: &Trade, received: &str) -> Result<(), TaskError> {
    if trade.id() != received {
        return Err(TaskError::Protocol(ProtocolError::TradeIdMismatch {
            expected: trade.id().to_string(),
            received: received.to_string(),
        }));
    }
    Ok(())
}

fn arbitrator(trade: &Trade, services: &Services) -> Result<Arbitrator, TaskError> {
    let address = require(trade.arbitrator_address.clone(), "arbitrator_address")?;
    services
        .arbitration
        .arbitrator_by_address(&address)
        .ok_or(TaskError::Arbitration(ArbitrationError::UnknownArbitrator(
            address,
        )))
}

fn send_to_peer(trade: &Trade, message: TradeMessage) -> Result<(), TaskError> {
    let services = services(trade)?;
    let peer = trade.process_model.require_peer_address()?;
    match services.transport.send(peer, &message)? {
        SendOutcome::Delivered => {
            log::info!("[{}] Sent {} to {}", short_id(trade.id()), message, peer)
        }
        SendOutcome::QueuedInMailbox => log::info!(
            "[{}] {} is offline, {} stored in mailbox",
            short_id(trade.id()),
            peer,
            message
        ),
    }
    Ok(())
}

fn spends_deposit(payout_tx: &Transaction, deposit_txid: Txid) -> Result<(), TaskError> {
    if !payout_tx
        .input
        .iter()
        .any(|input| input.previous_output.txid == deposit_txid)
    {
        return Err(TaskError::Protocol(
            ProtocolError::PayoutNotSpendingDeposit(payout_tx.compute_txid()),
        ));
    }
    Ok(())
}

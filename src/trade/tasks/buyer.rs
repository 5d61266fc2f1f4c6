//! Steps run by the buyer.

use bitcoin::absolute::LockTime;

use super::{
    check_trade_id, require, send_to_peer, services, spends_deposit, wrong_message,
};
use crate::{
    protocol::{
        error::ProtocolError, FiatTransferStarted, PayoutTxFinalized, TradeMessage,
    },
    task::{Task, TaskError},
    trade::model::Trade,
};

pub(crate) const SEND_FIAT_TRANSFER_STARTED: Task<Trade> =
    Task::new("SendFiatTransferStarted", send_fiat_transfer_started);
pub(crate) const PROCESS_FINALIZE_PAYOUT_TX_REQUEST: Task<Trade> =
    Task::new("ProcessFinalizePayoutTxRequest", process_finalize_payout_tx_request);
pub(crate) const SIGN_AND_FINALIZE_PAYOUT_TX: Task<Trade> =
    Task::new("SignAndFinalizePayoutTx", sign_and_finalize_payout_tx);
pub(crate) const SEND_PAYOUT_TX_FINALIZED: Task<Trade> =
    Task::new("SendPayoutTxFinalized", send_payout_tx_finalized);

fn send_fiat_transfer_started(trade: &mut Trade) -> Result<(), TaskError> {
    let notice = FiatTransferStarted {
        trade_id: trade.id().to_string(),
    };
    send_to_peer(trade, TradeMessage::FiatTransferStarted(notice))
}

/// The seller's payout must spend our deposit and carry the agreed lock time.
fn process_finalize_payout_tx_request(trade: &mut Trade) -> Result<(), TaskError> {
    let request = match trade.process_model.take_message() {
        Some(TradeMessage::FinalizePayoutTxRequest(m)) => m,
        other => return Err(wrong_message("FinalizePayoutTxRequest", other)),
    };
    check_trade_id(trade, &request.trade_id)?;

    let deposit_txid = require(trade.deposit_txid(), "deposit_tx")?;
    spends_deposit(&request.payout_tx, deposit_txid)?;
    let lock_time = require(trade.lock_time_height, "lock_time_height")?;
    if request.payout_tx.lock_time != expected_lock_time(lock_time)? {
        return Err(ProtocolError::ContractMismatch("payout_lock_time").into());
    }

    trade.process_model.pending_payout_tx = Some(request.payout_tx);
    Ok(())
}

fn expected_lock_time(height: u32) -> Result<LockTime, TaskError> {
    LockTime::from_height(height)
        .map_err(|e| TaskError::General(format!("Invalid lock time height {}: {}", height, e)))
}

fn sign_and_finalize_payout_tx(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let entry = trade.process_model.require_address_entry()?;
    let partially_signed = require(
        trade.process_model.pending_payout_tx.as_ref(),
        "pending_payout_tx",
    )?;
    let deposit_tx = require(trade.deposit_tx.as_ref(), "deposit_tx")?;
    let payout_tx = services
        .wallet
        .finalize_payout_tx(entry, partially_signed, deposit_tx)?;
    trade.payout_tx = Some(payout_tx);
    trade.process_model.pending_payout_tx = None;
    Ok(())
}

fn send_payout_tx_finalized(trade: &mut Trade) -> Result<(), TaskError> {
    let notice = PayoutTxFinalized {
        trade_id: trade.id().to_string(),
        payout_tx: require(trade.payout_tx.clone(), "payout_tx")?,
    };
    send_to_peer(trade, TradeMessage::PayoutTxFinalized(notice))
}

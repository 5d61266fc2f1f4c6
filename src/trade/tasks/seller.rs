//! Steps run by the seller.

use super::{
    check_trade_id, require, send_to_peer, services, spends_deposit, wrong_message,
};
use crate::{
    protocol::{FinalizePayoutTxRequest, TradeMessage},
    task::{Task, TaskError},
    trade::model::Trade,
    wallet::PayoutTxParams,
};

pub(crate) const PROCESS_FIAT_TRANSFER_STARTED: Task<Trade> =
    Task::new("ProcessFiatTransferStarted", process_fiat_transfer_started);
pub(crate) const SIGN_PAYOUT_TX: Task<Trade> = Task::new("SignPayoutTx", sign_payout_tx);
pub(crate) const SEND_FINALIZE_PAYOUT_TX_REQUEST: Task<Trade> =
    Task::new("SendFinalizePayoutTxRequest", send_finalize_payout_tx_request);
pub(crate) const PROCESS_PAYOUT_TX_FINALIZED: Task<Trade> =
    Task::new("ProcessPayoutTxFinalized", process_payout_tx_finalized);

fn process_fiat_transfer_started(trade: &mut Trade) -> Result<(), TaskError> {
    match trade.process_model.take_message() {
        Some(TradeMessage::FiatTransferStarted(m)) => check_trade_id(trade, &m.trade_id),
        other => Err(wrong_message("FiatTransferStarted", other)),
    }
}

/// The buyer gets the traded amount plus its deposit back, the seller its deposit.
fn sign_payout_tx(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let entry = trade.process_model.require_address_entry()?;
    let contract = require(trade.contract.as_ref(), "contract")?;
    let security_deposit = services.config.security_deposit();
    let params = PayoutTxParams {
        deposit_tx: require(trade.deposit_tx.clone(), "deposit_tx")?,
        buyer_payout_amount: trade.trade_amount + security_deposit,
        seller_payout_amount: security_deposit,
        buyer_payout_address: contract.buyer_payout_address().to_string(),
        seller_payout_address: contract.seller_payout_address().to_string(),
        lock_time: require(trade.lock_time_height, "lock_time_height")?,
    };
    let payout_tx = services.wallet.sign_payout_tx(entry, &params)?;
    trade.process_model.pending_payout_tx = Some(payout_tx);
    Ok(())
}

fn send_finalize_payout_tx_request(trade: &mut Trade) -> Result<(), TaskError> {
    let request = FinalizePayoutTxRequest {
        trade_id: trade.id().to_string(),
        payout_tx: require(
            trade.process_model.pending_payout_tx.clone(),
            "pending_payout_tx",
        )?,
    };
    send_to_peer(trade, TradeMessage::FinalizePayoutTxRequest(request))
}

fn process_payout_tx_finalized(trade: &mut Trade) -> Result<(), TaskError> {
    let notice = match trade.process_model.take_message() {
        Some(TradeMessage::PayoutTxFinalized(m)) => m,
        other => return Err(wrong_message("PayoutTxFinalized", other)),
    };
    check_trade_id(trade, &notice.trade_id)?;
    spends_deposit(&notice.payout_tx, require(trade.deposit_txid(), "deposit_tx")?)?;

    trade.payout_tx = Some(notice.payout_tx);
    trade.process_model.pending_payout_tx = None;
    Ok(())
}

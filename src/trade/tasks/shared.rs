//! Steps shared by buyer and seller.

use super::{require, services};
use crate::{
    protocol::error::ProtocolError,
    task::{Task, TaskError},
    trade::{model::Trade, state::TradeState},
    utill::short_id,
};

pub(crate) const VERIFY_TAKE_OFFER_FEE_PAYMENT: Task<Trade> =
    Task::new("VerifyTakeOfferFeePayment", verify_take_offer_fee_payment);
pub(crate) const COMMIT_PAYOUT_TX: Task<Trade> = Task::new("CommitPayoutTx", commit_payout_tx);
pub(crate) const SETUP_PAYOUT_TX_LOCK_TIME_REACHED_LISTENER: Task<Trade> = Task::new(
    "SetupPayoutTxLockTimeReachedListener",
    setup_payout_tx_lock_time_reached_listener,
);
pub(crate) const BROADCAST_PAYOUT_TX: Task<Trade> =
    Task::new("BroadcastPayoutTx", broadcast_payout_tx);

pub(super) fn verify_take_offer_fee_payment(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let txid = require(
        trade.process_model.take_offer_fee_txid,
        "take_offer_fee_txid",
    )?;
    if !services
        .wallet
        .verify_take_offer_fee_tx(&txid, services.config.take_offer_fee())?
    {
        return Err(ProtocolError::InvalidFeeTx(txid).into());
    }
    Ok(())
}

fn commit_payout_tx(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let payout_tx = require(trade.payout_tx.as_ref(), "payout_tx")?;
    services.wallet.commit_tx(payout_tx)?;
    trade.set_state(TradeState::PayoutTxCommitted);
    Ok(())
}

/// Broadcasts right away if the lock time already passed, otherwise asks the wallet
/// to report it.
fn setup_payout_tx_lock_time_reached_listener(trade: &mut Trade) -> Result<(), TaskError> {
    if trade.state >= TradeState::PayoutBroadcast {
        return Ok(());
    }
    let services = services(trade)?;
    let lock_time = require(trade.lock_time_height, "lock_time_height")?;
    let height = services.wallet.best_chain_height()?;
    if height >= lock_time {
        log::info!(
            "[{}] Lock time {} already reached at height {}",
            short_id(trade.id()),
            lock_time,
            height
        );
        return broadcast_payout_tx(trade);
    }
    services.wallet.add_lock_time_listener(trade.id(), lock_time)?;
    Ok(())
}

fn broadcast_payout_tx(trade: &mut Trade) -> Result<(), TaskError> {
    if trade.state >= TradeState::PayoutBroadcast {
        return Ok(());
    }
    let services = services(trade)?;
    let payout_tx = require(trade.payout_tx.as_ref(), "payout_tx")?;
    let txid = services.wallet.broadcast_tx(payout_tx)?;
    log::info!("[{}] Payout broadcast: {}", short_id(trade.id()), txid);
    trade.set_state(TradeState::PayoutBroadcast);
    Ok(())
}

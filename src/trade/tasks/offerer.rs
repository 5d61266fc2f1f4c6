//! Steps run by the offerer.

use bitcoin::Amount;

use super::{
    arbitrator, check_trade_id, require, send_to_peer, services,
    shared::verify_take_offer_fee_payment, wrong_message,
};
use crate::{
    arbitration::select_arbitrator,
    protocol::{error::ProtocolError, DepositTxPublished, TradeMessage},
    task::{Task, TaskError},
    trade::model::{Contract, Trade},
    wallet::DepositTxParams,
};

pub(crate) const PROCESS_TAKE_OFFER_REQUEST: Task<Trade> =
    Task::new("ProcessTakeOfferRequest", process_take_offer_request);
pub(crate) const VERIFY_ARBITRATION_SELECTION: Task<Trade> =
    Task::new("VerifyArbitrationSelection", verify_arbitration_selection);
pub(crate) const VERIFY_TAKE_OFFER_FEE_TX: Task<Trade> =
    Task::new("VerifyTakeOfferFeeTx", verify_take_offer_fee_payment);
pub(crate) const CREATE_AND_SIGN_CONTRACT: Task<Trade> =
    Task::new("CreateAndSignContract", create_and_sign_contract);
pub(crate) const CREATE_AND_SIGN_DEPOSIT_TX: Task<Trade> =
    Task::new("CreateAndSignDepositTx", create_and_sign_deposit_tx);
pub(crate) const INIT_WAIT_PERIOD_FOR_OPEN_DISPUTE: Task<Trade> =
    Task::new("InitWaitPeriodForOpenDispute", init_wait_period_for_open_dispute);
pub(crate) const SETUP_DEPOSIT_BALANCE_LISTENER: Task<Trade> =
    Task::new("SetupDepositBalanceListener", setup_deposit_balance_listener);
pub(crate) const SEND_DEPOSIT_TX_PUBLISHED: Task<Trade> =
    Task::new("SendDepositTxPublished", send_deposit_tx_published);
pub(crate) const PROCESS_CONTRACT_COUNTERSIGNED: Task<Trade> =
    Task::new("ProcessContractCountersigned", process_contract_countersigned);

fn process_take_offer_request(trade: &mut Trade) -> Result<(), TaskError> {
    let request = match trade.process_model.take_message() {
        Some(TradeMessage::TakeOfferRequest(m)) => m,
        other => return Err(wrong_message("TakeOfferRequest", other)),
    };
    check_trade_id(trade, &request.trade_id)?;
    if request.offer_id != trade.offer.id {
        return Err(ProtocolError::ContractMismatch("offer_id").into());
    }
    if request.trade_amount == Amount::ZERO || request.trade_amount > trade.offer.amount {
        return Err(ProtocolError::InvalidTradeAmount.into());
    }

    trade.trade_amount = request.trade_amount;
    trade.arbitrator_address = Some(request.arbitrator_address);
    trade.process_model.take_offer_fee_txid = Some(request.take_offer_fee_txid);
    trade.process_model.peer_pubkey = Some(request.taker_pubkey);
    trade.process_model.peer_payout_address = Some(request.taker_payout_address);
    trade.process_model.peer_accepted_arbitrators = request.accepted_arbitrator_addresses;
    if trade.process_model.temp_trading_peer_address.is_none() {
        trade.process_model.temp_trading_peer_address = Some(request.taker_address);
    }
    Ok(())
}

/// Re-runs the selection rule on the taker's accepted arbitrators.
fn verify_arbitration_selection(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let received = require(trade.arbitrator_address.clone(), "arbitrator_address")?;
    if !services.arbitration.accepted_arbitrators().contains(&received) {
        return Err(ProtocolError::ArbitratorNotAccepted(received).into());
    }
    let expected = select_arbitrator(
        trade.id(),
        &trade.offer.arbitrator_addresses,
        &trade.process_model.peer_accepted_arbitrators,
    )?;
    if expected != received {
        return Err(ProtocolError::ArbitratorSelectionMismatch { expected, received }.into());
    }
    Ok(())
}

fn create_and_sign_contract(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let entry = trade.process_model.get_or_create_address_entry()?;
    let contract = Contract {
        offer_id: trade.offer.id.clone(),
        trade_amount: trade.trade_amount,
        fiat_amount: trade.offer.fiat_amount,
        currency_code: trade.offer.currency_code.clone(),
        offerer_is_buyer: trade.role.is_buyer(),
        offerer_address: services.transport.local_address(),
        taker_address: trade.process_model.require_peer_address()?.clone(),
        offerer_pubkey: entry.pubkey(),
        taker_pubkey: require(trade.process_model.peer_pubkey, "peer_pubkey")?,
        offerer_payout_address: entry.address().to_string(),
        taker_payout_address: require(
            trade.process_model.peer_payout_address.clone(),
            "peer_payout_address",
        )?,
        arbitrator_address: require(trade.arbitrator_address.clone(), "arbitrator_address")?,
        take_offer_fee_txid: require(
            trade.process_model.take_offer_fee_txid,
            "take_offer_fee_txid",
        )?,
    };
    let json = contract.to_json().map_err(ProtocolError::from)?;
    let hash = Contract::hash_json(&json);
    let signature = Contract::sign_hash(&hash, entry.keypair()?);

    trade.contract = Some(contract);
    trade.contract_json = Some(json);
    trade.contract_hash = Some(hash);
    trade.offerer_contract_signature = Some(signature);
    Ok(())
}

/// Builds, signs and publishes the 2-of-3 deposit.
fn create_and_sign_deposit_tx(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let contract = require(trade.contract.as_ref(), "contract")?;
    let entry = trade.process_model.require_address_entry()?;
    let arbitrator = arbitrator(trade, &services)?;
    let params = DepositTxParams {
        trade_id: trade.id().to_string(),
        trade_amount: trade.trade_amount,
        security_deposit: services.config.security_deposit(),
        tx_fee: services.config.tx_fee(),
        is_buyer: trade.role.is_buyer(),
        buyer_pubkey: contract.buyer_pubkey(),
        seller_pubkey: contract.seller_pubkey(),
        arbitrator_pubkey: arbitrator.btc_pubkey,
        take_offer_fee_txid: contract.take_offer_fee_txid,
    };
    let deposit_tx = services.wallet.create_and_sign_deposit_tx(entry, &params)?;
    services.wallet.broadcast_tx(&deposit_tx)?;
    trade.deposit_tx = Some(deposit_tx);
    Ok(())
}

fn init_wait_period_for_open_dispute(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let height = services.wallet.best_chain_height()?;
    trade.open_dispute_height = Some(height + services.config.open_dispute_delay_blocks);
    trade.lock_time_height = Some(height + services.config.lock_time_delta_blocks);
    Ok(())
}

fn setup_deposit_balance_listener(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let txid = require(trade.deposit_txid(), "deposit_tx")?;
    services.wallet.add_deposit_listener(trade.id(), txid)?;
    Ok(())
}

fn send_deposit_tx_published(trade: &mut Trade) -> Result<(), TaskError> {
    let entry = trade.process_model.require_address_entry()?;
    let notice = DepositTxPublished {
        trade_id: trade.id().to_string(),
        deposit_tx: require(trade.deposit_tx.clone(), "deposit_tx")?,
        contract_json: require(trade.contract_json.clone(), "contract_json")?,
        offerer_contract_signature: require(
            trade.offerer_contract_signature,
            "offerer_contract_signature",
        )?,
        offerer_pubkey: entry.pubkey(),
        lock_time_height: require(trade.lock_time_height, "lock_time_height")?,
        open_dispute_height: require(trade.open_dispute_height, "open_dispute_height")?,
    };
    send_to_peer(trade, TradeMessage::DepositTxPublished(Box::new(notice)))
}

/// Verifies the taker's signature against the contract the offerer signed.
fn process_contract_countersigned(trade: &mut Trade) -> Result<(), TaskError> {
    let message = match trade.process_model.take_message() {
        Some(TradeMessage::ContractCountersigned(m)) => m,
        other => return Err(wrong_message("ContractCountersigned", other)),
    };
    check_trade_id(trade, &message.trade_id)?;
    let hash = require(trade.contract_hash, "contract_hash")?;
    let taker_pubkey = require(trade.contract.as_ref(), "contract")?.taker_pubkey;
    Contract::verify_hash_signature(&hash, &message.taker_contract_signature, &taker_pubkey)?;
    trade.taker_contract_signature = Some(message.taker_contract_signature);
    Ok(())
}

//! Steps run by the taker.

use super::{arbitrator, check_trade_id, require, send_to_peer, services, wrong_message};
use crate::{
    arbitration::select_arbitrator,
    protocol::{error::ProtocolError, ContractCountersigned, TakeOfferRequest, TradeMessage},
    task::{Task, TaskError},
    trade::model::{Contract, Trade},
};

pub(crate) const SELECT_ARBITRATOR: Task<Trade> =
    Task::new("SelectArbitrator", select_offer_arbitrator);
pub(crate) const CREATE_TAKE_OFFER_FEE_TX: Task<Trade> =
    Task::new("CreateTakeOfferFeeTx", create_take_offer_fee_tx);
pub(crate) const SEND_TAKE_OFFER_REQUEST: Task<Trade> =
    Task::new("SendTakeOfferRequest", send_take_offer_request);
pub(crate) const PROCESS_DEPOSIT_TX_PUBLISHED: Task<Trade> =
    Task::new("ProcessDepositTxPublished", process_deposit_tx_published);
pub(crate) const SIGN_CONTRACT: Task<Trade> = Task::new("SignContract", sign_contract);
pub(crate) const ADD_DEPOSIT_TX_TO_WALLET: Task<Trade> =
    Task::new("AddDepositTxToWallet", add_deposit_tx_to_wallet);
pub(crate) const SEND_CONTRACT_COUNTERSIGNED: Task<Trade> =
    Task::new("SendContractCountersigned", send_contract_countersigned);

fn select_offer_arbitrator(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let accepted = services.arbitration.accepted_arbitrators();
    let selected = select_arbitrator(trade.id(), &trade.offer.arbitrator_addresses, &accepted)?;
    trade.arbitrator_address = Some(selected);
    trade.process_model.temp_trading_peer_address = Some(trade.offer.offerer_address.clone());
    Ok(())
}

/// A retry re-broadcasts the fee transaction of the failed attempt instead of paying twice.
fn create_take_offer_fee_tx(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    if let Some(fee_tx) = &trade.process_model.take_offer_fee_tx {
        let txid = services.wallet.broadcast_tx(fee_tx)?;
        trade.process_model.take_offer_fee_txid = Some(txid);
        return Ok(());
    }
    let entry = trade.process_model.get_or_create_address_entry()?;
    let arbitrator = arbitrator(trade, &services)?;
    let fee_tx = services.wallet.create_take_offer_fee_tx(
        &entry,
        services.config.take_offer_fee(),
        &arbitrator.btc_address,
    )?;
    let txid = services.wallet.broadcast_tx(&fee_tx)?;
    trade.process_model.take_offer_fee_txid = Some(txid);
    trade.process_model.take_offer_fee_tx = Some(fee_tx);
    Ok(())
}

fn send_take_offer_request(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let entry = trade.process_model.require_address_entry()?;
    let request = TakeOfferRequest {
        trade_id: trade.id().to_string(),
        offer_id: trade.offer.id.clone(),
        trade_amount: trade.trade_amount,
        take_offer_fee_txid: require(
            trade.process_model.take_offer_fee_txid,
            "take_offer_fee_txid",
        )?,
        taker_address: services.transport.local_address(),
        taker_pubkey: entry.pubkey(),
        taker_payout_address: entry.address().to_string(),
        accepted_arbitrator_addresses: services.arbitration.accepted_arbitrators(),
        arbitrator_address: require(trade.arbitrator_address.clone(), "arbitrator_address")?,
    };
    send_to_peer(trade, TradeMessage::TakeOfferRequest(request))
}

/// Checks the offerer's contract against what the taker asked for, then stores the
/// deposit and the contract.
fn process_deposit_tx_published(trade: &mut Trade) -> Result<(), TaskError> {
    let message = match trade.process_model.take_message() {
        Some(TradeMessage::DepositTxPublished(m)) => *m,
        other => return Err(wrong_message("DepositTxPublished", other)),
    };
    check_trade_id(trade, &message.trade_id)?;

    let contract = Contract::from_json(&message.contract_json).map_err(ProtocolError::from)?;
    let entry = trade.process_model.require_address_entry()?;
    let mismatch = |field| TaskError::Protocol(ProtocolError::ContractMismatch(field));
    if contract.offer_id != trade.id() {
        return Err(mismatch("offer_id"));
    }
    if contract.trade_amount != trade.trade_amount {
        return Err(mismatch("trade_amount"));
    }
    if contract.fiat_amount != trade.offer.fiat_amount {
        return Err(mismatch("fiat_amount"));
    }
    if contract.currency_code != trade.offer.currency_code {
        return Err(mismatch("currency_code"));
    }
    if contract.offerer_address != trade.offer.offerer_address {
        return Err(mismatch("offerer_address"));
    }
    if contract.taker_address != services(trade)?.transport.local_address() {
        return Err(mismatch("taker_address"));
    }
    if contract.offerer_is_buyer == trade.role.is_buyer() {
        return Err(mismatch("offerer_is_buyer"));
    }
    if contract.taker_pubkey != entry.pubkey() {
        return Err(mismatch("taker_pubkey"));
    }
    if contract.taker_payout_address != entry.address().to_string() {
        return Err(mismatch("taker_payout_address"));
    }
    if contract.offerer_pubkey != message.offerer_pubkey {
        return Err(mismatch("offerer_pubkey"));
    }
    if Some(&contract.arbitrator_address) != trade.arbitrator_address.as_ref() {
        return Err(mismatch("arbitrator_address"));
    }
    if Some(contract.take_offer_fee_txid) != trade.process_model.take_offer_fee_txid {
        return Err(mismatch("take_offer_fee_txid"));
    }

    let hash = Contract::hash_json(&message.contract_json);
    Contract::verify_hash_signature(
        &hash,
        &message.offerer_contract_signature,
        &message.offerer_pubkey,
    )?;

    trade.process_model.peer_pubkey = Some(message.offerer_pubkey);
    trade.process_model.peer_payout_address = Some(contract.offerer_payout_address.clone());
    trade.deposit_tx = Some(message.deposit_tx);
    trade.contract = Some(contract);
    trade.contract_json = Some(message.contract_json);
    trade.contract_hash = Some(hash);
    trade.offerer_contract_signature = Some(message.offerer_contract_signature);
    trade.lock_time_height = Some(message.lock_time_height);
    trade.open_dispute_height = Some(message.open_dispute_height);
    Ok(())
}

fn sign_contract(trade: &mut Trade) -> Result<(), TaskError> {
    let hash = require(trade.contract_hash, "contract_hash")?;
    let entry = trade.process_model.require_address_entry()?;
    let signature = Contract::sign_hash(&hash, entry.keypair()?);
    trade.taker_contract_signature = Some(signature);
    Ok(())
}

fn add_deposit_tx_to_wallet(trade: &mut Trade) -> Result<(), TaskError> {
    let services = services(trade)?;
    let deposit_tx = require(trade.deposit_tx.as_ref(), "deposit_tx")?;
    services.wallet.add_tx_to_wallet(deposit_tx)?;
    services
        .wallet
        .add_deposit_listener(trade.id(), deposit_tx.compute_txid())?;
    Ok(())
}

/// Hands the taker's signature to the offerer, so both sides hold the fully signed
/// contract for a dispute.
fn send_contract_countersigned(trade: &mut Trade) -> Result<(), TaskError> {
    let signature = require(trade.taker_contract_signature, "taker_contract_signature")?;
    let message = ContractCountersigned {
        trade_id: trade.id().to_string(),
        taker_contract_signature: signature,
    };
    send_to_peer(trade, TradeMessage::ContractCountersigned(message))
}

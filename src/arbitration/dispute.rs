//! Escalating a trade to its arbitrator.

use bitcoin::{
    consensus::encode::serialize,
    hashes::sha256,
    secp256k1::{ecdsa::Signature, PublicKey},
    Txid,
};
use serde::{Deserialize, Serialize};

use super::{error::ArbitrationError, ArbitrationService, Arbitrator};
use crate::{
    protocol::messages::PeerAddress,
    trade::{DisputeState, Trade},
    utill::{now_secs, short_id},
};

/// Snapshot of a trade handed to the arbitrator. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    trade_id: String,
    trader_is_buyer: bool,
    trader_is_offerer: bool,
    trade_date: u64,
    opening_date: u64,
    deposit_tx: Option<Vec<u8>>,
    deposit_txid: Option<Txid>,
    payout_tx: Option<Vec<u8>>,
    payout_txid: Option<Txid>,
    contract_json: Option<String>,
    contract_hash: Option<sha256::Hash>,
    offerer_contract_signature: Option<Signature>,
    taker_contract_signature: Option<Signature>,
    arbitrator_address: PeerAddress,
    arbitrator_pubkey: PublicKey,
    arbitrator_pub_key_ring: Vec<u8>,
    is_support_ticket: bool,
}

impl Dispute {
    fn new(trade: &Trade, arbitrator: &Arbitrator, is_support_ticket: bool) -> Self {
        Self {
            trade_id: trade.id().to_string(),
            trader_is_buyer: trade.role().is_buyer(),
            trader_is_offerer: trade.role().is_offerer(),
            trade_date: trade.created_at(),
            opening_date: now_secs(),
            deposit_tx: trade.deposit_tx().map(serialize),
            deposit_txid: trade.deposit_txid(),
            payout_tx: trade.payout_tx().map(serialize),
            payout_txid: trade.payout_txid(),
            contract_json: trade.contract_json().map(str::to_string),
            contract_hash: trade.contract_hash(),
            offerer_contract_signature: trade.offerer_contract_signature().copied(),
            taker_contract_signature: trade.taker_contract_signature().copied(),
            arbitrator_address: arbitrator.address.clone(),
            arbitrator_pubkey: arbitrator.btc_pubkey,
            arbitrator_pub_key_ring: arbitrator.pub_key_ring.clone(),
            is_support_ticket,
        }
    }

    /// Id of the disputed trade.
    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    /// Whether this is a support ticket rather than a dispute.
    pub fn is_support_ticket(&self) -> bool {
        self.is_support_ticket
    }

    /// Whether the opening trader is the buyer.
    pub fn trader_is_buyer(&self) -> bool {
        self.trader_is_buyer
    }

    /// Whether the opening trader is the offerer.
    pub fn trader_is_offerer(&self) -> bool {
        self.trader_is_offerer
    }

    /// Time the dispute was opened, seconds since UNIX epoch.
    pub fn opening_date(&self) -> u64 {
        self.opening_date
    }

    /// Time the trade was created.
    pub fn trade_date(&self) -> u64 {
        self.trade_date
    }

    /// Consensus encoded deposit transaction, if published.
    pub fn deposit_tx(&self) -> Option<&[u8]> {
        self.deposit_tx.as_deref()
    }

    /// Deposit txid, if published.
    pub fn deposit_txid(&self) -> Option<Txid> {
        self.deposit_txid
    }

    /// Consensus encoded payout transaction, if signed.
    pub fn payout_tx(&self) -> Option<&[u8]> {
        self.payout_tx.as_deref()
    }

    /// Payout txid, if signed.
    pub fn payout_txid(&self) -> Option<Txid> {
        self.payout_txid
    }

    /// Contract JSON, if signed.
    pub fn contract_json(&self) -> Option<&str> {
        self.contract_json.as_deref()
    }

    /// Contract hash, if signed.
    pub fn contract_hash(&self) -> Option<sha256::Hash> {
        self.contract_hash
    }

    /// Contract signatures of offerer and taker.
    pub fn contract_signatures(&self) -> (Option<&Signature>, Option<&Signature>) {
        (
            self.offerer_contract_signature.as_ref(),
            self.taker_contract_signature.as_ref(),
        )
    }

    /// Arbitrator handling the dispute.
    pub fn arbitrator_address(&self) -> &PeerAddress {
        &self.arbitrator_address
    }

    /// Arbitrator's multisig key.
    pub fn arbitrator_pubkey(&self) -> PublicKey {
        self.arbitrator_pubkey
    }

    /// Arbitrator's encryption key material.
    pub fn arbitrator_pub_key_ring(&self) -> &[u8] {
        &self.arbitrator_pub_key_ring
    }
}

/// Opens a dispute or support ticket for `trade`.
///
/// The trade moves to [DisputeState::DisputeRequested] before the dispute is sent.
/// A failed send is returned as [ArbitrationError::Delivery] and leaves that state in
/// place; the dispute is never sent twice from here.
pub fn open_dispute(
    trade: &mut Trade,
    arbitration: &dyn ArbitrationService,
    is_support_ticket: bool,
) -> Result<Dispute, ArbitrationError> {
    if trade.dispute_state() != DisputeState::None {
        return Err(ArbitrationError::DisputeAlreadyOpen);
    }
    let address = trade
        .arbitrator_address()
        .cloned()
        .ok_or(ArbitrationError::NoArbitratorSelected)?;
    let arbitrator = arbitration
        .arbitrator_by_address(&address)
        .ok_or(ArbitrationError::UnknownArbitrator(address))?;

    let dispute = Dispute::new(trade, &arbitrator, is_support_ticket);
    trade.set_dispute_state(DisputeState::DisputeRequested);
    log::warn!(
        "[{}] Opening {} with arbitrator {}",
        short_id(trade.id()),
        if is_support_ticket {
            "support ticket"
        } else {
            "dispute"
        },
        arbitrator.address
    );

    if let Err(e) = arbitration.send_open_dispute(&dispute) {
        log::error!(
            "[{}] Failed to deliver dispute to {}: {}",
            short_id(trade.id()),
            arbitrator.address,
            e
        );
        return Err(match e {
            ArbitrationError::Delivery(msg) => ArbitrationError::Delivery(msg),
            other => ArbitrationError::Delivery(other.to_string()),
        });
    }
    Ok(dispute)
}

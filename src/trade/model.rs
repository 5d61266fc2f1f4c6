//! Offers, contracts and the persistent [Trade] entity.

use std::fmt;

use bitcoin::{
    hashes::{sha256, Hash},
    secp256k1::{ecdsa::Signature, Keypair, Message, PublicKey, Secp256k1},
    Amount, Transaction, Txid,
};
use serde::{Deserialize, Serialize};

use super::{
    process_model::ProcessModel,
    state::{DisputeState, Phase, TradeState},
};
use crate::{
    protocol::{error::ProtocolError, messages::PeerAddress},
    utill::{now_secs, short_id},
};

/// What the offerer wants to do with bitcoin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferDirection {
    /// The offerer buys bitcoin and pays fiat.
    Buy,
    /// The offerer sells bitcoin for fiat.
    Sell,
}

/// A published offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    /// Offer id. Also the id of the trade taking it.
    pub id: String,
    /// Offerer's side of the trade.
    pub direction: OfferDirection,
    /// Bitcoin amount offered.
    pub amount: Amount,
    /// Fiat amount in the currency's minor unit.
    pub fiat_amount: u64,
    /// ISO currency code of the fiat side.
    pub currency_code: String,
    /// Address the offerer is reachable at.
    pub offerer_address: PeerAddress,
    /// Arbitrators the offerer accepts.
    pub arbitrator_addresses: Vec<PeerAddress>,
    /// Creation time, seconds since UNIX epoch.
    pub created_at: u64,
}

/// Fiat role of the local trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FiatRole {
    /// Pays fiat, receives bitcoin.
    Buyer,
    /// Receives fiat, releases bitcoin.
    Seller,
}

/// Whether the local trader published or took the offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryRole {
    /// Published the offer.
    Offerer,
    /// Took the offer.
    Taker,
}

/// The two orthogonal role axes of a trader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradeRole {
    /// Buyer or seller.
    pub fiat: FiatRole,
    /// Offerer or taker.
    pub entry: EntryRole,
}

impl TradeRole {
    /// Role of the local trader on `offer`.
    pub fn for_offer(direction: OfferDirection, entry: EntryRole) -> Self {
        let fiat = match (direction, entry) {
            (OfferDirection::Buy, EntryRole::Offerer) | (OfferDirection::Sell, EntryRole::Taker) => {
                FiatRole::Buyer
            }
            (OfferDirection::Sell, EntryRole::Offerer) | (OfferDirection::Buy, EntryRole::Taker) => {
                FiatRole::Seller
            }
        };
        Self { fiat, entry }
    }

    /// Whether the trader pays fiat.
    pub fn is_buyer(&self) -> bool {
        self.fiat == FiatRole::Buyer
    }

    /// Whether the trader published the offer.
    pub fn is_offerer(&self) -> bool {
        self.entry == EntryRole::Offerer
    }
}

impl fmt::Display for TradeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}As{:?}", self.fiat, self.entry)
    }
}

/// Terms both traders sign before the deposit is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    /// Id of the offer being traded.
    pub offer_id: String,
    /// Bitcoin amount traded.
    pub trade_amount: Amount,
    /// Fiat amount in the currency's minor unit.
    pub fiat_amount: u64,
    /// ISO currency code.
    pub currency_code: String,
    /// Whether the offerer is the buyer.
    pub offerer_is_buyer: bool,
    /// Offerer's network address.
    pub offerer_address: PeerAddress,
    /// Taker's network address.
    pub taker_address: PeerAddress,
    /// Offerer's trade key.
    pub offerer_pubkey: PublicKey,
    /// Taker's trade key.
    pub taker_pubkey: PublicKey,
    /// Offerer's payout address.
    pub offerer_payout_address: String,
    /// Taker's payout address.
    pub taker_payout_address: String,
    /// Arbitrator of the trade.
    pub arbitrator_address: PeerAddress,
    /// Taker's fee transaction.
    pub take_offer_fee_txid: Txid,
}

impl Contract {
    /// Canonical JSON of the contract. Field order is fixed by the struct.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a contract from its JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Contract hash: SHA-256 of the canonical JSON.
    pub fn hash_json(json: &str) -> sha256::Hash {
        sha256::Hash::hash(json.as_bytes())
    }

    /// Signs a contract hash with a trade key.
    pub fn sign_hash(hash: &sha256::Hash, keypair: &Keypair) -> Signature {
        let secp = Secp256k1::new();
        let msg = Message::from_digest(hash.to_byte_array());
        secp.sign_ecdsa(&msg, &keypair.secret_key())
    }

    /// Verifies a signature over a contract hash.
    pub fn verify_hash_signature(
        hash: &sha256::Hash,
        signature: &Signature,
        pubkey: &PublicKey,
    ) -> Result<(), ProtocolError> {
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest(hash.to_byte_array());
        secp.verify_ecdsa(&msg, signature, pubkey)
            .map_err(|_| ProtocolError::InvalidContractSignature)
    }

    /// Payout address of the buyer.
    pub fn buyer_payout_address(&self) -> &str {
        if self.offerer_is_buyer {
            &self.offerer_payout_address
        } else {
            &self.taker_payout_address
        }
    }

    /// Payout address of the seller.
    pub fn seller_payout_address(&self) -> &str {
        if self.offerer_is_buyer {
            &self.taker_payout_address
        } else {
            &self.offerer_payout_address
        }
    }

    /// Multisig key of the buyer.
    pub fn buyer_pubkey(&self) -> PublicKey {
        if self.offerer_is_buyer {
            self.offerer_pubkey
        } else {
            self.taker_pubkey
        }
    }

    /// Multisig key of the seller.
    pub fn seller_pubkey(&self) -> PublicKey {
        if self.offerer_is_buyer {
            self.taker_pubkey
        } else {
            self.offerer_pubkey
        }
    }
}

/// One negotiated exchange.
///
/// Mutated only by the tasks of its protocol and by the explicit UI transitions; the
/// owning [TradeProtocol](super::TradeProtocol) serializes all of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub(crate) id: String,
    pub(crate) offer: Offer,
    pub(crate) role: TradeRole,
    pub(crate) state: TradeState,
    pub(crate) dispute_state: DisputeState,
    pub(crate) trade_amount: Amount,
    pub(crate) arbitrator_address: Option<PeerAddress>,
    pub(crate) deposit_tx: Option<Transaction>,
    pub(crate) payout_tx: Option<Transaction>,
    pub(crate) contract: Option<Contract>,
    pub(crate) contract_json: Option<String>,
    pub(crate) contract_hash: Option<sha256::Hash>,
    pub(crate) offerer_contract_signature: Option<Signature>,
    pub(crate) taker_contract_signature: Option<Signature>,
    pub(crate) created_at: u64,
    pub(crate) lock_time_height: Option<u32>,
    pub(crate) open_dispute_height: Option<u32>,
    pub(crate) error_message: Option<String>,
    pub(crate) process_model: ProcessModel,
}

impl Trade {
    /// Creates a trade on `offer` for the local trader's `entry` role.
    pub fn new(offer: Offer, entry: EntryRole, trade_amount: Amount) -> Self {
        let role = TradeRole::for_offer(offer.direction, entry);
        Self {
            id: offer.id.clone(),
            process_model: ProcessModel::new(&offer.id),
            offer,
            role,
            state: TradeState::Preparation,
            dispute_state: DisputeState::None,
            trade_amount,
            arbitrator_address: None,
            deposit_tx: None,
            payout_tx: None,
            contract: None,
            contract_json: None,
            contract_hash: None,
            offerer_contract_signature: None,
            taker_contract_signature: None,
            created_at: now_secs(),
            lock_time_height: None,
            open_dispute_height: None,
            error_message: None,
        }
    }

    /// Trade id. Equal to the offer id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The traded offer.
    pub fn offer(&self) -> &Offer {
        &self.offer
    }

    /// Role of the local trader.
    pub fn role(&self) -> TradeRole {
        self.role
    }

    /// Detailed state.
    pub fn state(&self) -> TradeState {
        self.state
    }

    /// Coarse phase.
    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    /// Dispute state.
    pub fn dispute_state(&self) -> DisputeState {
        self.dispute_state
    }

    /// Traded bitcoin amount.
    pub fn trade_amount(&self) -> Amount {
        self.trade_amount
    }

    /// Counterparty address.
    pub fn trading_peer_address(&self) -> Option<&PeerAddress> {
        self.process_model.temp_trading_peer_address.as_ref()
    }

    /// Selected arbitrator.
    pub fn arbitrator_address(&self) -> Option<&PeerAddress> {
        self.arbitrator_address.as_ref()
    }

    /// The deposit transaction, once published.
    pub fn deposit_tx(&self) -> Option<&Transaction> {
        self.deposit_tx.as_ref()
    }

    /// Txid of the deposit transaction.
    pub fn deposit_txid(&self) -> Option<Txid> {
        self.deposit_tx.as_ref().map(|tx| tx.compute_txid())
    }

    /// The payout transaction, once signed by both.
    pub fn payout_tx(&self) -> Option<&Transaction> {
        self.payout_tx.as_ref()
    }

    /// Txid of the payout transaction.
    pub fn payout_txid(&self) -> Option<Txid> {
        self.payout_tx.as_ref().map(|tx| tx.compute_txid())
    }

    /// The signed contract.
    pub fn contract(&self) -> Option<&Contract> {
        self.contract.as_ref()
    }

    /// Canonical contract JSON.
    pub fn contract_json(&self) -> Option<&str> {
        self.contract_json.as_deref()
    }

    /// Contract hash.
    pub fn contract_hash(&self) -> Option<sha256::Hash> {
        self.contract_hash
    }

    /// Offerer's contract signature.
    pub fn offerer_contract_signature(&self) -> Option<&Signature> {
        self.offerer_contract_signature.as_ref()
    }

    /// Taker's contract signature.
    pub fn taker_contract_signature(&self) -> Option<&Signature> {
        self.taker_contract_signature.as_ref()
    }

    /// Creation time, seconds since UNIX epoch.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Block height from which the payout transaction is valid.
    pub fn lock_time_height(&self) -> Option<u32> {
        self.lock_time_height
    }

    /// Block height from which a dispute may be opened.
    pub fn open_dispute_height(&self) -> Option<u32> {
        self.open_dispute_height
    }

    /// Cause of the last failure, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The trade's protocol context.
    pub fn process_model(&self) -> &ProcessModel {
        &self.process_model
    }

    /// Moves to `state`. Refused, with a warning, if the state would move backwards.
    pub(crate) fn set_state(&mut self, state: TradeState) -> bool {
        if state < self.state {
            log::warn!(
                "[{}] Refusing to move state back from {} to {}",
                short_id(&self.id),
                self.state,
                state
            );
            return false;
        }
        if state != self.state {
            log::info!("[{}] State {} -> {}", short_id(&self.id), self.state, state);
            self.state = state;
        }
        true
    }

    /// Puts back the state committed before a failed sequence.
    pub(crate) fn restore_state(&mut self, state: TradeState) {
        if state != self.state {
            log::warn!("[{}] Rolling back {} to {}", short_id(&self.id), self.state, state);
            self.state = state;
        }
    }

    /// Moves the dispute state forward. Returns `false` if the transition isn't allowed.
    pub(crate) fn set_dispute_state(&mut self, next: DisputeState) -> bool {
        if !self.dispute_state.can_transition_to(next) {
            log::warn!(
                "[{}] Ignoring dispute transition {} -> {}",
                short_id(&self.id),
                self.dispute_state,
                next
            );
            return false;
        }
        log::info!(
            "[{}] Dispute state {} -> {}",
            short_id(&self.id),
            self.dispute_state,
            next
        );
        self.dispute_state = next;
        true
    }

    pub(crate) fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }
}

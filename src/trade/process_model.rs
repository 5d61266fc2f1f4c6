//! Per-trade protocol context.
//!
//! The [ProcessModel] is shared by all tasks of one trade. It holds what the protocol
//! learned from the peer so far and handles to the external services. The service
//! handles and key material are transient: they are skipped when the trade is saved
//! and re-bound through [ProcessModel::on_all_services_initialized] after loading.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use bitcoin::{secp256k1::PublicKey, Transaction, Txid};
use serde::{Deserialize, Serialize};

use super::config::TradeConfig;
use crate::{
    arbitration::ArbitrationService,
    protocol::{error::ProtocolError, messages::PeerAddress, TradeMessage},
    task::{Intercept, TaskError},
    transport::Transport,
    wallet::{AddressEntry, AddressEntryList, TradeWallet, WalletError},
};

/// Handles to the external collaborators of a trade.
#[derive(Clone)]
pub struct Services {
    /// Bitcoin wallet.
    pub wallet: Arc<dyn TradeWallet>,
    /// P2P transport.
    pub transport: Arc<dyn Transport>,
    /// Arbitrator registry and dispute channel.
    pub arbitration: Arc<dyn ArbitrationService>,
    /// Dedicated trade addresses, shared by all trades.
    pub address_book: Arc<Mutex<AddressEntryList>>,
    /// Engine configuration.
    pub config: Arc<TradeConfig>,
}

/// Mutable context shared by the tasks of one trade.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProcessModel {
    trade_id: String,
    /// Last received message, not yet validated.
    pub(crate) trade_message: Option<TradeMessage>,
    /// Address the counterparty is reachable at for this trade.
    pub(crate) temp_trading_peer_address: Option<PeerAddress>,
    pub(crate) address_entry: Option<AddressEntry>,
    pub(crate) take_offer_fee_txid: Option<Txid>,
    /// Only known on the taker side.
    pub(crate) take_offer_fee_tx: Option<Transaction>,
    pub(crate) peer_pubkey: Option<PublicKey>,
    pub(crate) peer_payout_address: Option<String>,
    pub(crate) peer_accepted_arbitrators: Vec<PeerAddress>,
    /// Payout transaction carrying the seller's signature only.
    pub(crate) pending_payout_tx: Option<Transaction>,
    completed: bool,
    #[serde(skip)]
    services: Option<Services>,
    #[serde(skip)]
    intercept: Option<Intercept>,
}

impl ProcessModel {
    /// Creates the context of a new trade.
    pub fn new(trade_id: &str) -> Self {
        Self {
            trade_id: trade_id.to_string(),
            trade_message: None,
            temp_trading_peer_address: None,
            address_entry: None,
            take_offer_fee_txid: None,
            take_offer_fee_tx: None,
            peer_pubkey: None,
            peer_payout_address: None,
            peer_accepted_arbitrators: Vec::new(),
            pending_payout_tx: None,
            completed: false,
            services: None,
            intercept: None,
        }
    }

    /// Id of the trade.
    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    /// Binds the service handles and re-derives the trade key of a loaded trade.
    pub fn on_all_services_initialized(&mut self, services: Services) -> Result<(), WalletError> {
        if let Some(entry) = self.address_entry.as_mut() {
            entry.rehydrate(services.wallet.as_ref())?;
            services
                .address_book
                .lock()
                .map_err(|_| WalletError::General("Address book lock poisoned".to_string()))?
                .restore(entry.clone());
        }
        self.services = Some(services);
        Ok(())
    }

    /// Bound service handles.
    pub fn services(&self) -> Result<&Services, TaskError> {
        self.services
            .as_ref()
            .ok_or_else(|| TaskError::General("Trade services not initialized".to_string()))
    }

    /// Whether services are bound.
    pub fn has_services(&self) -> bool {
        self.services.is_some()
    }

    /// Takes the pending inbound message.
    pub(crate) fn take_message(&mut self) -> Option<TradeMessage> {
        self.trade_message.take()
    }

    /// The trade's dedicated address entry.
    pub fn address_entry(&self) -> Option<&AddressEntry> {
        self.address_entry.as_ref()
    }

    /// Returns the trade's address entry, allocating it on first use.
    pub(crate) fn get_or_create_address_entry(&mut self) -> Result<AddressEntry, TaskError> {
        if let Some(entry) = &self.address_entry {
            return Ok(entry.clone());
        }
        let services = self.services()?;
        let entry = services
            .address_book
            .lock()
            .map_err(|_| TaskError::General("Address book lock poisoned".to_string()))?
            .get_or_create_trade_entry(&self.trade_id, services.wallet.as_ref())?;
        self.address_entry = Some(entry.clone());
        Ok(entry)
    }

    /// The allocated address entry, or a missing field error.
    pub(crate) fn require_address_entry(&self) -> Result<&AddressEntry, TaskError> {
        self.address_entry
            .as_ref()
            .ok_or(TaskError::Protocol(ProtocolError::MissingField("address_entry")))
    }

    /// Counterparty address, or a missing field error.
    pub(crate) fn require_peer_address(&self) -> Result<&PeerAddress, TaskError> {
        self.temp_trading_peer_address
            .as_ref()
            .ok_or(TaskError::Protocol(ProtocolError::MissingField(
                "temp_trading_peer_address",
            )))
    }

    /// Txid of the take-offer fee transaction.
    pub fn take_offer_fee_txid(&self) -> Option<Txid> {
        self.take_offer_fee_txid
    }

    /// Whether the normal trade path completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Marks the trade complete and releases its address entry. Idempotent.
    pub(crate) fn on_complete(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        if let Some(entry) = self.address_entry.as_mut() {
            entry.mark_released();
        }
        if let Some(services) = &self.services {
            match services.address_book.lock() {
                Ok(mut book) => {
                    book.release_trade_entry(&self.trade_id);
                }
                Err(_) => log::error!("Address book lock poisoned, entry not released"),
            }
        }
    }

    pub(crate) fn intercept(&self) -> Option<Intercept> {
        self.intercept
    }

    pub(crate) fn set_intercept(&mut self, intercept: Option<Intercept>) {
        self.intercept = intercept;
    }
}

impl fmt::Debug for ProcessModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessModel")
            .field("trade_id", &self.trade_id)
            .field("trade_message", &self.trade_message)
            .field("temp_trading_peer_address", &self.temp_trading_peer_address)
            .field("address_entry", &self.address_entry)
            .field("take_offer_fee_txid", &self.take_offer_fee_txid)
            .field("peer_pubkey", &self.peer_pubkey)
            .field("completed", &self.completed)
            .field("services", &self.services.is_some())
            .finish()
    }
}

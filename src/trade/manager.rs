//! Owner of all trades and entry point for every external event.
//!
//! The manager resolves inbound messages, UI actions and wallet callbacks to the
//! owning [TradeProtocol]. Each protocol sits behind its own mutex, so events of one
//! trade run one at a time while different trades proceed in parallel. Waiters on the
//! same trade are not queued, so two events racing for one trade may run in either
//! order; the phase windows of the protocol decide what each of them may still do.
//!
//! Inbound messages come in through two doors that share one handler:
//!
//! ```text
//! on_direct_message  ──────────────────────────┐
//!                                              ├──> TradeProtocol::handle_message
//! on_mailbox_message ── re-bind services ──────┘
//! ```

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, RwLock},
    time::{Duration, Instant},
};

use bitcoin::{Amount, Txid};

use super::{
    error::TradeError,
    model::{EntryRole, Offer, Trade},
    process_model::Services,
    protocol::TradeProtocol,
    state::{DisputeState, Phase},
    storage::TradeStore,
};
use crate::{
    arbitration::Dispute,
    protocol::{
        error::ProtocolError,
        messages::{MailboxMessage, PeerAddress, TradeMessage},
        wire,
    },
    task::Intercept,
    utill::short_id,
};

/// How an inbound message reached us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Direct,
    Mailbox,
}

/// Owns the trades and dispatches events to them.
pub struct TradeManager {
    services: Services,
    trades: RwLock<HashMap<String, Arc<Mutex<TradeProtocol>>>>,
    open_offers: RwLock<HashMap<String, Offer>>,
    store: Option<TradeStore>,
}

impl TradeManager {
    /// Creates a manager without persistence.
    pub fn new(services: Services) -> Self {
        Self {
            services,
            trades: RwLock::new(HashMap::new()),
            open_offers: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Creates a manager persisting to `data_dir` and resumes every stored trade.
    pub fn load(services: Services, data_dir: &Path) -> Result<Self, TradeError> {
        let store = TradeStore::open(
            data_dir,
            Duration::from_millis(services.config.storage_save_delay_ms),
        )?;

        let mut trades = HashMap::new();
        for trade in store.trades()? {
            let id = trade.id().to_string();
            log::info!(
                "[{}] Resuming {} trade in state {}",
                short_id(&id),
                trade.role(),
                trade.state()
            );
            let protocol = TradeProtocol::new(trade, services.clone())?;
            store.update(protocol.trade())?;
            trades.insert(id, Arc::new(Mutex::new(protocol)));
        }
        // Resuming may have moved trades on.
        if !trades.is_empty() {
            store.save_later();
        }

        Ok(Self {
            services,
            trades: RwLock::new(trades),
            open_offers: RwLock::new(HashMap::new()),
            store: Some(store),
        })
    }

    /// Publishes an offer the local trader is the offerer of.
    pub fn place_offer(&self, offer: Offer) -> Result<(), TradeError> {
        if self.trades.read()?.contains_key(&offer.id) {
            return Err(TradeError::DuplicateTrade(offer.id));
        }
        log::info!("[{}] Offer placed", short_id(&offer.id));
        self.open_offers.write()?.insert(offer.id.clone(), offer);
        Ok(())
    }

    /// Withdraws an open offer. Returns `false` if it wasn't open.
    pub fn cancel_offer(&self, offer_id: &str) -> Result<bool, TradeError> {
        Ok(self.open_offers.write()?.remove(offer_id).is_some())
    }

    /// Takes `offer` for `amount`, as taker.
    ///
    /// Calling it again for a trade whose first attempt failed retries the attempt.
    pub fn take_offer(&self, offer: Offer, amount: Amount) -> Result<(), TradeError> {
        if amount == Amount::ZERO || amount > offer.amount {
            return Err(ProtocolError::InvalidTradeAmount.into());
        }
        let id = offer.id.clone();
        let protocol = {
            let mut trades = self.trades.write()?;
            match trades.get(&id) {
                Some(existing) => existing.clone(),
                None => {
                    let trade = Trade::new(offer, EntryRole::Taker, amount);
                    let protocol = Arc::new(Mutex::new(TradeProtocol::new(
                        trade,
                        self.services.clone(),
                    )?));
                    trades.insert(id.clone(), protocol.clone());
                    protocol
                }
            }
        };
        let mut protocol = protocol.lock()?;
        let result = protocol.take_offer();
        self.persist(protocol.trade());
        result
    }

    /// Entry point for messages from an online peer.
    pub fn on_direct_message(
        &self,
        message: TradeMessage,
        sender: PeerAddress,
    ) -> Result<(), TradeError> {
        self.dispatch(message, sender, Delivery::Direct)
    }

    /// Entry point for messages recovered from the mailbox.
    pub fn on_mailbox_message(&self, mailbox: MailboxMessage) -> Result<(), TradeError> {
        if !mailbox.message.is_mailbox_message() {
            log::warn!(
                "Dropping {} from {}: not a mailbox message",
                mailbox.message,
                mailbox.sender_address
            );
            return Err(ProtocolError::WrongMessage {
                expected: "mailbox message".to_string(),
                received: mailbox.message.kind().to_string(),
            }
            .into());
        }
        self.dispatch(mailbox.message, mailbox.sender_address, Delivery::Mailbox)
    }

    /// Decodes one wire frame and handles it as a direct message. Malformed frames are
    /// dropped.
    pub fn on_raw_message(&self, frame: &[u8], sender: PeerAddress) -> Result<(), TradeError> {
        let message = wire::decode(frame).map_err(|e| {
            log::warn!("Dropping malformed frame from {}: {}", sender, e);
            TradeError::Net(e)
        })?;
        self.on_direct_message(message, sender)
    }

    fn dispatch(
        &self,
        message: TradeMessage,
        sender: PeerAddress,
        delivery: Delivery,
    ) -> Result<(), TradeError> {
        let id = message.trade_id().to_string();
        let created = match &message {
            TradeMessage::TakeOfferRequest(request) => {
                self.create_offerer_trade(&id, request.trade_amount)?
            }
            _ => false,
        };

        let protocol = self.protocol(&id).inspect_err(|_| {
            log::warn!("Dropping {} from {}: unknown trade", message, sender);
        })?;
        let mut protocol = protocol.lock()?;
        if delivery == Delivery::Mailbox {
            protocol.rebind(self.services.clone())?;
        }
        let result = protocol.handle_message(message, &sender);
        if let Err(e) = &result {
            log::warn!("[{}] Message from {} not applied: {}", short_id(&id), sender, e);
            // A rejected first request leaves no trace: no key was allocated yet.
            if created && protocol.trade().process_model.address_entry().is_none() {
                self.discard_offerer_trade(&id, protocol.trade().offer.clone())?;
                return result;
            }
        }
        self.persist(protocol.trade());
        result
    }

    /// Turns an open offer into an offerer trade when its first request arrives.
    ///
    /// Returns `false` if the trade already existed.
    fn create_offerer_trade(&self, id: &str, amount: Amount) -> Result<bool, TradeError> {
        let mut trades = self.trades.write()?;
        if trades.contains_key(id) {
            return Ok(false);
        }
        let offer = self
            .open_offers
            .write()?
            .remove(id)
            .ok_or_else(|| TradeError::UnknownOffer(id.to_string()))?;
        let trade = Trade::new(offer, EntryRole::Offerer, amount);
        let protocol = TradeProtocol::new(trade, self.services.clone())?;
        trades.insert(id.to_string(), Arc::new(Mutex::new(protocol)));
        Ok(true)
    }

    /// Drops a trade whose first request was refused and puts its offer back.
    fn discard_offerer_trade(&self, id: &str, offer: Offer) -> Result<(), TradeError> {
        log::info!("[{}] Request refused, offer stays open", short_id(id));
        self.trades.write()?.remove(id);
        self.open_offers.write()?.insert(id.to_string(), offer);
        Ok(())
    }

    fn protocol(&self, id: &str) -> Result<Arc<Mutex<TradeProtocol>>, TradeError> {
        self.trades
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| TradeError::UnknownTrade(id.to_string()))
    }

    fn with_protocol<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut TradeProtocol) -> Result<T, TradeError>,
    ) -> Result<T, TradeError> {
        let protocol = self.protocol(id)?;
        let mut protocol = protocol.lock()?;
        let result = f(&mut protocol);
        self.persist(protocol.trade());
        result
    }

    fn read_trade<T>(&self, id: &str, f: impl FnOnce(&Trade) -> T) -> Result<T, TradeError> {
        let protocol = self.protocol(id)?;
        let protocol = protocol.lock()?;
        Ok(f(protocol.trade()))
    }

    fn persist(&self, trade: &Trade) {
        if let Some(store) = &self.store {
            match store.update(trade) {
                Ok(()) => store.save_later(),
                Err(e) => log::error!("[{}] Failed to store trade: {:?}", short_id(trade.id()), e),
            }
        }
    }

    /// Buyer UI action: the fiat transfer was started.
    pub fn on_fiat_payment_started(&self, trade_id: &str) -> Result<(), TradeError> {
        self.with_protocol(trade_id, |p| p.on_fiat_payment_started())
    }

    /// Seller UI action: the fiat payment arrived.
    pub fn on_fiat_payment_received(&self, trade_id: &str) -> Result<(), TradeError> {
        self.with_protocol(trade_id, |p| p.on_fiat_payment_received())
    }

    /// UI action: open a dispute.
    pub fn on_open_dispute(&self, trade_id: &str) -> Result<Dispute, TradeError> {
        self.with_protocol(trade_id, |p| p.open_dispute(false))
    }

    /// UI action: open a support ticket.
    pub fn on_open_support_ticket(&self, trade_id: &str) -> Result<Dispute, TradeError> {
        self.with_protocol(trade_id, |p| p.open_dispute(true))
    }

    /// Wallet callback: the payout lock time was reached.
    pub fn on_lock_time_reached(&self, trade_id: &str) -> Result<(), TradeError> {
        self.with_protocol(trade_id, |p| p.on_lock_time_reached())
    }

    /// Wallet callback: the deposit got its first confirmation.
    pub fn on_deposit_confirmed(&self, trade_id: &str) -> Result<(), TradeError> {
        self.with_protocol(trade_id, |p| {
            p.on_deposit_confirmed();
            Ok(())
        })
    }

    /// UI action: the paid out funds were withdrawn.
    pub fn withdraw(&self, trade_id: &str) -> Result<(), TradeError> {
        self.with_protocol(trade_id, |p| p.withdraw())
    }

    /// Arms a fault injection hook on a trade.
    pub fn set_intercept(
        &self,
        trade_id: &str,
        intercept: Option<Intercept>,
    ) -> Result<(), TradeError> {
        self.with_protocol(trade_id, |p| {
            p.set_intercept(intercept);
            Ok(())
        })
    }

    /// Checks every deposit timeout. Expired trades escalate to a dispute.
    ///
    /// Returns the ids of the trades whose timeout expired.
    pub fn check_timeouts(&self, now: Instant) -> Vec<String> {
        let protocols = match self.trades.read() {
            Ok(trades) => trades
                .iter()
                .map(|(id, p)| (id.clone(), p.clone()))
                .collect::<Vec<_>>(),
            Err(_) => {
                log::error!("Trade list lock poisoned");
                return Vec::new();
            }
        };

        let mut expired = Vec::new();
        for (id, protocol) in protocols {
            let Ok(mut protocol) = protocol.lock() else {
                log::error!("[{}] Trade lock poisoned", short_id(&id));
                continue;
            };
            if let Some(result) = protocol.check_timeout(now) {
                if let Err(e) = result {
                    log::error!("[{}] Timeout escalation failed: {}", short_id(&id), e);
                }
                self.persist(protocol.trade());
                expired.push(id);
            }
        }
        expired
    }

    /// Writes pending trade changes. Call before dropping the manager.
    pub fn flush(&self) -> Result<(), TradeError> {
        match &self.store {
            Some(store) => store.flush(),
            None => Ok(()),
        }
    }

    /// Ids of all trades.
    pub fn trade_ids(&self) -> Result<Vec<String>, TradeError> {
        let mut ids = self.trades.read()?.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    /// Snapshot of a trade.
    pub fn trade(&self, trade_id: &str) -> Result<Trade, TradeError> {
        self.read_trade(trade_id, Trade::clone)
    }

    /// Current phase of a trade.
    pub fn phase(&self, trade_id: &str) -> Result<Phase, TradeError> {
        self.read_trade(trade_id, Trade::phase)
    }

    /// Current dispute state of a trade.
    pub fn dispute_state(&self, trade_id: &str) -> Result<DisputeState, TradeError> {
        self.read_trade(trade_id, Trade::dispute_state)
    }

    /// Deposit txid of a trade, once published.
    pub fn deposit_txid(&self, trade_id: &str) -> Result<Option<Txid>, TradeError> {
        self.read_trade(trade_id, Trade::deposit_txid)
    }

    /// Payout txid of a trade, once signed.
    pub fn payout_txid(&self, trade_id: &str) -> Result<Option<Txid>, TradeError> {
        self.read_trade(trade_id, Trade::payout_txid)
    }

    /// Payout lock time height of a trade.
    pub fn lock_time_height(&self, trade_id: &str) -> Result<Option<u32>, TradeError> {
        self.read_trade(trade_id, Trade::lock_time_height)
    }

    /// Whether the deposit timeout of a trade is armed.
    pub fn is_deposit_timeout_armed(&self, trade_id: &str) -> Result<bool, TradeError> {
        let protocol = self.protocol(trade_id)?;
        let armed = protocol.lock()?.deposit_timeout().is_armed();
        Ok(armed)
    }
}

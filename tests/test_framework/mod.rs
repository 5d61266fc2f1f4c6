//! A Framework to write functional tests for the fiatswap trade engine.
//!
//! Spawns an Offerer and a Taker node on top of an in-memory chain and an in-memory
//! network. Wallet, transport and arbitration are mocks with failure switches, so every
//! step of a trade can be observed and broken from the test.
//!
//! Sent messages are not delivered right away. Tests move them with [TestFramework::pump],
//! which delivers on the test thread, in send order, until the network is quiet.
//!
//! With [TestFramework::init_persistent] both nodes store their trades in a temporary
//! directory, removed when the framework is dropped. [TestFramework::restart] simulates a
//! process restart of both nodes on the same data.
//!
//! Checkout `tests/standard_trade.rs` for a full trade between the two nodes.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc, Mutex,
    },
};

use bitcoin::{
    absolute::LockTime,
    address::NetworkUnchecked,
    hashes::{sha256, Hash},
    key::CompressedPublicKey,
    opcodes::all::OP_CHECKMULTISIG,
    script::Builder,
    secp256k1::{Keypair, Secp256k1, SecretKey},
    transaction::Version,
    Address, Amount, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use fiatswap::{
    arbitration::{ArbitrationError, ArbitrationService, Arbitrator, Dispute},
    protocol::{MailboxMessage, PeerAddress, TradeMessage},
    trade::{
        Offer, OfferDirection, Phase, Services, TradeConfig, TradeError, TradeManager,
        TradeState,
    },
    transport::{SendOutcome, Transport, TransportError},
    utill::setup_logger,
    wallet::{
        AddressEntry, AddressEntryList, DepositTxParams, PayoutTxParams, TradeWallet, WalletError,
    },
};
use tempfile::TempDir;

/// Chain height the tests start at.
pub const START_HEIGHT: u32 = 200;
/// Bitcoin amount of the test offers.
pub const OFFER_AMOUNT: Amount = Amount::from_sat(1_000_000);
/// Value of the funding coin each wallet spends from.
const FUNDING: Amount = Amount::from_sat(5_000_000);

/// Trade config with short block delays and a fast storage writer.
pub fn test_config() -> TradeConfig {
    TradeConfig {
        network: Network::Regtest,
        deposit_timeout_secs: 30,
        timeout_check_interval_ms: 50,
        open_dispute_delay_blocks: 10,
        lock_time_delta_blocks: 20,
        take_offer_fee_sat: 20_000,
        tx_fee_sat: 10_000,
        security_deposit_sat: 100_000,
        storage_save_delay_ms: 50,
    }
}

fn tagged_hash(label: &str, tag: &str, index: u32) -> sha256::Hash {
    let mut data = Vec::new();
    data.extend_from_slice(label.as_bytes());
    data.extend_from_slice(tag.as_bytes());
    data.extend_from_slice(&index.to_be_bytes());
    sha256::Hash::hash(&data)
}

/// Deterministic keypair of a wallet label and derivation index.
pub fn test_keypair(label: &str, index: u32) -> Keypair {
    let secp = Secp256k1::new();
    let secret = SecretKey::from_slice(&tagged_hash(label, "key", index).to_byte_array())
        .expect("hash is a valid secret key");
    Keypair::from_secret_key(&secp, &secret)
}

fn fake_txid(label: &str, tag: &str, index: u32) -> Txid {
    Txid::from_byte_array(tagged_hash(label, tag, index).to_byte_array())
}

fn spend(txid: Txid, vout: u32) -> TxIn {
    TxIn {
        previous_output: OutPoint { txid, vout },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
        witness: Witness::new(),
    }
}

fn parse_address(address: &str) -> Result<Address, WalletError> {
    Address::<NetworkUnchecked>::from_str(address)
        .map(|a| a.assume_checked())
        .map_err(|e| WalletError::General(format!("Invalid address {}: {}", address, e)))
}

/// Registered test arbitrators, with deterministic keys.
pub fn test_arbitrators(count: u32) -> Vec<Arbitrator> {
    (1..=count)
        .map(|i| {
            let keypair = test_keypair("arbitrator", i);
            Arbitrator {
                address: PeerAddress::new(format!("arbitrator{}.onion:9999", i)),
                btc_pubkey: keypair.public_key(),
                btc_address: Address::p2wpkh(
                    &CompressedPublicKey(keypair.public_key()),
                    Network::Regtest,
                )
                .to_string(),
                pub_key_ring: keypair.public_key().serialize().to_vec(),
            }
        })
        .collect()
}

#[derive(Default)]
struct ChainState {
    height: u32,
    txs: HashMap<Txid, Transaction>,
}

/// The shared in-memory chain. Broadcast transactions are visible to every wallet.
#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    /// A chain at `height`.
    pub fn new(height: u32) -> Self {
        let chain = Self::default();
        chain.state.lock().unwrap().height = height;
        chain
    }

    /// Current height.
    pub fn height(&self) -> u32 {
        self.state.lock().unwrap().height
    }

    /// Mines `blocks` blocks and returns the new height.
    pub fn mine(&self, blocks: u32) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.height += blocks;
        state.height
    }

    /// A published transaction.
    pub fn get_tx(&self, txid: &Txid) -> Option<Transaction> {
        self.state.lock().unwrap().txs.get(txid).cloned()
    }

    /// Whether a transaction was published.
    pub fn contains(&self, txid: &Txid) -> bool {
        self.state.lock().unwrap().txs.contains_key(txid)
    }

    fn publish(&self, tx: &Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.state.lock().unwrap().txs.insert(txid, tx.clone());
        txid
    }
}

/// Everything a [MockWallet] was asked to do.
#[derive(Debug, Default, Clone)]
pub struct WalletRecord {
    /// Deposit listeners, by trade.
    pub deposit_listeners: Vec<(String, Txid)>,
    /// Lock time listeners, by trade.
    pub lock_time_listeners: Vec<(String, u32)>,
    /// Transactions imported from the peer.
    pub imported: Vec<Txid>,
    /// Transactions committed without broadcast.
    pub committed: Vec<Txid>,
    /// Transactions broadcast.
    pub broadcast: Vec<Txid>,
}

/// Deterministic wallet. Keys derive from the label, so a wallet re-created with the
/// same label after a restart derives the same keys.
pub struct MockWallet {
    label: String,
    chain: MockChain,
    failing: Mutex<HashSet<&'static str>>,
    panicking: Mutex<HashSet<&'static str>>,
    record: Mutex<WalletRecord>,
}

impl MockWallet {
    /// Creates a wallet on `chain`.
    pub fn new(label: &str, chain: MockChain) -> Self {
        Self {
            label: label.to_string(),
            chain,
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            record: Mutex::new(WalletRecord::default()),
        }
    }

    /// Makes every call of `method` fail until [MockWallet::heal] is called.
    pub fn fail_on(&self, method: &'static str) {
        self.failing.lock().unwrap().insert(method);
    }

    /// Makes every call of `method` panic until [MockWallet::heal] is called.
    pub fn panic_on(&self, method: &'static str) {
        self.panicking.lock().unwrap().insert(method);
    }

    /// Clears all failure switches.
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.panicking.lock().unwrap().clear();
    }

    /// Snapshot of the recorded calls.
    pub fn record(&self) -> WalletRecord {
        self.record.lock().unwrap().clone()
    }

    fn check(&self, method: &'static str) -> Result<(), WalletError> {
        if self.panicking.lock().unwrap().contains(method) {
            panic!("{} panicked in wallet {}", method, self.label);
        }
        if self.failing.lock().unwrap().contains(method) {
            return Err(WalletError::General(format!(
                "{} failed in wallet {}",
                method, self.label
            )));
        }
        Ok(())
    }
}

impl TradeWallet for MockWallet {
    fn derive_trade_key(&self, index: u32) -> Result<Keypair, WalletError> {
        self.check("derive_trade_key")?;
        Ok(test_keypair(&self.label, index))
    }

    fn create_take_offer_fee_tx(
        &self,
        entry: &AddressEntry,
        fee: Amount,
        arbitrator_btc_address: &str,
    ) -> Result<Transaction, WalletError> {
        self.check("create_take_offer_fee_tx")?;
        let change = FUNDING
            .checked_sub(fee)
            .ok_or(WalletError::InsufficientFund {
                available: FUNDING.to_sat(),
                required: fee.to_sat(),
            })?;
        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![spend(fake_txid(&self.label, "funding", entry.index()), 0)],
            output: vec![
                TxOut {
                    value: fee,
                    script_pubkey: parse_address(arbitrator_btc_address)?.script_pubkey(),
                },
                TxOut {
                    value: change,
                    script_pubkey: entry.address().script_pubkey(),
                },
            ],
        })
    }

    fn verify_take_offer_fee_tx(&self, txid: &Txid, fee: Amount) -> Result<bool, WalletError> {
        self.check("verify_take_offer_fee_tx")?;
        Ok(self
            .chain
            .get_tx(txid)
            .and_then(|tx| tx.output.first().map(|out| out.value >= fee))
            .unwrap_or(false))
    }

    fn create_and_sign_deposit_tx(
        &self,
        entry: &AddressEntry,
        params: &DepositTxParams,
    ) -> Result<Transaction, WalletError> {
        self.check("create_and_sign_deposit_tx")?;
        let multisig = Builder::new()
            .push_int(2)
            .push_key(&bitcoin::PublicKey::new(params.buyer_pubkey))
            .push_key(&bitcoin::PublicKey::new(params.seller_pubkey))
            .push_key(&bitcoin::PublicKey::new(params.arbitrator_pubkey))
            .push_int(3)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script();
        let value = params.trade_amount + params.security_deposit + params.security_deposit;
        let mut funding = spend(fake_txid(&self.label, "funding", entry.index()), 0);
        funding.witness.push(entry.pubkey().serialize());
        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![funding, spend(params.take_offer_fee_txid, 1)],
            output: vec![TxOut {
                value,
                script_pubkey: ScriptBuf::new_p2wsh(&multisig.wscript_hash()),
            }],
        })
    }

    fn broadcast_tx(&self, tx: &Transaction) -> Result<Txid, WalletError> {
        self.check("broadcast_tx")?;
        let txid = self.chain.publish(tx);
        self.record.lock().unwrap().broadcast.push(txid);
        Ok(txid)
    }

    fn add_tx_to_wallet(&self, tx: &Transaction) -> Result<(), WalletError> {
        self.check("add_tx_to_wallet")?;
        self.record.lock().unwrap().imported.push(tx.compute_txid());
        Ok(())
    }

    fn add_deposit_listener(&self, trade_id: &str, deposit_txid: Txid) -> Result<(), WalletError> {
        self.check("add_deposit_listener")?;
        self.record
            .lock()
            .unwrap()
            .deposit_listeners
            .push((trade_id.to_string(), deposit_txid));
        Ok(())
    }

    fn sign_payout_tx(
        &self,
        entry: &AddressEntry,
        params: &PayoutTxParams,
    ) -> Result<Transaction, WalletError> {
        self.check("sign_payout_tx")?;
        let lock_time = LockTime::from_height(params.lock_time)
            .map_err(|e| WalletError::General(e.to_string()))?;
        let mut input = spend(params.deposit_tx.compute_txid(), 0);
        input.witness.push(entry.pubkey().serialize());
        Ok(Transaction {
            version: Version::TWO,
            lock_time,
            input: vec![input],
            output: vec![
                TxOut {
                    value: params.buyer_payout_amount,
                    script_pubkey: parse_address(&params.buyer_payout_address)?.script_pubkey(),
                },
                TxOut {
                    value: params.seller_payout_amount,
                    script_pubkey: parse_address(&params.seller_payout_address)?.script_pubkey(),
                },
            ],
        })
    }

    fn finalize_payout_tx(
        &self,
        entry: &AddressEntry,
        partially_signed: &Transaction,
        deposit_tx: &Transaction,
    ) -> Result<Transaction, WalletError> {
        self.check("finalize_payout_tx")?;
        let deposit_txid = deposit_tx.compute_txid();
        let mut payout_tx = partially_signed.clone();
        let input = payout_tx
            .input
            .iter_mut()
            .find(|input| input.previous_output.txid == deposit_txid)
            .ok_or(WalletError::TxNotFound(deposit_txid))?;
        input.witness.push(entry.pubkey().serialize());
        Ok(payout_tx)
    }

    fn commit_tx(&self, tx: &Transaction) -> Result<(), WalletError> {
        self.check("commit_tx")?;
        self.record.lock().unwrap().committed.push(tx.compute_txid());
        Ok(())
    }

    fn best_chain_height(&self) -> Result<u32, WalletError> {
        self.check("best_chain_height")?;
        Ok(self.chain.height())
    }

    fn add_lock_time_listener(&self, trade_id: &str, lock_time: u32) -> Result<(), WalletError> {
        self.check("add_lock_time_listener")?;
        self.record
            .lock()
            .unwrap()
            .lock_time_listeners
            .push((trade_id.to_string(), lock_time));
        Ok(())
    }
}

/// One message on the wire.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Sender.
    pub from: PeerAddress,
    /// Recipient.
    pub to: PeerAddress,
    /// The message.
    pub message: TradeMessage,
}

#[derive(Default)]
struct NetworkState {
    offline: HashSet<PeerAddress>,
    failing: HashSet<PeerAddress>,
    in_flight: VecDeque<Envelope>,
    mailboxes: HashMap<PeerAddress, Vec<MailboxMessage>>,
    sent: Vec<Envelope>,
}

/// In-memory network with a store-and-forward mailbox per peer.
#[derive(Clone, Default)]
pub struct MockNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MockNetwork {
    /// Takes a peer offline, or brings it back. Messages to offline peers go to their
    /// mailbox.
    pub fn set_offline(&self, peer: &PeerAddress, offline: bool) {
        let mut state = self.state.lock().unwrap();
        if offline {
            state.offline.insert(peer.clone());
        } else {
            state.offline.remove(peer);
        }
    }

    /// Makes every send from `peer` fail.
    pub fn set_failing(&self, peer: &PeerAddress, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing.insert(peer.clone());
        } else {
            state.failing.remove(peer);
        }
    }

    /// Next message waiting for direct delivery.
    pub fn pop_in_flight(&self) -> Option<Envelope> {
        self.state.lock().unwrap().in_flight.pop_front()
    }

    /// Drops every message waiting for direct delivery.
    pub fn drop_in_flight(&self) -> Vec<Envelope> {
        self.state.lock().unwrap().in_flight.drain(..).collect()
    }

    /// Empties the mailbox of `peer`.
    pub fn take_mailbox(&self, peer: &PeerAddress) -> Vec<MailboxMessage> {
        self.state
            .lock()
            .unwrap()
            .mailboxes
            .remove(peer)
            .unwrap_or_default()
    }

    /// Every message accepted by the network, in send order.
    pub fn sent(&self) -> Vec<Envelope> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Last accepted message of the given kind.
    pub fn last_sent(&self, kind: &str) -> Option<Envelope> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .rev()
            .find(|e| e.message.kind() == kind)
            .cloned()
    }

    /// Number of accepted messages of the given kind.
    pub fn count_sent(&self, kind: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|e| e.message.kind() == kind)
            .count()
    }
}

/// A node's view of the [MockNetwork].
pub struct MockTransport {
    address: PeerAddress,
    network: MockNetwork,
}

impl Transport for MockTransport {
    fn send(
        &self,
        peer: &PeerAddress,
        message: &TradeMessage,
    ) -> Result<SendOutcome, TransportError> {
        let mut state = self.network.state.lock().unwrap();
        if state.failing.contains(&self.address) {
            return Err(TransportError::General(format!(
                "Send from {} failed",
                self.address
            )));
        }
        let envelope = Envelope {
            from: self.address.clone(),
            to: peer.clone(),
            message: message.clone(),
        };
        if state.offline.contains(peer) {
            if !message.is_mailbox_message() {
                return Err(TransportError::PeerUnreachable(peer.clone()));
            }
            state.sent.push(envelope);
            state
                .mailboxes
                .entry(peer.clone())
                .or_default()
                .push(MailboxMessage {
                    sender_address: self.address.clone(),
                    message: message.clone(),
                });
            return Ok(SendOutcome::QueuedInMailbox);
        }
        state.sent.push(envelope.clone());
        state.in_flight.push_back(envelope);
        Ok(SendOutcome::Delivered)
    }

    fn local_address(&self) -> PeerAddress {
        self.address.clone()
    }
}

/// Arbitration service recording every dispute it receives.
pub struct RecordingArbitration {
    arbitrators: Vec<Arbitrator>,
    accepted: Vec<PeerAddress>,
    disputes: Mutex<Vec<Dispute>>,
    failing: AtomicBool,
}

impl RecordingArbitration {
    /// Registry of `arbitrators`, of which the local user accepts `accepted`.
    pub fn new(arbitrators: Vec<Arbitrator>, accepted: Vec<PeerAddress>) -> Self {
        Self {
            arbitrators,
            accepted,
            disputes: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Makes dispute delivery fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Relaxed);
    }

    /// Disputes received so far.
    pub fn disputes(&self) -> Vec<Dispute> {
        self.disputes.lock().unwrap().clone()
    }
}

impl ArbitrationService for RecordingArbitration {
    fn accepted_arbitrators(&self) -> Vec<PeerAddress> {
        self.accepted.clone()
    }

    fn arbitrator_by_address(&self, address: &PeerAddress) -> Option<Arbitrator> {
        self.arbitrators
            .iter()
            .find(|a| &a.address == address)
            .cloned()
    }

    fn send_open_dispute(&self, dispute: &Dispute) -> Result<(), ArbitrationError> {
        if self.failing.load(Relaxed) {
            return Err(ArbitrationError::Delivery(
                "arbitrator unreachable".to_string(),
            ));
        }
        self.disputes.lock().unwrap().push(dispute.clone());
        Ok(())
    }
}

/// One trader: its mocks, address book and trade manager.
pub struct TestNode {
    /// Wallet label, also the host part of the address.
    pub label: String,
    /// Network address.
    pub address: PeerAddress,
    /// The node's wallet.
    pub wallet: Arc<MockWallet>,
    /// The node's arbitration service.
    pub arbitration: Arc<RecordingArbitration>,
    /// The node's address entries.
    pub address_book: Arc<Mutex<AddressEntryList>>,
    /// The node's trades.
    pub manager: Arc<TradeManager>,
    /// Storage directory, if persistent.
    pub data_dir: Option<PathBuf>,
    chain: MockChain,
    network: MockNetwork,
    config: Arc<TradeConfig>,
}

impl TestNode {
    /// Builds a node. With a `data_dir`, trades stored there are resumed.
    pub fn new(
        label: &str,
        chain: MockChain,
        network: MockNetwork,
        arbitration: Arc<RecordingArbitration>,
        config: Arc<TradeConfig>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let address = PeerAddress::new(format!("{}.onion:9999", label));
        let wallet = Arc::new(MockWallet::new(label, chain.clone()));
        let transport = Arc::new(MockTransport {
            address: address.clone(),
            network: network.clone(),
        });
        let address_book = Arc::new(Mutex::new(AddressEntryList::new(config.network)));
        let services = Services {
            wallet: wallet.clone(),
            transport,
            arbitration: arbitration.clone(),
            address_book: address_book.clone(),
            config: config.clone(),
        };
        let manager = match &data_dir {
            Some(dir) => TradeManager::load(services, dir).unwrap(),
            None => TradeManager::new(services),
        };

        Self {
            label: label.to_string(),
            address,
            wallet,
            arbitration,
            address_book,
            manager: Arc::new(manager),
            data_dir,
            chain,
            network,
            config,
        }
    }

    /// Flushes the trade list and builds the node again from its data directory, with
    /// a fresh wallet and address book.
    pub fn restart(self) -> Self {
        self.manager.flush().unwrap();
        log::info!("🔄 Restarting node {}", self.label);
        TestNode::new(
            &self.label,
            self.chain.clone(),
            self.network.clone(),
            self.arbitration.clone(),
            self.config.clone(),
            self.data_dir.clone(),
        )
    }

    /// Current state of a trade.
    pub fn state(&self, trade_id: &str) -> TradeState {
        self.manager.trade(trade_id).unwrap().state()
    }

    /// Current phase of a trade.
    pub fn phase(&self, trade_id: &str) -> Phase {
        self.manager.phase(trade_id).unwrap()
    }
}

/// The Test Framework.
///
/// Holds the shared chain and network and the two trading nodes.
pub struct TestFramework {
    /// Shared chain.
    pub chain: MockChain,
    /// Shared network.
    pub network: MockNetwork,
    /// Registered arbitrators. Both nodes accept all of them.
    pub arbitrators: Vec<Arbitrator>,
    /// Config of both nodes.
    pub config: Arc<TradeConfig>,
    /// Publishes the offers.
    pub offerer: TestNode,
    /// Takes the offers.
    pub taker: TestNode,
    temp_dir: Option<TempDir>,
}

impl TestFramework {
    /// Two nodes without persistence and the [test_config].
    pub fn init() -> Self {
        Self::init_with(test_config(), false)
    }

    /// Two nodes storing their trades in a temporary directory.
    pub fn init_persistent() -> Self {
        Self::init_with(test_config(), true)
    }

    /// Two nodes with a custom config.
    pub fn init_with(config: TradeConfig, persistent: bool) -> Self {
        setup_logger(log::LevelFilter::Info, None);

        let temp_dir = persistent.then(|| TempDir::new().unwrap());
        if let Some(dir) = &temp_dir {
            log::info!("📁 temporary directory : {}", dir.path().display());
        }
        let chain = MockChain::new(START_HEIGHT);
        let network = MockNetwork::default();
        let config = Arc::new(config);
        let arbitrators = test_arbitrators(3);
        let accepted = arbitrators
            .iter()
            .map(|a| a.address.clone())
            .collect::<Vec<_>>();

        let node = |label: &str| {
            TestNode::new(
                label,
                chain.clone(),
                network.clone(),
                Arc::new(RecordingArbitration::new(
                    arbitrators.clone(),
                    accepted.clone(),
                )),
                config.clone(),
                temp_dir.as_ref().map(|dir| dir.path().join(label)),
            )
        };
        let offerer = node("offerer");
        let taker = node("taker");

        log::info!("✅ Test Framework initialization complete");
        Self {
            chain,
            network,
            arbitrators,
            config,
            offerer,
            taker,
            temp_dir,
        }
    }

    /// Restarts both nodes on their stored data.
    pub fn restart(self) -> Self {
        let TestFramework {
            chain,
            network,
            arbitrators,
            config,
            offerer,
            taker,
            temp_dir,
        } = self;
        Self {
            chain,
            network,
            arbitrators,
            config,
            offerer: offerer.restart(),
            taker: taker.restart(),
            temp_dir,
        }
    }

    /// An offer of the offerer node, accepting every registered arbitrator.
    pub fn offer(&self, id: &str, direction: OfferDirection) -> Offer {
        Offer {
            id: id.to_string(),
            direction,
            amount: OFFER_AMOUNT,
            fiat_amount: 3_000_000,
            currency_code: "EUR".to_string(),
            offerer_address: self.offerer.address.clone(),
            arbitrator_addresses: self.arbitrators.iter().map(|a| a.address.clone()).collect(),
            created_at: 0,
        }
    }

    /// The node paying fiat on an offer of `direction`.
    pub fn buyer(&self, direction: OfferDirection) -> &TestNode {
        match direction {
            OfferDirection::Buy => &self.offerer,
            OfferDirection::Sell => &self.taker,
        }
    }

    /// The node receiving fiat on an offer of `direction`.
    pub fn seller(&self, direction: OfferDirection) -> &TestNode {
        match direction {
            OfferDirection::Buy => &self.taker,
            OfferDirection::Sell => &self.offerer,
        }
    }

    /// Node reachable at `address`.
    pub fn node(&self, address: &PeerAddress) -> Option<&TestNode> {
        [&self.offerer, &self.taker]
            .into_iter()
            .find(|node| &node.address == address)
    }

    /// Delivers in-flight messages until the network is quiet. Returns each delivery
    /// with its result.
    pub fn pump(&self) -> Vec<(Envelope, Result<(), TradeError>)> {
        let mut deliveries = Vec::new();
        while let Some(envelope) = self.network.pop_in_flight() {
            let result = match self.node(&envelope.to) {
                Some(node) => node
                    .manager
                    .on_direct_message(envelope.message.clone(), envelope.from.clone()),
                None => Err(TradeError::General(format!("No node at {}", envelope.to))),
            };
            deliveries.push((envelope, result));
        }
        deliveries
    }

    /// Like [TestFramework::pump], panicking on the first failed delivery.
    pub fn pump_ok(&self) {
        for (envelope, result) in self.pump() {
            if let Err(e) = result {
                panic!("Delivery of {} to {} failed: {}", envelope.message, envelope.to, e);
            }
        }
    }

    /// Hands the mailbox content of `node` to it.
    pub fn deliver_mailbox(&self, node: &TestNode) -> Vec<Result<(), TradeError>> {
        self.network
            .take_mailbox(&node.address)
            .into_iter()
            .map(|message| node.manager.on_mailbox_message(message))
            .collect()
    }

    /// Places `id`, has the taker take it and runs the deposit exchange.
    pub fn open_trade(&self, id: &str, direction: OfferDirection) {
        let offer = self.offer(id, direction);
        self.offerer.manager.place_offer(offer.clone()).unwrap();
        self.taker.manager.take_offer(offer, OFFER_AMOUNT).unwrap();
        self.pump_ok();
        assert_eq!(self.offerer.phase(id), Phase::DepositPublished);
        assert_eq!(self.taker.phase(id), Phase::DepositPublished);
    }

    /// Runs `id` from the offer up to both peers holding the finalized payout.
    pub fn run_to_payout(&self, id: &str, direction: OfferDirection) {
        self.open_trade(id, direction);

        self.buyer(direction).manager.on_fiat_payment_started(id).unwrap();
        self.pump_ok();
        self.seller(direction)
            .manager
            .on_fiat_payment_received(id)
            .unwrap();
        self.pump_ok();

        assert_eq!(self.offerer.phase(id), Phase::PayoutPaid);
        assert_eq!(self.taker.phase(id), Phase::PayoutPaid);
    }
}

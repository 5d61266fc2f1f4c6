//! Interface to the Bitcoin wallet used by trade tasks.
//!
//! Transaction construction, signing, broadcasting and chain monitoring live in the
//! wallet. Tasks only decide *when* to call them and keep the results on the [Trade].
//!
//! Implementations do their own locking; a call may block until the wallet answers.
//!
//! [Trade]: crate::trade::Trade

use bitcoin::{
    secp256k1::{Keypair, PublicKey},
    Amount, Transaction, Txid,
};

use super::{address::AddressEntry, error::WalletError};

/// Inputs for building the 2-of-3 multisig deposit transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct DepositTxParams {
    /// Trade id the deposit belongs to.
    pub trade_id: String,
    /// Bitcoin amount traded.
    pub trade_amount: Amount,
    /// Security deposit each trader locks.
    pub security_deposit: Amount,
    /// Mining fee of the deposit transaction.
    pub tx_fee: Amount,
    /// Whether the local trader is the buyer.
    pub is_buyer: bool,
    /// Buyer's multisig key.
    pub buyer_pubkey: PublicKey,
    /// Seller's multisig key.
    pub seller_pubkey: PublicKey,
    /// Arbitrator's multisig key.
    pub arbitrator_pubkey: PublicKey,
    /// Taker's fee transaction, whose change funds the taker's part.
    pub take_offer_fee_txid: Txid,
}

/// Inputs for building the payout transaction spending the deposit.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutTxParams {
    /// The deposit transaction being spent.
    pub deposit_tx: Transaction,
    /// Amount paid to the buyer.
    pub buyer_payout_amount: Amount,
    /// Amount paid to the seller.
    pub seller_payout_amount: Amount,
    /// Buyer's payout address.
    pub buyer_payout_address: String,
    /// Seller's payout address.
    pub seller_payout_address: String,
    /// Absolute block height lock time of the payout transaction.
    pub lock_time: u32,
}

/// The wallet operations the trade protocol depends on.
pub trait TradeWallet: Send + Sync {
    /// Derives the trade key at `index`. Must be deterministic, so keys can be
    /// re-derived for persisted address entries.
    fn derive_trade_key(&self, index: u32) -> Result<Keypair, WalletError>;

    /// Creates and signs the take-offer fee transaction, paying `fee` to the arbitrator.
    fn create_take_offer_fee_tx(
        &self,
        entry: &AddressEntry,
        fee: Amount,
        arbitrator_btc_address: &str,
    ) -> Result<Transaction, WalletError>;

    /// Checks that `txid` is a valid take-offer fee transaction paying at least `fee`.
    fn verify_take_offer_fee_tx(&self, txid: &Txid, fee: Amount) -> Result<bool, WalletError>;

    /// Builds the deposit transaction and adds the local signature.
    fn create_and_sign_deposit_tx(
        &self,
        entry: &AddressEntry,
        params: &DepositTxParams,
    ) -> Result<Transaction, WalletError>;

    /// Broadcasts a transaction to the network.
    fn broadcast_tx(&self, tx: &Transaction) -> Result<Txid, WalletError>;

    /// Imports a transaction published by the counterparty into the wallet's view.
    fn add_tx_to_wallet(&self, tx: &Transaction) -> Result<(), WalletError>;

    /// Starts watching the deposit transaction. The wallet reports the confirmation
    /// through [TradeManager::on_deposit_confirmed].
    ///
    /// [TradeManager::on_deposit_confirmed]: crate::trade::TradeManager::on_deposit_confirmed
    fn add_deposit_listener(&self, trade_id: &str, deposit_txid: Txid) -> Result<(), WalletError>;

    /// Builds the payout transaction and adds the local signature.
    fn sign_payout_tx(
        &self,
        entry: &AddressEntry,
        params: &PayoutTxParams,
    ) -> Result<Transaction, WalletError>;

    /// Countersigns a payout transaction signed by the peer.
    fn finalize_payout_tx(
        &self,
        entry: &AddressEntry,
        partially_signed: &Transaction,
        deposit_tx: &Transaction,
    ) -> Result<Transaction, WalletError>;

    /// Stores a fully signed transaction in the wallet without broadcasting it.
    fn commit_tx(&self, tx: &Transaction) -> Result<(), WalletError>;

    /// Height of the best known block.
    fn best_chain_height(&self) -> Result<u32, WalletError>;

    /// Watches for the chain to reach `lock_time`. The wallet reports it through
    /// [TradeManager::on_lock_time_reached].
    ///
    /// [TradeManager::on_lock_time_reached]: crate::trade::TradeManager::on_lock_time_reached
    fn add_lock_time_listener(&self, trade_id: &str, lock_time: u32) -> Result<(), WalletError>;
}

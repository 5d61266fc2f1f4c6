//! Dedicated per-trade wallet addresses.
//!
//! Every trade uses its own address entry for all of its transactions, so coins of
//! different trades are never merged and can't be linked together.

use std::fmt;

use bitcoin::{
    key::CompressedPublicKey,
    secp256k1::{Keypair, PublicKey},
    Address, Network,
};
use serde::{Deserialize, Serialize};

use super::{api::TradeWallet, error::WalletError};
use crate::utill::short_id;

/// A wallet key and its address, bound to a single trade.
///
/// The keypair is never persisted. After loading, it is re-derived from the wallet
/// through [AddressEntry::rehydrate] using the stored derivation index.
#[derive(Clone, Serialize, Deserialize)]
pub struct AddressEntry {
    trade_id: String,
    index: u32,
    pubkey: PublicKey,
    network: Network,
    released: bool,
    #[serde(skip)]
    keypair: Option<Keypair>,
}

impl AddressEntry {
    /// Creates an entry for a freshly derived key.
    pub fn new(
        keypair: Keypair,
        index: u32,
        network: Network,
        trade_id: String,
    ) -> Self {
        Self {
            trade_id,
            index,
            pubkey: keypair.public_key(),
            network,
            released: false,
            keypair: Some(keypair),
        }
    }

    /// Trade the entry is bound to.
    pub fn trade_id(&self) -> &str {
        &self.trade_id
    }

    /// Derivation index of the key.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Public key of the entry.
    pub fn pubkey(&self) -> PublicKey {
        self.pubkey
    }

    /// Whether the trade using this entry is over.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Native segwit address of the entry.
    pub fn address(&self) -> Address {
        Address::p2wpkh(&CompressedPublicKey(self.pubkey), self.network)
    }

    /// The entry's keypair. Fails if the entry was loaded and not yet rehydrated.
    pub fn keypair(&self) -> Result<&Keypair, WalletError> {
        self.keypair.as_ref().ok_or_else(|| {
            WalletError::General(format!("Keypair of address entry {} not loaded", self.index))
        })
    }

    pub(crate) fn mark_released(&mut self) {
        self.released = true;
    }

    /// Re-derives the transient keypair from the wallet.
    pub fn rehydrate(&mut self, wallet: &dyn TradeWallet) -> Result<(), WalletError> {
        if self.keypair.is_some() {
            return Ok(());
        }
        let keypair = wallet.derive_trade_key(self.index)?;
        if keypair.public_key() != self.pubkey {
            return Err(WalletError::KeyMismatch { index: self.index });
        }
        self.keypair = Some(keypair);
        Ok(())
    }
}

impl fmt::Debug for AddressEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressEntry")
            .field("trade_id", &short_id(&self.trade_id))
            .field("index", &self.index)
            .field("address", &self.address().to_string())
            .field("released", &self.released)
            .finish()
    }
}

/// All address entries handed out by the wallet.
///
/// Entries are released, never deleted, so a derivation index is never handed out twice.
#[derive(Debug)]
pub struct AddressEntryList {
    network: Network,
    entries: Vec<AddressEntry>,
    next_index: u32,
}

impl AddressEntryList {
    /// Creates an empty list.
    pub fn new(network: Network) -> Self {
        Self {
            network,
            entries: Vec::new(),
            next_index: 0,
        }
    }

    /// Returns the active entry of `trade_id`, creating it on first use.
    pub fn get_or_create_trade_entry(
        &mut self,
        trade_id: &str,
        wallet: &dyn TradeWallet,
    ) -> Result<AddressEntry, WalletError> {
        if let Some(entry) = self.find_trade_entry(trade_id) {
            return Ok(entry.clone());
        }
        let index = self.next_index;
        let keypair = wallet.derive_trade_key(index)?;
        self.next_index += 1;
        let entry = AddressEntry::new(keypair, index, self.network, trade_id.to_string());
        log::debug!("Created address entry {:?}", entry);
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Active (not released) entry of a trade.
    pub fn find_trade_entry(&self, trade_id: &str) -> Option<&AddressEntry> {
        self.entries.iter().find(|e| {
            e.trade_id == trade_id && !e.released
        })
    }

    /// Unbinds the entry of a finished trade. Returns `false` if there was none.
    pub fn release_trade_entry(&mut self, trade_id: &str) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.trade_id == trade_id && !e.released)
        {
            Some(entry) => {
                entry.mark_released();
                log::info!("Released address entry of trade {}", short_id(trade_id));
                true
            }
            None => false,
        }
    }

    /// Re-registers an entry loaded from storage.
    pub fn restore(&mut self, entry: AddressEntry) {
        self.next_index = self.next_index.max(entry.index + 1);
        match self.entries.iter_mut().find(|e| e.index == entry.index) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// All entries, released ones included.
    pub fn entries(&self) -> &[AddressEntry] {
        &self.entries
    }
}

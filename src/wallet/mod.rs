//! Wallet side of a trade: per-trade address entries and the wallet interface.
//!
//! The wallet itself (key storage, coin selection, signing, chain sync) is provided by the
//! embedding application through [TradeWallet].

mod address;
mod api;
mod error;

pub use address::{AddressEntry, AddressEntryList};
pub use api::{DepositTxParams, PayoutTxParams, TradeWallet};
pub use error::WalletError;

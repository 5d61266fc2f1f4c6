//! All Wallet-related errors.

use bitcoin::Txid;

/// Represents errors reported by the trade wallet.
///
/// The wallet lives outside this crate, so most variants only carry what the
/// wallet implementation chose to report.
#[derive(Debug)]
pub enum WalletError {
    /// Represents a standard I/O error.
    IO(std::io::Error),

    /// Represents an error from the Secp256k1 cryptographic library.
    ///
    /// Typically occurs during signature generation or verification.
    Secp(bitcoin::secp256k1::Error),

    /// A key re-derived for an address entry doesn't match the persisted public key.
    KeyMismatch {
        /// Derivation index of the entry.
        index: u32,
    },

    /// The wallet doesn't know the transaction.
    TxNotFound(Txid),

    /// The network rejected a transaction.
    Broadcast(String),

    /// Represents an error when the wallet has insufficient funds to complete an operation.
    InsufficientFund {
        /// The amount of funds available in the wallet.
        available: u64,
        /// The amount of funds needed to complete the operation.
        required: u64,
    },

    /// Represents a general error with a descriptive message.
    General(String),
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        Self::IO(e)
    }
}

impl From<bitcoin::secp256k1::Error> for WalletError {
    fn from(value: bitcoin::secp256k1::Error) -> Self {
        Self::Secp(value)
    }
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletError::IO(e) => write!(f, "I/O error: {}", e),
            WalletError::Secp(e) => write!(f, "Secp256k1 error: {}", e),
            WalletError::KeyMismatch { index } => {
                write!(f, "Derived key at index {} doesn't match the stored key", index)
            }
            WalletError::TxNotFound(txid) => write!(f, "Transaction {} not found", txid),
            WalletError::Broadcast(msg) => write!(f, "Broadcast failed: {}", msg),
            WalletError::InsufficientFund {
                available,
                required,
            } => {
                write!(
                    f,
                    "Insufficient funds: available {} sats, required {} sats",
                    available, required
                )
            }
            WalletError::General(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for WalletError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WalletError::IO(e) => Some(e),
            WalletError::Secp(e) => Some(e),
            _ => None,
        }
    }
}

//! Arbitration: selecting the trade's arbitrator and escalating trades to it.
//!
//! The arbitrator registry and the channel to the arbitrator live outside this crate,
//! behind [ArbitrationService].

mod dispute;
mod error;
mod selection;

pub use dispute::{open_dispute, Dispute};
pub use error::ArbitrationError;
pub use selection::select_arbitrator;

use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::protocol::messages::PeerAddress;

/// A registered arbitrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arbitrator {
    /// Network address of the arbitrator.
    pub address: PeerAddress,
    /// Key used in the 2-of-3 deposit multisig.
    pub btc_pubkey: PublicKey,
    /// Address receiving the take-offer fee.
    pub btc_address: String,
    /// Encryption key material for the dispute channel.
    pub pub_key_ring: Vec<u8>,
}

/// The arbitration subsystem as seen by a trade.
pub trait ArbitrationService: Send + Sync {
    /// Arbitrators the local user accepts.
    fn accepted_arbitrators(&self) -> Vec<PeerAddress>;

    /// Looks up a registered arbitrator.
    fn arbitrator_by_address(&self, address: &PeerAddress) -> Option<Arbitrator>;

    /// Sends a dispute to its arbitrator. Called at most once per dispute.
    fn send_open_dispute(&self, dispute: &Dispute) -> Result<(), ArbitrationError>;
}

//! Arbitrator selection rule.
//!
//! The taker picks the arbitrator, the offerer re-runs the same rule on the taker's
//! accepted list to check the choice. The rule is deterministic per trade id.

use bitcoin::hashes::{sha256, Hash};

use super::error::ArbitrationError;
use crate::protocol::messages::PeerAddress;

/// Selects the arbitrator for `trade_id` among the ones accepted by both sides.
pub fn select_arbitrator(
    trade_id: &str,
    offer_arbitrators: &[PeerAddress],
    accepted_arbitrators: &[PeerAddress],
) -> Result<PeerAddress, ArbitrationError> {
    let mut candidates = offer_arbitrators
        .iter()
        .filter(|address| accepted_arbitrators.contains(address))
        .collect::<Vec<_>>();
    candidates.sort();
    candidates.dedup();

    if candidates.is_empty() {
        return Err(ArbitrationError::NoCommonArbitrator);
    }

    let digest = sha256::Hash::hash(trade_id.as_bytes()).to_byte_array();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let index = (u64::from_be_bytes(prefix) % candidates.len() as u64) as usize;

    let selected = candidates[index].clone();
    log::debug!("Selected arbitrator {} for trade {}", selected, trade_id);
    Ok(selected)
}

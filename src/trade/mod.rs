//! Trade negotiation engine.
//!
//! A [Trade] is driven by its [TradeProtocol] through ordered task sequences. The
//! [TradeManager] owns all trades, dispatches external events to them and persists
//! them through the [TradeStore]. Deposit timeouts are polled by a [TimeoutWatcher].

mod background;
mod config;
mod error;
mod manager;
mod model;
mod process_model;
mod protocol;
mod state;
mod storage;
mod tasks;
mod timeout;

pub use background::TimeoutWatcher;
pub use config::TradeConfig;
pub use error::TradeError;
pub use manager::TradeManager;
pub use model::{Contract, EntryRole, FiatRole, Offer, OfferDirection, Trade, TradeRole};
pub use process_model::{ProcessModel, Services};
pub use protocol::{plan, Plan, ProtocolEvent, TradeProtocol};
pub use state::{DisputeState, Phase, TradeState};
pub use storage::TradeStore;
pub use timeout::DepositTimeout;

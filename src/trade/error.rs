//! All Trade-related errors.

use std::sync::PoisonError;

use super::{model::TradeRole, state::Phase};
use crate::{
    arbitration::ArbitrationError,
    error::NetError,
    protocol::error::ProtocolError,
    task::{TaskFailure, TaskRunnerError},
    transport::TransportError,
    wallet::WalletError,
};

/// Errors returned by the trade manager and the trade protocols.
#[derive(Debug)]
pub enum TradeError {
    /// Standard IO errors.
    IO(std::io::Error),
    /// No trade with the given id.
    UnknownTrade(String),
    /// No open offer with the given id.
    UnknownOffer(String),
    /// A trade with the given id already exists.
    DuplicateTrade(String),
    /// The event isn't valid for the trade's role.
    InvalidRole {
        /// The rejected event.
        event: &'static str,
        /// Role of the trade.
        role: TradeRole,
    },
    /// The event isn't valid yet in the trade's current phase.
    InvalidPhase {
        /// The rejected event.
        event: &'static str,
        /// Current phase.
        phase: Phase,
    },
    /// A UI action was refused because a dispute is in progress.
    DisputeInProgress(String),
    /// A dispute or support ticket is already open for the trade.
    DisputeAlreadyOpen(String),
    /// A task sequence failed. The trade kept its last committed state.
    Task(TaskFailure),
    /// A task runner was used twice.
    RunnerReused,
    /// Message validation failed.
    Protocol(ProtocolError),
    /// Wallet failure outside a task.
    Wallet(WalletError),
    /// Transport failure outside a task.
    Transport(TransportError),
    /// Arbitration failure.
    Arbitration(ArbitrationError),
    /// Wire decoding failure.
    Net(NetError),
    /// Trade list (de)serialization failure.
    Cbor(serde_cbor::Error),
    /// A lock was poisoned by a panicking thread.
    MutexPoison,
    /// Represents a general error with a descriptive message.
    General(String),
}

impl std::fmt::Display for TradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TradeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TradeError::IO(e) => Some(e),
            TradeError::Task(f) => Some(&f.cause),
            TradeError::Protocol(e) => Some(e),
            TradeError::Wallet(e) => Some(e),
            TradeError::Transport(e) => Some(e),
            TradeError::Arbitration(e) => Some(e),
            TradeError::Net(e) => Some(e),
            TradeError::Cbor(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TradeError {
    fn from(value: std::io::Error) -> Self {
        Self::IO(value)
    }
}

impl From<TaskRunnerError> for TradeError {
    fn from(value: TaskRunnerError) -> Self {
        match value {
            TaskRunnerError::Failed(failure) => Self::Task(failure),
            TaskRunnerError::AlreadyRun => Self::RunnerReused,
        }
    }
}

impl From<ProtocolError> for TradeError {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}

impl From<WalletError> for TradeError {
    fn from(value: WalletError) -> Self {
        Self::Wallet(value)
    }
}

impl From<TransportError> for TradeError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<ArbitrationError> for TradeError {
    fn from(value: ArbitrationError) -> Self {
        Self::Arbitration(value)
    }
}

impl From<NetError> for TradeError {
    fn from(value: NetError) -> Self {
        Self::Net(value)
    }
}

impl From<serde_cbor::Error> for TradeError {
    fn from(value: serde_cbor::Error) -> Self {
        Self::Cbor(value)
    }
}

impl<T> From<PoisonError<T>> for TradeError {
    fn from(_: PoisonError<T>) -> Self {
        Self::MutexPoison
    }
}

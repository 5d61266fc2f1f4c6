//! The trade protocol state machine.
//!
//! One [TradeProtocol] drives one [Trade]. All four roles (buyer or seller, offerer or
//! taker) share the same machine: every event is resolved to a [Plan] by looking up
//! the `(role, event)` pair, and the plan's tasks run through a [TaskRunner].
//!
//! Each event is admitted only within a window of phases. Below the window the event
//! is refused. Above it, an inbound message is a redelivery of something already
//! applied and is ignored, while a UI action is refused.
//!
//! A failed sequence restores the state committed before it started, so the phase
//! never moves on failure and a redelivered message or a repeated UI action retries
//! from a consistent point.

use std::time::{Duration, Instant};

use super::{
    error::TradeError,
    model::{EntryRole, FiatRole, Trade, TradeRole},
    process_model::Services,
    state::{DisputeState, Phase, TradeState},
    tasks::{buyer, offerer, seller, shared, taker},
    timeout::DepositTimeout,
};
use crate::{
    arbitration::{self, ArbitrationError, Dispute},
    protocol::{
        error::ProtocolError,
        messages::{PeerAddress, TakeOfferRequest, TradeMessage},
    },
    task::{Intercept, Task, TaskRunner},
    utill::short_id,
};

/// Everything that can drive a trade forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolEvent {
    /// Taker takes an offer.
    TakeOffer,
    /// Offerer receives a take-offer request.
    TakeOfferRequest,
    /// Taker receives the deposit notice.
    DepositTxPublished,
    /// Offerer receives the taker's contract signature.
    ContractCountersigned,
    /// Buyer presses "payment started".
    FiatPaymentStarted,
    /// Seller receives the fiat transfer notice.
    FiatTransferStarted,
    /// Seller presses "payment received".
    FiatPaymentReceived,
    /// Buyer receives the seller-signed payout.
    FinalizePayoutTxRequest,
    /// Seller receives the finalized payout.
    PayoutTxFinalized,
    /// Wallet reports the payout lock time.
    LockTimeReached,
    /// Trade loaded after the payout, before the lock time.
    ResumeAfterPayout,
}

impl ProtocolEvent {
    /// Static event name.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::TakeOffer => "TakeOffer",
            ProtocolEvent::TakeOfferRequest => "TakeOfferRequest",
            ProtocolEvent::DepositTxPublished => "DepositTxPublished",
            ProtocolEvent::ContractCountersigned => "ContractCountersigned",
            ProtocolEvent::FiatPaymentStarted => "FiatPaymentStarted",
            ProtocolEvent::FiatTransferStarted => "FiatTransferStarted",
            ProtocolEvent::FiatPaymentReceived => "FiatPaymentReceived",
            ProtocolEvent::FinalizePayoutTxRequest => "FinalizePayoutTxRequest",
            ProtocolEvent::PayoutTxFinalized => "PayoutTxFinalized",
            ProtocolEvent::LockTimeReached => "LockTimeReached",
            ProtocolEvent::ResumeAfterPayout => "ResumeAfterPayout",
        }
    }

    /// Lowest and highest phase the event is admitted in.
    fn window(&self) -> (Phase, Phase) {
        match self {
            ProtocolEvent::TakeOffer | ProtocolEvent::TakeOfferRequest => {
                (Phase::Preparation, Phase::Preparation)
            }
            ProtocolEvent::DepositTxPublished => (Phase::TakerFeePaid, Phase::TakerFeePaid),
            // The signature may trail the fiat messages when it comes through the mailbox.
            ProtocolEvent::ContractCountersigned => (Phase::DepositPublished, Phase::PayoutPaid),
            ProtocolEvent::FiatPaymentStarted | ProtocolEvent::FiatTransferStarted => {
                (Phase::DepositPublished, Phase::DepositPublished)
            }
            ProtocolEvent::FiatPaymentReceived => {
                (Phase::FiatPaymentStarted, Phase::FiatPaymentStarted)
            }
            ProtocolEvent::FinalizePayoutTxRequest => {
                (Phase::DepositPublished, Phase::FiatPaymentStarted)
            }
            ProtocolEvent::PayoutTxFinalized => {
                (Phase::FiatPaymentReceipt, Phase::FiatPaymentReceipt)
            }
            ProtocolEvent::LockTimeReached | ProtocolEvent::ResumeAfterPayout => {
                (Phase::PayoutPaid, Phase::PayoutPaid)
            }
        }
    }

    /// Whether the event comes from a peer message.
    fn is_inbound(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::TakeOfferRequest
                | ProtocolEvent::DepositTxPublished
                | ProtocolEvent::ContractCountersigned
                | ProtocolEvent::FiatTransferStarted
                | ProtocolEvent::FinalizePayoutTxRequest
                | ProtocolEvent::PayoutTxFinalized
        )
    }
}

/// The task sequence bound to one `(role, event)` pair.
#[derive(Debug, Clone, Copy)]
pub struct Plan {
    /// Tasks, in execution order.
    pub tasks: &'static [Task<Trade>],
    /// State set before the tasks run. Rolled back on failure.
    pub pre_state: Option<TradeState>,
    /// State committed after all tasks succeeded.
    pub commit_state: Option<TradeState>,
    /// Whether success completes the trade.
    pub completes: bool,
}

const TAKE_OFFER: &[Task<Trade>] = &[
    taker::SELECT_ARBITRATOR,
    taker::CREATE_TAKE_OFFER_FEE_TX,
    taker::SEND_TAKE_OFFER_REQUEST,
];

const HANDLE_TAKE_OFFER_REQUEST: &[Task<Trade>] = &[
    offerer::PROCESS_TAKE_OFFER_REQUEST,
    offerer::VERIFY_ARBITRATION_SELECTION,
    offerer::VERIFY_TAKE_OFFER_FEE_TX,
    offerer::CREATE_AND_SIGN_CONTRACT,
    offerer::CREATE_AND_SIGN_DEPOSIT_TX,
    offerer::INIT_WAIT_PERIOD_FOR_OPEN_DISPUTE,
    offerer::SETUP_DEPOSIT_BALANCE_LISTENER,
    offerer::SEND_DEPOSIT_TX_PUBLISHED,
];

const HANDLE_DEPOSIT_TX_PUBLISHED: &[Task<Trade>] = &[
    taker::PROCESS_DEPOSIT_TX_PUBLISHED,
    taker::SIGN_CONTRACT,
    taker::ADD_DEPOSIT_TX_TO_WALLET,
    taker::SEND_CONTRACT_COUNTERSIGNED,
];

const HANDLE_CONTRACT_COUNTERSIGNED: &[Task<Trade>] = &[offerer::PROCESS_CONTRACT_COUNTERSIGNED];

const FIAT_PAYMENT_STARTED: &[Task<Trade>] = &[
    shared::VERIFY_TAKE_OFFER_FEE_PAYMENT,
    buyer::SEND_FIAT_TRANSFER_STARTED,
];

const HANDLE_FIAT_TRANSFER_STARTED: &[Task<Trade>] = &[seller::PROCESS_FIAT_TRANSFER_STARTED];

const FIAT_PAYMENT_RECEIVED: &[Task<Trade>] = &[
    shared::VERIFY_TAKE_OFFER_FEE_PAYMENT,
    seller::SIGN_PAYOUT_TX,
    seller::SEND_FINALIZE_PAYOUT_TX_REQUEST,
];

const HANDLE_FINALIZE_PAYOUT_TX_REQUEST: &[Task<Trade>] = &[
    buyer::PROCESS_FINALIZE_PAYOUT_TX_REQUEST,
    buyer::SIGN_AND_FINALIZE_PAYOUT_TX,
    shared::COMMIT_PAYOUT_TX,
    buyer::SEND_PAYOUT_TX_FINALIZED,
    shared::SETUP_PAYOUT_TX_LOCK_TIME_REACHED_LISTENER,
];

const HANDLE_PAYOUT_TX_FINALIZED: &[Task<Trade>] = &[
    seller::PROCESS_PAYOUT_TX_FINALIZED,
    shared::COMMIT_PAYOUT_TX,
    shared::SETUP_PAYOUT_TX_LOCK_TIME_REACHED_LISTENER,
];

const LOCK_TIME_REACHED: &[Task<Trade>] = &[shared::BROADCAST_PAYOUT_TX];

const RESUME_AFTER_PAYOUT: &[Task<Trade>] = &[shared::SETUP_PAYOUT_TX_LOCK_TIME_REACHED_LISTENER];

/// Resolves the task sequence of `event` for `role`. `None` if the role doesn't take
/// part in the event.
pub fn plan(role: TradeRole, event: ProtocolEvent) -> Option<Plan> {
    use EntryRole::*;
    use FiatRole::*;
    use ProtocolEvent as E;

    let make = |tasks: &'static [Task<Trade>],
                pre_state: Option<TradeState>,
                commit_state: Option<TradeState>,
                completes: bool| Plan {
        tasks,
        pre_state,
        commit_state,
        completes,
    };

    match (role.fiat, role.entry, event) {
        (_, Taker, E::TakeOffer) => Some(make(
            TAKE_OFFER,
            None,
            Some(TradeState::TakerFeePaid),
            false,
        )),
        (_, Offerer, E::TakeOfferRequest) => Some(make(
            HANDLE_TAKE_OFFER_REQUEST,
            None,
            Some(TradeState::DepositPublishedMsgSent),
            false,
        )),
        (_, Taker, E::DepositTxPublished) => Some(make(
            HANDLE_DEPOSIT_TX_PUBLISHED,
            None,
            Some(TradeState::DepositPublishedMsgReceived),
            false,
        )),
        (_, Offerer, E::ContractCountersigned) => Some(make(
            HANDLE_CONTRACT_COUNTERSIGNED,
            None,
            None,
            false,
        )),
        (Buyer, _, E::FiatPaymentStarted) => Some(make(
            FIAT_PAYMENT_STARTED,
            Some(TradeState::FiatPaymentStarted),
            Some(TradeState::FiatPaymentStartedMsgSent),
            false,
        )),
        (Seller, _, E::FiatTransferStarted) => Some(make(
            HANDLE_FIAT_TRANSFER_STARTED,
            None,
            Some(TradeState::FiatPaymentStartedMsgReceived),
            false,
        )),
        (Seller, _, E::FiatPaymentReceived) => Some(make(
            FIAT_PAYMENT_RECEIVED,
            Some(TradeState::FiatPaymentReceipt),
            Some(TradeState::FinalizePayoutRequestSent),
            false,
        )),
        (Buyer, _, E::FinalizePayoutTxRequest) => Some(make(
            HANDLE_FINALIZE_PAYOUT_TX_REQUEST,
            None,
            Some(TradeState::PayoutTxSent),
            true,
        )),
        (Seller, _, E::PayoutTxFinalized) => Some(make(
            HANDLE_PAYOUT_TX_FINALIZED,
            None,
            Some(TradeState::PayoutTxReceived),
            true,
        )),
        (_, _, E::LockTimeReached) => Some(make(LOCK_TIME_REACHED, None, None, false)),
        (_, _, E::ResumeAfterPayout) => Some(make(RESUME_AFTER_PAYOUT, None, None, true)),
        _ => None,
    }
}

enum Admission {
    Run(Plan),
    Stale,
}

/// Protocol instance of one trade.
#[derive(Debug)]
pub struct TradeProtocol {
    trade: Trade,
    timeout: DepositTimeout,
    deposit_timeout: Duration,
}

impl TradeProtocol {
    /// Binds `trade` to its services.
    ///
    /// A trade loaded in [Phase::PayoutPaid] re-arms its lock time listener right away.
    /// A taker loaded in [Phase::TakerFeePaid] re-arms its deposit timeout.
    pub fn new(mut trade: Trade, services: Services) -> Result<Self, TradeError> {
        let deposit_timeout = services.config.deposit_timeout();
        trade.process_model.on_all_services_initialized(services)?;

        let mut protocol = Self {
            trade,
            timeout: DepositTimeout::new(),
            deposit_timeout,
        };

        match protocol.trade.phase() {
            Phase::TakerFeePaid if protocol.trade.dispute_state() == DisputeState::None => {
                protocol.timeout.arm(Instant::now(), deposit_timeout);
            }
            Phase::PayoutPaid => {
                if let Err(e) = protocol.run_event(ProtocolEvent::ResumeAfterPayout, None) {
                    log::error!(
                        "[{}] Failed to resume lock time listener: {}",
                        short_id(protocol.trade.id()),
                        e
                    );
                }
            }
            _ => {}
        }
        Ok(protocol)
    }

    /// The driven trade.
    pub fn trade(&self) -> &Trade {
        &self.trade
    }

    /// Deposit timer of the trade.
    pub fn deposit_timeout(&self) -> &DepositTimeout {
        &self.timeout
    }

    /// Re-binds the services, for a trade reloaded since a mailbox message was queued.
    pub fn rebind(&mut self, services: Services) -> Result<(), TradeError> {
        self.trade.process_model.on_all_services_initialized(services)?;
        Ok(())
    }

    /// Arms a fault injection hook for the following sequences.
    pub fn set_intercept(&mut self, intercept: Option<Intercept>) {
        self.trade.process_model.set_intercept(intercept);
    }

    /// Taker entry point: pays the take-offer fee and sends the request.
    pub fn take_offer(&mut self) -> Result<(), TradeError> {
        let plan = match self.admit(ProtocolEvent::TakeOffer)? {
            Admission::Run(plan) => plan,
            Admission::Stale => return Ok(()),
        };
        self.execute(ProtocolEvent::TakeOffer, plan, None)?;
        self.timeout.arm(Instant::now(), self.deposit_timeout);
        Ok(())
    }

    /// Offerer entry point: builds, signs and publishes the deposit for the request.
    ///
    /// The deposit timeout is armed before the sequence and disarmed when it succeeds.
    /// On failure it stays armed, so the trade escalates if no retry succeeds in time.
    pub fn handle_take_offer_request(
        &mut self,
        request: TakeOfferRequest,
        peer_address: PeerAddress,
    ) -> Result<(), TradeError> {
        self.check_trade_id(&request.trade_id)?;
        let plan = match self.admit(ProtocolEvent::TakeOfferRequest)? {
            Admission::Run(plan) => plan,
            Admission::Stale => return Ok(()),
        };
        self.trade.process_model.temp_trading_peer_address = Some(peer_address);
        self.timeout.arm(Instant::now(), self.deposit_timeout);
        self.execute(
            ProtocolEvent::TakeOfferRequest,
            plan,
            Some(TradeMessage::TakeOfferRequest(request)),
        )?;
        self.timeout.disarm();
        Ok(())
    }

    /// Applies an inbound message, however it was delivered.
    pub fn handle_message(
        &mut self,
        message: TradeMessage,
        sender: &PeerAddress,
    ) -> Result<(), TradeError> {
        self.check_trade_id(message.trade_id())?;
        log::info!(
            "[{}] Received {} from {}",
            short_id(self.trade.id()),
            message,
            sender
        );
        if self.trade.dispute_state() == DisputeState::DisputeClosed {
            log::warn!(
                "[{}] Dropping {}, dispute is closed",
                short_id(self.trade.id()),
                message
            );
            return Ok(());
        }
        self.check_sender(&message, sender)?;

        let event = match message {
            TradeMessage::TakeOfferRequest(request) => {
                return self.handle_take_offer_request(request, sender.clone());
            }
            TradeMessage::PeerOpenedDispute(m) => {
                log::warn!(
                    "[{}] Peer opened a {}",
                    short_id(self.trade.id()),
                    if m.is_support_ticket {
                        "support ticket"
                    } else {
                        "dispute"
                    }
                );
                if self.trade.dispute_state() == DisputeState::None {
                    self.trade.set_dispute_state(DisputeState::DisputeStartedByPeer);
                }
                self.timeout.disarm();
                return Ok(());
            }
            TradeMessage::DisputeResult(m) => {
                log::info!(
                    "[{}] Dispute closed: {}",
                    short_id(self.trade.id()),
                    m.summary
                );
                self.trade.set_dispute_state(DisputeState::DisputeClosed);
                self.timeout.disarm();
                return Ok(());
            }
            TradeMessage::DepositTxPublished(_) => ProtocolEvent::DepositTxPublished,
            TradeMessage::ContractCountersigned(_) => ProtocolEvent::ContractCountersigned,
            TradeMessage::FiatTransferStarted(_) => ProtocolEvent::FiatTransferStarted,
            TradeMessage::FinalizePayoutTxRequest(_) => ProtocolEvent::FinalizePayoutTxRequest,
            TradeMessage::PayoutTxFinalized(_) => ProtocolEvent::PayoutTxFinalized,
        };

        let plan = match self.admit(event)? {
            Admission::Run(plan) => plan,
            Admission::Stale => return Ok(()),
        };
        self.execute(event, plan, Some(message))?;
        if event == ProtocolEvent::DepositTxPublished {
            self.timeout.disarm();
        }
        Ok(())
    }

    /// Buyer UI action: the fiat transfer was started.
    pub fn on_fiat_payment_started(&mut self) -> Result<(), TradeError> {
        self.run_ui_event(ProtocolEvent::FiatPaymentStarted)
    }

    /// Seller UI action: the fiat payment arrived.
    pub fn on_fiat_payment_received(&mut self) -> Result<(), TradeError> {
        self.run_ui_event(ProtocolEvent::FiatPaymentReceived)
    }

    /// Wallet callback: the payout lock time was reached.
    pub fn on_lock_time_reached(&mut self) -> Result<(), TradeError> {
        self.run_event(ProtocolEvent::LockTimeReached, None)
    }

    /// Wallet callback: the deposit got its first confirmation.
    pub fn on_deposit_confirmed(&mut self) {
        if self.trade.phase() == Phase::DepositPublished
            && self.trade.state() < TradeState::DepositConfirmed
        {
            self.trade.set_state(TradeState::DepositConfirmed);
        }
    }

    /// Escalates the trade to its arbitrator.
    pub fn open_dispute(&mut self, is_support_ticket: bool) -> Result<Dispute, TradeError> {
        let arbitration = self
            .trade
            .process_model
            .services()
            .map_err(|e| TradeError::General(e.to_string()))?
            .arbitration
            .clone();
        arbitration::open_dispute(&mut self.trade, arbitration.as_ref(), is_support_ticket)
            .map_err(|e| match e {
                ArbitrationError::DisputeAlreadyOpen => {
                    TradeError::DisputeAlreadyOpen(self.trade.id().to_string())
                }
                other => TradeError::Arbitration(other),
            })
    }

    /// Checks the deposit timeout. On expiry the timer is disarmed, the trade is marked
    /// failed and a dispute is opened unless one already is.
    ///
    /// Returns `None` if the timer didn't expire.
    pub fn check_timeout(&mut self, now: Instant) -> Option<Result<Dispute, TradeError>> {
        if !self.timeout.is_expired(now) {
            return None;
        }
        self.timeout.disarm();
        log::error!(
            "[{}] Deposit timeout expired in state {}",
            short_id(self.trade.id()),
            self.trade.state()
        );
        self.trade
            .set_error_message("Deposit was not published in time");
        Some(self.open_dispute(false))
    }

    /// Marks a paid out trade withdrawn.
    pub fn withdraw(&mut self) -> Result<(), TradeError> {
        match self.trade.phase() {
            Phase::PayoutPaid => {
                self.trade.set_state(TradeState::WithdrawCompleted);
                self.trade.process_model.on_complete();
                Ok(())
            }
            Phase::Withdrawn => Ok(()),
            phase => Err(TradeError::InvalidPhase {
                event: "Withdraw",
                phase,
            }),
        }
    }

    fn check_trade_id(&self, received: &str) -> Result<(), TradeError> {
        if received != self.trade.id() {
            return Err(ProtocolError::TradeIdMismatch {
                expected: self.trade.id().to_string(),
                received: received.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Dispute messages are only taken from the trade's arbitrator. Peer messages are
    /// only taken from the trading peer once it is known.
    fn check_sender(
        &self,
        message: &TradeMessage,
        sender: &PeerAddress,
    ) -> Result<(), TradeError> {
        let expected = match message {
            TradeMessage::PeerOpenedDispute(_) | TradeMessage::DisputeResult(_) => {
                self.trade.arbitrator_address()
            }
            _ => match self.trade.trading_peer_address() {
                Some(peer) => Some(peer),
                None => return Ok(()),
            },
        };
        if expected == Some(sender) {
            return Ok(());
        }
        log::warn!(
            "[{}] Refusing {} from {}, expected {:?}",
            short_id(self.trade.id()),
            message,
            sender,
            expected
        );
        Err(ProtocolError::UnexpectedSender {
            expected: expected.cloned(),
            received: sender.clone(),
        }
        .into())
    }

    fn run_ui_event(&mut self, event: ProtocolEvent) -> Result<(), TradeError> {
        if self.trade.dispute_state() != DisputeState::None {
            log::warn!(
                "[{}] Ignoring {} while dispute state is {}",
                short_id(self.trade.id()),
                event.name(),
                self.trade.dispute_state()
            );
            return Err(TradeError::DisputeInProgress(self.trade.id().to_string()));
        }
        self.run_event(event, None)
    }

    fn run_event(
        &mut self,
        event: ProtocolEvent,
        message: Option<TradeMessage>,
    ) -> Result<(), TradeError> {
        match self.admit(event)? {
            Admission::Run(plan) => self.execute(event, plan, message),
            Admission::Stale => Ok(()),
        }
    }

    fn admit(&self, event: ProtocolEvent) -> Result<Admission, TradeError> {
        let role = self.trade.role();
        let plan = plan(role, event).ok_or(TradeError::InvalidRole {
            event: event.name(),
            role,
        })?;

        let phase = self.trade.phase();
        let (lowest, highest) = event.window();

        if phase < lowest {
            log::warn!(
                "[{}] {} not valid yet in phase {}",
                short_id(self.trade.id()),
                event.name(),
                phase
            );
            return Err(TradeError::InvalidPhase {
                event: event.name(),
                phase,
            });
        }
        if phase > highest {
            if event.is_inbound() {
                log::info!(
                    "[{}] Ignoring redelivered {} in phase {}",
                    short_id(self.trade.id()),
                    event.name(),
                    phase
                );
                return Ok(Admission::Stale);
            }
            return Err(TradeError::InvalidPhase {
                event: event.name(),
                phase,
            });
        }
        Ok(Admission::Run(plan))
    }

    fn execute(
        &mut self,
        event: ProtocolEvent,
        plan: Plan,
        message: Option<TradeMessage>,
    ) -> Result<(), TradeError> {
        let prior = self.trade.state();
        if let Some(pre_state) = plan.pre_state {
            self.trade.set_state(pre_state);
        }
        self.trade.process_model.trade_message = message;

        let label = format!(
            "{}:{}:{}",
            short_id(self.trade.id()),
            self.trade.role(),
            event.name()
        );
        let intercept = self.trade.process_model.intercept();
        let mut runner = TaskRunner::new(
            label,
            plan.tasks,
            |trade: &mut Trade| {
                if let Some(state) = plan.commit_state {
                    if state > trade.state() {
                        trade.set_state(state);
                    }
                }
                if plan.completes {
                    trade.process_model.on_complete();
                }
            },
            |trade: &mut Trade, failure| {
                trade.restore_state(prior);
                trade.process_model.trade_message = None;
                trade.set_error_message(failure.to_string());
            },
        )
        .with_intercept(intercept);

        runner.run(&mut self.trade)?;
        Ok(())
    }
}

//! Ordered execution of protocol steps.
//!
//! A [Task] is one atomic step of a trade protocol: verify a message, build a
//! transaction, send a notice. A [TaskRunner] executes an ordered list of tasks against
//! one context, stops at the first failure and fires exactly one of its two
//! continuations for the whole sequence.
//!
//! ```text
//! [A] -> [B] -> [C] -> on_success
//!         |
//!         +-- fails --> on_fault(B, cause)   (C never runs)
//! ```
//!
//! Panics inside a task body are caught and treated as a failure of that task.
//! A runner can be armed with an [Intercept] to force a named task to fail before or
//! after its body, which is how tests inject faults.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    arbitration::ArbitrationError, protocol::error::ProtocolError, transport::TransportError,
    wallet::WalletError,
};

/// Signature of a task body.
pub type TaskFn<C> = fn(&mut C) -> Result<(), TaskError>;

/// A named protocol step operating on a context `C`.
pub struct Task<C> {
    name: &'static str,
    run: TaskFn<C>,
}

impl<C> Task<C> {
    /// Creates a task.
    pub const fn new(name: &'static str, run: TaskFn<C>) -> Self {
        Self { name, run }
    }

    /// Name of the task, used in logs and intercepts.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// Manual impls, a derive would require `C: Clone`.
impl<C> Clone for Task<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Task<C> {}

impl<C> fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.name)
    }
}

/// Where an [Intercept] forces the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptPoint {
    /// Fail without running the task body.
    BeforeRun,
    /// Run the body, then fail anyway.
    AfterRun,
}

/// Forces the task named `task` to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intercept {
    /// Name of the task to intercept.
    pub task: &'static str,
    /// Whether the body runs before the failure.
    pub point: InterceptPoint,
}

/// Cause of a failed task.
#[derive(Debug)]
pub enum TaskError {
    /// Validation of a message or of trade data failed.
    Protocol(ProtocolError),
    /// The wallet failed.
    Wallet(WalletError),
    /// Sending a message failed.
    Transport(TransportError),
    /// Arbitrator selection or lookup failed.
    Arbitration(ArbitrationError),
    /// The task was forced to fail by an [Intercept].
    Intercepted {
        /// Intercepted task.
        task: &'static str,
        /// Where it was intercepted.
        point: InterceptPoint,
    },
    /// The task body panicked.
    Panicked(String),
    /// Represents a general error with a descriptive message.
    General(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TaskError::Protocol(e) => Some(e),
            TaskError::Wallet(e) => Some(e),
            TaskError::Transport(e) => Some(e),
            TaskError::Arbitration(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProtocolError> for TaskError {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}

impl From<WalletError> for TaskError {
    fn from(value: WalletError) -> Self {
        Self::Wallet(value)
    }
}

impl From<TransportError> for TaskError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<ArbitrationError> for TaskError {
    fn from(value: ArbitrationError) -> Self {
        Self::Arbitration(value)
    }
}

/// The task that aborted a sequence, and why.
#[derive(Debug)]
pub struct TaskFailure {
    /// Name of the failed task.
    pub task: &'static str,
    /// Cause reported by the task.
    pub cause: TaskError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.task, self.cause)
    }
}

/// Errors returned by [TaskRunner::run].
#[derive(Debug)]
pub enum TaskRunnerError {
    /// The runner was already used.
    AlreadyRun,
    /// A task failed and the sequence was aborted.
    Failed(TaskFailure),
}

impl fmt::Display for TaskRunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for TaskRunnerError {}

type SuccessHandler<'a, C> = Box<dyn FnOnce(&mut C) + 'a>;
type FaultHandler<'a, C> = Box<dyn FnOnce(&mut C, &TaskFailure) + 'a>;

/// Single-use, fail-fast executor of an ordered task list.
pub struct TaskRunner<'a, C> {
    label: String,
    tasks: Vec<Task<C>>,
    on_success: Option<SuccessHandler<'a, C>>,
    on_fault: Option<FaultHandler<'a, C>>,
    intercept: Option<Intercept>,
    has_run: bool,
}

impl<'a, C> TaskRunner<'a, C> {
    /// Creates a runner for `tasks` with its success and failure continuations.
    pub fn new(
        label: impl Into<String>,
        tasks: &[Task<C>],
        on_success: impl FnOnce(&mut C) + 'a,
        on_fault: impl FnOnce(&mut C, &TaskFailure) + 'a,
    ) -> Self {
        Self {
            label: label.into(),
            tasks: tasks.to_vec(),
            on_success: Some(Box::new(on_success)),
            on_fault: Some(Box::new(on_fault)),
            intercept: None,
            has_run: false,
        }
    }

    /// Arms a fault injection hook.
    pub fn with_intercept(mut self, intercept: Option<Intercept>) -> Self {
        self.intercept = intercept;
        self
    }

    /// Runs all tasks in order against `ctx`.
    ///
    /// Exactly one continuation fires: `on_success` after the last task, or
    /// `on_fault` with the first failure. A second call returns
    /// [TaskRunnerError::AlreadyRun] and fires nothing.
    pub fn run(&mut self, ctx: &mut C) -> Result<(), TaskRunnerError> {
        if self.has_run {
            log::error!("[{}] Task runner already used", self.label);
            return Err(TaskRunnerError::AlreadyRun);
        }
        self.has_run = true;

        for task in std::mem::take(&mut self.tasks) {
            log::debug!("[{}] Running {}", self.label, task.name);
            if let Err(cause) = self.run_task(&task, ctx) {
                let failure = TaskFailure {
                    task: task.name,
                    cause,
                };
                log::error!("[{}] {}", self.label, failure);
                self.on_success = None;
                if let Some(on_fault) = self.on_fault.take() {
                    on_fault(ctx, &failure);
                }
                return Err(TaskRunnerError::Failed(failure));
            }
        }

        log::info!("[{}] Completed", self.label);
        self.on_fault = None;
        if let Some(on_success) = self.on_success.take() {
            on_success(ctx);
        }
        Ok(())
    }

    fn run_task(&self, task: &Task<C>, ctx: &mut C) -> Result<(), TaskError> {
        let intercept = self.intercept.filter(|i| i.task == task.name);
        if let Some(Intercept {
            point: InterceptPoint::BeforeRun,
            ..
        }) = intercept
        {
            return Err(TaskError::Intercepted {
                task: task.name,
                point: InterceptPoint::BeforeRun,
            });
        }

        let body = task.run;
        panic::catch_unwind(AssertUnwindSafe(|| body(ctx))).map_err(|payload| {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            TaskError::Panicked(msg)
        })??;

        if let Some(Intercept {
            point: InterceptPoint::AfterRun,
            ..
        }) = intercept
        {
            return Err(TaskError::Intercepted {
                task: task.name,
                point: InterceptPoint::AfterRun,
            });
        }
        Ok(())
    }
}

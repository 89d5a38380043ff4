//! Error taxonomy and lifecycle outcomes for the stop-limit coordinator.
//!
//! `EngineError` classifies every failure the coordinator can observe into
//! one of six kinds. The kind determines how the caller responds — retry,
//! fall through to a different code path, surface to an operator, or simply
//! log and move on. `LifecycleOutcome` is the companion success-path type:
//! every lifecycle entry point returns one instead of throwing, so callers
//! branch on an enum rather than unwinding a call stack.

use std::time::Duration;

use thiserror::Error;

/// Errors observed while driving the stop-limit lifecycle.
///
/// Each variant corresponds to one of the six error kinds the reconciler,
/// serializer, lifecycle engine, and tracker distinguish between. The kind
/// drives retry/fallback policy; see the doc comment on each variant.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The broker (or another upstream dependency) failed in a way that is
    /// expected to clear on its own: network hiccups, HTTP 429/5xx, request
    /// timeouts. Callers retry with backoff up to a bounded number of
    /// attempts before surfacing.
    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    /// The broker rejected the request in a way retrying cannot fix: order
    /// rejected, instrument unknown, terminal order state. The caller drops
    /// the affected repository entry to terminal and falls through to a
    /// fresh attempt where the algorithm allows it.
    #[error("permanent upstream failure: {0}")]
    PermanentUpstream(String),

    /// A stream message or broker response didn't match the expected shape.
    /// Logged once per message type per minute and skipped; never brings
    /// down the stream worker.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Two views of the world disagree in a way that implies more than one
    /// active protective order exists for a symbol. The newer duplicate is
    /// canceled, the older one kept, and an operator alert fires.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// A durable-store read or write failed. Writes are queued for retry;
    /// reads fall back to the in-memory view. Never blocks lifecycle
    /// progress on its own.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// A configuration value failed to load or validate. The previous
    /// configuration (if any) is retained and the update rejected.
    #[error("config error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// Builds a [`EngineError::TransientUpstream`] from a displayable cause.
    pub fn transient_upstream(cause: impl std::fmt::Display) -> Self {
        Self::TransientUpstream(cause.to_string())
    }

    /// Builds a [`EngineError::PermanentUpstream`] from a displayable cause.
    pub fn permanent_upstream(cause: impl std::fmt::Display) -> Self {
        Self::PermanentUpstream(cause.to_string())
    }

    /// Builds a [`EngineError::ProtocolViolation`] from a displayable cause.
    pub fn protocol_violation(cause: impl std::fmt::Display) -> Self {
        Self::ProtocolViolation(cause.to_string())
    }

    /// Builds a [`EngineError::StateConflict`] from a displayable cause.
    pub fn state_conflict(cause: impl std::fmt::Display) -> Self {
        Self::StateConflict(cause.to_string())
    }

    /// Builds a [`EngineError::PersistenceFailure`] from a displayable cause.
    pub fn persistence_failure(cause: impl std::fmt::Display) -> Self {
        Self::PersistenceFailure(cause.to_string())
    }

    /// Builds a [`EngineError::ConfigError`] from a displayable cause.
    pub fn config_error(cause: impl std::fmt::Display) -> Self {
        Self::ConfigError(cause.to_string())
    }

    /// True for kinds a caller should retry with backoff before giving up.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream(_))
    }
}

/// Reason a lifecycle operation declined to act, or took no action because
/// none was needed.
///
/// Distinct from [`EngineError`]: these are not failures. `NoOp` means the
/// world was already in the desired state; `Skipped` means an entry
/// condition wasn't met (e.g. the position-wait deadline expired).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeReason {
    /// No tracker group's price band contains the fill price.
    NoMatchingTrackerGroup,
    /// The position never appeared within the wait deadline.
    PositionMissing,
    /// The event looked like a historical replay inside the reconnect
    /// window and no live position backed it up.
    ReplayDuringReconnect,
    /// An existing active order already matches the desired quantity.
    AlreadyAtDesiredQuantity,
    /// A free-form reason for cases not covered by the variants above.
    Other(String),
}

impl std::fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatchingTrackerGroup => write!(f, "no matching tracker group"),
            Self::PositionMissing => write!(f, "position missing"),
            Self::ReplayDuringReconnect => write!(f, "replay during reconnect window"),
            Self::AlreadyAtDesiredQuantity => write!(f, "already at desired quantity"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Result of a lifecycle entry point (`onBuyFilled`, `onPositionUpdate`,
/// `onOrderStatusChange`, `onTrackerStepAdvance`, ...).
///
/// Replaces exception-shaped control flow: every branch of the algorithm in
/// `spec.md` §4.3 returns one of these instead of throwing, so callers can
/// match on outcome rather than unwind a call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// A new stop-limit order was placed and a repository entry written.
    Created {
        /// Broker order id of the newly placed stop-limit.
        order_id: String,
    },
    /// An existing stop-limit order was modified (quantity or stop price).
    Modified {
        /// Broker order id of the modified stop-limit.
        order_id: String,
    },
    /// The world was already in the desired state; nothing changed.
    NoOp(OutcomeReason),
    /// An entry condition was not met; the operation declined to act.
    Skipped(OutcomeReason),
    /// The operation failed after exhausting its retry budget.
    Failed(EngineError),
}

impl LifecycleOutcome {
    /// True if this outcome represents a successful mutation (`Created` or
    /// `Modified`).
    #[must_use]
    pub const fn changed(&self) -> bool {
        matches!(self, Self::Created { .. } | Self::Modified { .. })
    }
}

/// A deadline-bounded wait for a predicate to become true.
///
/// Replaces ad-hoc polling loops (`setTimeout`-style retries) with one
/// explicit primitive: poll `predicate` every `interval` until it returns
/// `Some(value)` or `deadline` elapses, whichever comes first.
pub async fn wait_with_deadline<F, Fut, T>(
    interval: Duration,
    deadline: Duration,
    mut predicate: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let start = tokio::time::Instant::now();
    loop {
        if let Some(value) = predicate().await {
            return Some(value);
        }
        if start.elapsed() >= deadline {
            return None;
        }
        tokio::time::sleep(interval).await;
    }
}

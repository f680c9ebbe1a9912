use std::time::Duration;

use thiserror::Error;

use crate::BoxError;

/// Errors raised by the host loop itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    /// The loop has quit or was dropped and accepts no more work.
    #[error("event loop is closed")]
    Closed,

    /// A virtual event sequence that does not follow the `<<name>>` convention.
    #[error("invalid virtual event sequence: {0:?}")]
    InvalidSequence(String),

    /// A loop-thread-only operation was attempted from another thread.
    #[error("operation must run on the event loop thread")]
    NotLoopThread,
}

/// Errors surfaced to callers of ordinary proxies.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// The wrapped method failed; carries the original error or panic message.
    #[error("proxied call failed: {0}")]
    TargetRaised(#[source] BoxError),

    /// The call could not be handed to the loop, or the loop dropped it unexecuted.
    #[error("could not schedule call on the event loop: {0}")]
    SchedulingFailed(#[source] LoopError),

    /// No completion arrived within the configured wait.
    #[error("proxied call did not complete within {0:?}")]
    TimeoutExceeded(Duration),

    /// A call made on the loop thread from inside another call on the same target.
    #[error("proxied call re-entered its own target")]
    Reentrant,

    /// An async call was awaited on the loop thread, which would block the loop forever.
    #[error("proxied call awaited on the event loop thread")]
    AwaitedOnLoopThread,
}

impl ProxyError {
    /// Returns `true` if the wrapped method itself failed, as opposed to the transport.
    pub fn is_target_error(&self) -> bool {
        matches!(self, ProxyError::TargetRaised(_))
    }

    /// Downcasts the error raised by the target, if any.
    pub fn target_error<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            ProxyError::TargetRaised(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<LoopError> for ProxyError {
    fn from(err: LoopError) -> Self {
        ProxyError::SchedulingFailed(err)
    }
}

/// Errors detected while delivering virtual events that carry data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventDataError {
    /// A payload id was dispatched but nothing is stored for it.
    ///
    /// Indicates a double dispatch or an id collision, never a user error.
    #[error("no pending payload for event id {0}")]
    PayloadLookupMiss(u64),

    /// A native event reached a data dispatcher without a payload id in its detail.
    #[error("virtual event detail {0:?} is not a payload id")]
    MissingId(String),

    /// The stored payload is not of the type the handler was bound for.
    #[error("payload for {sequence} is not a {expected}")]
    PayloadType {
        sequence: String,
        expected: &'static str,
    },
}

/// A panic captured while running a proxied call on the loop thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("target panicked: {message}")]
pub struct TargetPanic {
    pub message: String,
}

impl TargetPanic {
    pub(crate) fn from_payload(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}

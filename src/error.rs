//! Error taxonomy for the bridge.
//!
//! Argument and range errors surface in script as thrown exceptions. Detached
//! access is deliberately fail-soft and never thrown. Invariant violations
//! mean the bridge itself is broken and abort the current operation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Bad constructor inputs: unknown type descriptor, non-positive size, wrong receiver.
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    /// Indexed access beyond a known element count.
    #[error("OutOfRange: index {index} is out of range for {count} element(s)")]
    OutOfRange { index: u32, count: usize },

    /// The payload was already torn down. Callers degrade to a no-op.
    #[error("DetachedAccess: {0}")]
    DetachedAccess(&'static str),

    /// Bookkeeping reached a state that the bridge never produces.
    #[error("InternalInvariantViolation: {0}")]
    InternalInvariantViolation(String),

    /// A script failed to compile or threw.
    #[error("Script error: {0}")]
    Script(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Throw this error into the isolate that owns `scope`.
    ///
    /// Detached access is swallowed here so call sites can propagate it with
    /// `?` and still get the fail-soft behaviour.
    pub fn throw(&self, scope: &mut v8::PinScope) {
        let message = self.to_string();

        let Some(text) = v8::String::new(scope, &message) else {
            return;
        };

        let exception = match self {
            BridgeError::DetachedAccess(what) => {
                tracing::debug!("Ignoring access to detached payload: {}", what);
                return;
            }
            BridgeError::InvalidArgument(_) => v8::Exception::type_error(scope, text),
            BridgeError::OutOfRange { .. } => v8::Exception::range_error(scope, text),
            _ => v8::Exception::error(scope, text),
        };

        scope.throw_exception(exception);
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(message.into())
    }
}

/// Report a broken bridge invariant.
///
/// These are bugs in the bridge rather than misuse from script, so there is no
/// recovery path.
#[track_caller]
pub fn invariant_violation(message: impl Into<String>) -> ! {
    let message = message.into();
    tracing::error!("Bridge invariant violated: {}", message);
    panic!("{}", BridgeError::InternalInvariantViolation(message));
}

//! Dynamic stand-ins for declared API types.

use std::fmt;
use std::sync::Arc;

use apiproc_core::Value;

use crate::service::dispatcher::Dispatcher;
use crate::service::operation::{DispatchError, DispatchOutcome};

/// Implementation object of a declared type: forwards every call, as
/// `(declared type, operation, arguments)`, into the dispatcher.
#[derive(Clone)]
pub struct StandIn {
    declared_type: Arc<str>,
    dispatcher: Arc<Dispatcher>,
}

impl StandIn {
    pub(crate) fn new(declared_type: &str, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            declared_type: Arc::from(declared_type),
            dispatcher,
        }
    }

    #[must_use]
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// Dispatches `operation` and returns the raw outcome.
    ///
    /// # Errors
    ///
    /// Propagates the [`DispatchError`] of the call.
    pub fn invoke(&self, operation: &str, arguments: Vec<Value>) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher
            .dispatch(&self.declared_type, operation, arguments)
    }

    /// Calls a value-returning operation.
    ///
    /// # Errors
    ///
    /// Propagates the [`DispatchError`] of the call, or returns
    /// [`DispatchError::UnexpectedOutcome`] if `operation` is a delegate.
    pub fn call(&self, operation: &str, arguments: Vec<Value>) -> Result<Value, DispatchError> {
        match self.invoke(operation, arguments)? {
            DispatchOutcome::Returned(value) => Ok(value),
            DispatchOutcome::Delegated(_) => Err(DispatchError::UnexpectedOutcome {
                signature: format!("{}@{operation}", self.declared_type),
                detail: "is a delegate operation and returns an API, not a value",
            }),
        }
    }

    /// Calls a delegate operation, returning the stand-in it produces.
    ///
    /// # Errors
    ///
    /// Propagates the [`DispatchError`] of the call, or returns
    /// [`DispatchError::UnexpectedOutcome`] if `operation` returns a value.
    pub fn delegate(&self, operation: &str, arguments: Vec<Value>) -> Result<StandIn, DispatchError> {
        match self.invoke(operation, arguments)? {
            DispatchOutcome::Delegated(stand_in) => Ok(stand_in),
            DispatchOutcome::Returned(_) => Err(DispatchError::UnexpectedOutcome {
                signature: format!("{}@{operation}", self.declared_type),
                detail: "returns a value, not an API",
            }),
        }
    }
}

impl fmt::Debug for StandIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StandIn")
            .field("declared_type", &self.declared_type)
            .finish_non_exhaustive()
    }
}

/// A typed adapter over a [`StandIn`].
///
/// Implement for a wrapper struct to expose a declared type's operations as
/// ordinary methods; obtain instances with
/// [`ApiProcessor::get`](crate::processor::ApiProcessor::get).
pub trait DeclaredApi: Sized {
    /// Name of the declared type this adapter fronts.
    const TYPE_NAME: &'static str;

    fn from_stand_in(stand_in: StandIn) -> Self;
}

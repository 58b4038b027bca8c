//! Compatibility gate between adjacent pipeline stages.
//!
//! Each link pairs a producer type with a consumer type. Verdicts are cached
//! per `(signature, link)` by the metadata cache; a fatal mismatch aborts the
//! call before the execution stage runs. Links that are compatible only
//! because one side is unknown are returned so the dispatcher can check the
//! values that actually flow across them.

use std::fmt;

use apiproc_core::{compat, InvocationContext, TypeDescriptor, Value, Verdict};

use super::operation::DispatchError;
use crate::metadata::MetadataCache;

/// A producer/consumer edge of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageLink {
    /// Request output feeds the execution input.
    RequestToExecution,
    /// Error stage input agrees with the execution input.
    ExecutionToError,
    /// Fallback output is returned to the caller.
    FallbackToReturn,
    /// Execution output feeds the response input.
    ExecutionToResponse,
    /// Response output is returned to the caller.
    ResponseToReturn,
    /// Execution output is returned directly (no response stage).
    ExecutionToReturn,
}

impl fmt::Display for StageLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageLink::RequestToExecution => "request -> execution",
            StageLink::ExecutionToError => "execution -> error",
            StageLink::FallbackToReturn => "fallback -> return",
            StageLink::ExecutionToResponse => "execution -> response",
            StageLink::ResponseToReturn => "response -> return",
            StageLink::ExecutionToReturn => "execution -> return",
        };
        f.write_str(s)
    }
}

/// A link whose static verdict was not exact; values crossing it are checked
/// against `target` at call time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCheck {
    pub link: StageLink,
    pub verdict: Verdict,
    pub target: TypeDescriptor,
}

/// Result of the static gate for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateReport {
    pub pending: Vec<PendingCheck>,
}

impl GateReport {
    /// Target of `link` if its values need a runtime check.
    #[must_use]
    pub fn pending(&self, link: StageLink) -> Option<&TypeDescriptor> {
        self.pending
            .iter()
            .find(|c| c.link == link)
            .map(|c| &c.target)
    }

    /// Checks `value` against the target of `link` when that link is pending.
    ///
    /// `Null` is left to the null rules and always passes here.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ValueMismatch`] when the value's shape is
    /// incompatible with the target.
    pub fn check_value(
        &self,
        signature: &str,
        link: StageLink,
        value: &Value,
    ) -> Result<(), DispatchError> {
        let Some(target) = self.pending(link) else {
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        let target = unwrap_option(target);
        let actual = TypeDescriptor::of_value(value);
        if compat::compare(&actual, target).is_err() {
            return Err(DispatchError::ValueMismatch {
                signature: signature.to_string(),
                link,
                actual,
                expected: target.clone(),
            });
        }
        Ok(())
    }
}

fn unwrap_option(ty: &TypeDescriptor) -> &TypeDescriptor {
    match ty.sub_type(0) {
        Some(inner) if ty.main_type() == apiproc_core::descriptor::names::OPTION => inner,
        _ => ty,
    }
}

/// The links that apply to a resolved call, with producer and consumer types.
///
/// Links ending at the return type are omitted for `void` operations, whose
/// result is discarded.
#[must_use]
pub fn links_of(ctx: &InvocationContext) -> Vec<(StageLink, TypeDescriptor, TypeDescriptor)> {
    let handlers = ctx.handlers();
    let execution = &handlers.execution.types;
    let return_type = ctx.return_type();
    let returns_value = !return_type.is_void();
    let mut links = Vec::new();

    if let Some(request) = &handlers.request {
        links.push((
            StageLink::RequestToExecution,
            request.types.output.clone(),
            execution.input.clone(),
        ));
    }
    if let Some(error) = &handlers.error {
        links.push((
            StageLink::ExecutionToError,
            execution.input.clone(),
            error.types.input.clone(),
        ));
    }
    if let Some(fallback) = &handlers.fallback {
        if returns_value {
            links.push((
                StageLink::FallbackToReturn,
                fallback.types.output.clone(),
                return_type.clone(),
            ));
        }
    }
    if let Some(response) = &handlers.response {
        links.push((
            StageLink::ExecutionToResponse,
            execution.output.clone(),
            response.types.input.clone(),
        ));
        if returns_value {
            links.push((
                StageLink::ResponseToReturn,
                response.types.output.clone(),
                return_type.clone(),
            ));
        }
    } else if returns_value {
        links.push((
            StageLink::ExecutionToReturn,
            execution.output.clone(),
            return_type.clone(),
        ));
    }
    links
}

/// Runs the static compatibility gate for `ctx`.
///
/// # Errors
///
/// Returns [`DispatchError::TypeMismatch`] for the first incompatible link.
pub fn evaluate(metadata: &MetadataCache, ctx: &InvocationContext) -> Result<GateReport, DispatchError> {
    let signature = ctx.signature();
    let mut report = GateReport::default();
    for (link, producer, consumer) in links_of(ctx) {
        let verdict = metadata
            .compatibility_for(signature, link, &producer, &consumer)
            .map_err(|source| DispatchError::TypeMismatch {
                signature: signature.to_string(),
                link,
                source,
            })?;
        if !verdict.is_exact() {
            report.pending.push(PendingCheck {
                link,
                verdict,
                target: consumer,
            });
        }
    }
    Ok(report)
}

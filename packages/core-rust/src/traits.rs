//! Stage handler contracts.
//!
//! A pipeline is composed of up to five stages. Every handler implements the
//! [`Stage`] supertrait, which exposes a diagnostic name and the declared
//! input/output [`StageTypes`]; the types are captured once at registration
//! and used by the compatibility gate.

use std::fmt;

use crate::context::InvocationContext;
use crate::descriptor::TypeDescriptor;
use crate::types::Value;

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageKind {
    Request,
    Execution,
    Error,
    Fallback,
    Response,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Request,
        StageKind::Execution,
        StageKind::Error,
        StageKind::Fallback,
        StageKind::Response,
    ];

    /// Configuration key binding this stage (e.g. `"executionHandler"`).
    #[must_use]
    pub fn binding_key(self) -> &'static str {
        match self {
            StageKind::Request => "requestHandler",
            StageKind::Execution => "executionHandler",
            StageKind::Error => "errorHandler",
            StageKind::Fallback => "fallbackHandler",
            StageKind::Response => "responseHandler",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageKind::Request => "request",
            StageKind::Execution => "execution",
            StageKind::Error => "error",
            StageKind::Fallback => "fallback",
            StageKind::Response => "response",
        };
        f.write_str(s)
    }
}

/// Declared input and output types of a stage handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageTypes {
    pub input: TypeDescriptor,
    pub output: TypeDescriptor,
}

impl StageTypes {
    #[must_use]
    pub fn new(input: TypeDescriptor, output: TypeDescriptor) -> Self {
        Self { input, output }
    }

    /// `any -> any`: compatible with everything, always value-checked.
    #[must_use]
    pub fn generic() -> Self {
        Self::new(TypeDescriptor::any(), TypeDescriptor::any())
    }
}

/// Common supertrait of all stage handlers.
pub trait Stage: Send + Sync + 'static {
    /// Diagnostic name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Declared input/output types. Queried once, at registration.
    fn types(&self) -> StageTypes {
        StageTypes::generic()
    }
}

/// Shapes the execution context before the execution stage runs.
///
/// Receives a fresh instance of its declared input type and returns the
/// context actually handed to the execution stage (which may be the same
/// value, a modified copy, or `Null` when the execution input is `void`).
pub trait RequestHandler: Stage {
    /// # Errors
    ///
    /// Any error aborts the call; it is not routed through the error stages.
    fn apply(&self, context: Value) -> anyhow::Result<Value>;
}

/// Performs the operation itself.
pub trait ExecutionHandler: Stage {
    /// # Errors
    ///
    /// A failure is retried per the retry policy and then becomes the
    /// pending error seen by the error and fallback stages.
    fn apply(&self, invocation: &InvocationContext) -> anyhow::Result<Value>;
}

/// Inputs to the error stage.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    pub invocation: &'a InvocationContext,
    pub error: &'a anyhow::Error,
}

/// Translates a pending execution error.
pub trait ErrorHandler: Stage {
    /// Returns a replacement error, or `None` to keep the original.
    ///
    /// # Errors
    ///
    /// A failure of the handler itself aborts the call.
    fn apply(&self, ctx: ErrorContext<'_>) -> anyhow::Result<Option<anyhow::Error>>;
}

/// Inputs to the fallback stage.
#[derive(Debug, Clone, Copy)]
pub struct FallbackContext<'a> {
    pub invocation: &'a InvocationContext,
    pub return_type: &'a TypeDescriptor,
    pub error: &'a anyhow::Error,
}

/// Produces a substitute result when a pending error remains.
pub trait FallbackHandler: Stage {
    /// # Errors
    ///
    /// A failure of the handler itself aborts the call.
    fn apply(&self, ctx: FallbackContext<'_>) -> anyhow::Result<Value>;
}

/// Inputs to the response stage.
#[derive(Debug, Clone)]
pub struct ResponseContext<'a> {
    pub invocation: &'a InvocationContext,
    /// Raw execution result.
    pub result: Value,
    pub return_type: &'a TypeDescriptor,
}

impl ResponseContext<'_> {
    /// The execution context the request stage produced.
    #[must_use]
    pub fn context(&self) -> &Value {
        self.invocation.context()
    }
}

/// Shapes the raw execution result into the value returned to the caller.
pub trait ResponseHandler: Stage {
    /// # Errors
    ///
    /// A failure of the handler itself aborts the call.
    fn apply(&self, ctx: ResponseContext<'_>) -> anyhow::Result<Value>;
}

// ---------------------------------------------------------------------------
// Closure adapters
// ---------------------------------------------------------------------------

/// Stage handler backed by a closure.
///
/// Built through [`request_fn`], [`execution_fn`], [`error_fn`],
/// [`fallback_fn`] or [`response_fn`], which pin the closure signature.
pub struct FnStage<F> {
    name: &'static str,
    types: StageTypes,
    f: F,
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
            .field("name", &self.name)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

impl<F: Send + Sync + 'static> Stage for FnStage<F> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn types(&self) -> StageTypes {
        self.types.clone()
    }
}

pub fn request_fn<F>(name: &'static str, types: StageTypes, f: F) -> FnStage<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    FnStage { name, types, f }
}

pub fn execution_fn<F>(name: &'static str, types: StageTypes, f: F) -> FnStage<F>
where
    F: Fn(&InvocationContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    FnStage { name, types, f }
}

pub fn error_fn<F>(name: &'static str, types: StageTypes, f: F) -> FnStage<F>
where
    F: Fn(ErrorContext<'_>) -> anyhow::Result<Option<anyhow::Error>> + Send + Sync + 'static,
{
    FnStage { name, types, f }
}

pub fn fallback_fn<F>(name: &'static str, types: StageTypes, f: F) -> FnStage<F>
where
    F: Fn(FallbackContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    FnStage { name, types, f }
}

pub fn response_fn<F>(name: &'static str, types: StageTypes, f: F) -> FnStage<F>
where
    F: Fn(ResponseContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    FnStage { name, types, f }
}

impl<F> RequestHandler for FnStage<F>
where
    F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn apply(&self, context: Value) -> anyhow::Result<Value> {
        (self.f)(context)
    }
}

impl<F> ExecutionHandler for FnStage<F>
where
    F: Fn(&InvocationContext) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn apply(&self, invocation: &InvocationContext) -> anyhow::Result<Value> {
        (self.f)(invocation)
    }
}

impl<F> ErrorHandler for FnStage<F>
where
    F: Fn(ErrorContext<'_>) -> anyhow::Result<Option<anyhow::Error>> + Send + Sync + 'static,
{
    fn apply(&self, ctx: ErrorContext<'_>) -> anyhow::Result<Option<anyhow::Error>> {
        (self.f)(ctx)
    }
}

impl<F> FallbackHandler for FnStage<F>
where
    F: Fn(FallbackContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn apply(&self, ctx: FallbackContext<'_>) -> anyhow::Result<Value> {
        (self.f)(ctx)
    }
}

impl<F> ResponseHandler for FnStage<F>
where
    F: Fn(ResponseContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn apply(&self, ctx: ResponseContext<'_>) -> anyhow::Result<Value> {
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl Stage for Passthrough {}

    impl RequestHandler for Passthrough {
        fn apply(&self, context: Value) -> anyhow::Result<Value> {
            Ok(context)
        }
    }

    #[test]
    fn default_stage_metadata() {
        let stage = Passthrough;
        assert!(stage.name().ends_with("Passthrough"));
        assert_eq!(stage.types(), StageTypes::generic());
        assert_eq!(stage.apply(Value::Int(1)).unwrap(), Value::Int(1));
    }

    #[test]
    fn closure_adapter_reports_given_metadata() {
        let types = StageTypes::new(TypeDescriptor::string(), TypeDescriptor::int());
        let stage = request_fn("len", types.clone(), |v| {
            Ok(Value::Int(v.as_str().map_or(0, str::len) as i64))
        });
        assert_eq!(stage.name(), "len");
        assert_eq!(stage.types(), types);
        assert_eq!(
            RequestHandler::apply(&stage, Value::from("abc")).unwrap(),
            Value::Int(3)
        );
    }

    #[test]
    fn binding_keys_follow_configuration_names() {
        let keys: Vec<_> = StageKind::ALL.iter().map(|k| k.binding_key()).collect();
        assert_eq!(
            keys,
            [
                "requestHandler",
                "executionHandler",
                "errorHandler",
                "fallbackHandler",
                "responseHandler"
            ]
        );
    }
}

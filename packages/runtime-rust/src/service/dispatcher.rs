//! Invocation pipeline.
//!
//! Per call: resolve the invocation context, run the compatibility gate,
//! build the execution context, execute under the retry policy, then route a
//! pending error through the error and fallback stages or shape the result
//! through the response stage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use apiproc_core::descriptor::names;
use apiproc_core::{
    ErrorContext, FallbackContext, InvocationContext, ResponseContext, StageKind, TypeDescriptor,
    Value,
};
use tracing::{debug, info_span, trace};

use super::gate::{self, GateReport, StageLink};
use super::operation::{DispatchError, DispatchOutcome};
use super::retry::RetryExecutor;
use crate::metadata::MetadataCache;
use crate::stand_in::StandIn;
use crate::traits::DependencyContainer;

fn stage_failure(signature: &str, stage: StageKind) -> impl FnOnce(anyhow::Error) -> DispatchError + '_ {
    move |source| DispatchError::Stage {
        signature: signature.to_string(),
        stage,
        source,
    }
}

fn check_null(
    signature: &str,
    stage: StageKind,
    value: &Value,
    expected: &TypeDescriptor,
) -> Result<(), DispatchError> {
    if value.is_null() && !expected.accepts_null() {
        return Err(DispatchError::NullNotAllowed {
            signature: signature.to_string(),
            stage,
            expected: expected.clone(),
        });
    }
    Ok(())
}

/// Routes calls on declared types through their configured stage pipeline.
pub struct Dispatcher {
    metadata: MetadataCache,
    container: Arc<dyn DependencyContainer>,
    retry: RetryExecutor,
    next_call_id: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        metadata: MetadataCache,
        container: Arc<dyn DependencyContainer>,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            metadata,
            container,
            retry,
            next_call_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    /// Dispatches one call of `operation` on `declared_type`.
    ///
    /// # Errors
    ///
    /// See [`DispatchError`]: configuration and type errors are raised before
    /// execution; an execution failure without a fallback surfaces as
    /// [`DispatchError::Unhandled`] carrying the original error.
    pub fn dispatch(
        self: &Arc<Self>,
        declared_type: &str,
        operation: &str,
        arguments: Vec<Value>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let span = info_span!(
            "dispatch",
            declared_type,
            operation,
            call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        let _entered = span.enter();
        let start = Instant::now();

        let result = self.run(declared_type, operation, arguments);

        let outcome = match &result {
            Ok(DispatchOutcome::Returned(_)) => "returned",
            Ok(DispatchOutcome::Delegated(_)) => "delegated",
            Err(_) => "thrown",
        };
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        span.record("duration_ms", duration_ms);
        span.record("outcome", outcome);
        match &result {
            Err(err) => debug!(duration_ms, outcome, error = %err, "dispatch complete"),
            Ok(_) => debug!(duration_ms, outcome, "dispatch complete"),
        }
        result
    }

    fn run(
        self: &Arc<Self>,
        declared_type: &str,
        operation: &str,
        arguments: Vec<Value>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let op = self.metadata.operation_for(declared_type, operation)?;
        if op.delegate {
            if arguments.len() != op.parameters.len() {
                return Err(DispatchError::InvalidArguments {
                    signature: op.signature.clone(),
                    expected: op.parameters.len(),
                    actual: arguments.len(),
                });
            }
            trace!(target_type = %op.return_type, "delegating to new stand-in");
            let stand_in = StandIn::new(op.return_type.main_type(), Arc::clone(self));
            return Ok(DispatchOutcome::Delegated(stand_in));
        }

        let mut ctx = self.metadata.context_for(declared_type, operation, arguments)?;
        let report = gate::evaluate(&self.metadata, &ctx)?;
        let context = self.execution_context(&ctx, &report)?;
        ctx.set_context(context);
        let value = self.execute(&ctx, &report)?;

        if ctx.return_type().is_void() {
            return Ok(DispatchOutcome::Returned(Value::Null));
        }
        Ok(DispatchOutcome::Returned(value))
    }

    /// Builds the value handed to the execution stage.
    fn execution_context(
        &self,
        ctx: &InvocationContext,
        report: &GateReport,
    ) -> Result<Value, DispatchError> {
        let signature = ctx.signature();
        let execution_input = &ctx.handlers().execution.types.input;
        let container_failure = stage_failure(signature, StageKind::Request);

        let Some(request) = &ctx.handlers().request else {
            return self
                .container
                .instance_of(execution_input)
                .map_err(container_failure);
        };

        let fresh = self
            .container
            .instance_of(&request.types.input)
            .map_err(container_failure)?;
        trace!(handler = &*request.name, "running request stage");
        let mut shaped = request
            .handler
            .apply(fresh.clone())
            .map_err(stage_failure(signature, StageKind::Request))?;

        if shaped.is_null() {
            let nullable = execution_input.is_void()
                || execution_input.main_type() == names::OPTION;
            if !nullable {
                return Err(DispatchError::NullNotAllowed {
                    signature: signature.to_string(),
                    stage: StageKind::Request,
                    expected: execution_input.clone(),
                });
            }
        } else if shaped != fresh {
            self.container
                .inject_members(&mut shaped)
                .map_err(stage_failure(signature, StageKind::Request))?;
        }
        report.check_value(signature, StageLink::RequestToExecution, &shaped)?;
        Ok(shaped)
    }

    /// Steps 5 to 8: execution, error translation, fallback or response.
    fn execute(&self, ctx: &InvocationContext, report: &GateReport) -> Result<Value, DispatchError> {
        let signature = ctx.signature();
        let handlers = ctx.handlers();
        let return_type = ctx.return_type();
        let returns_value = !return_type.is_void();

        let execution = &handlers.execution;
        trace!(handler = &*execution.name, "running execution stage");
        let mut pending = None;
        let mut result = match self.retry.run(signature, |_| execution.handler.apply(ctx)) {
            Ok(value) => value,
            Err(err) => {
                pending = Some(err);
                Value::Null
            }
        };

        if let Some(error_stage) = &handlers.error {
            if let Some(err) = pending.take() {
                trace!(handler = &*error_stage.name, "running error stage");
                let replacement = error_stage
                    .handler
                    .apply(ErrorContext {
                        invocation: ctx,
                        error: &err,
                    })
                    .map_err(stage_failure(signature, StageKind::Error))?;
                pending = Some(replacement.unwrap_or(err));
            }
        }

        if let Some(err) = pending {
            let Some(fallback) = &handlers.fallback else {
                return Err(DispatchError::Unhandled {
                    signature: signature.to_string(),
                    source: err,
                });
            };
            trace!(handler = &*fallback.name, error = %err, "running fallback stage");
            let value = fallback
                .handler
                .apply(FallbackContext {
                    invocation: ctx,
                    return_type,
                    error: &err,
                })
                .map_err(stage_failure(signature, StageKind::Fallback))?;
            if returns_value {
                check_null(signature, StageKind::Fallback, &value, return_type)?;
                report.check_value(signature, StageLink::FallbackToReturn, &value)?;
            }
            // A fallback result is final: the response stage does not run.
            return Ok(value);
        }

        if let Some(response) = &handlers.response {
            report.check_value(signature, StageLink::ExecutionToResponse, &result)?;
            trace!(handler = &*response.name, "running response stage");
            let value = response
                .handler
                .apply(ResponseContext {
                    invocation: ctx,
                    result,
                    return_type,
                })
                .map_err(stage_failure(signature, StageKind::Response))?;
            if returns_value {
                check_null(signature, StageKind::Response, &value, return_type)?;
                report.check_value(signature, StageLink::ResponseToReturn, &value)?;
            }
            result = value;
        } else if returns_value {
            check_null(signature, StageKind::Execution, &result, return_type)?;
            report.check_value(signature, StageLink::ExecutionToReturn, &result)?;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("metadata", &self.metadata)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use apiproc_core::traits::{error_fn, execution_fn, fallback_fn, request_fn, response_fn};
    use apiproc_core::{DeclaredTypeSchema, OperationSchema, StageTypes, StructuralChecker};
    use parking_lot::Mutex;

    use super::*;
    use crate::container::DefaultContainer;
    use crate::service::config::ProcessorConfig;
    use crate::service::registry::HandlerRegistry;
    use crate::service::retry::{Backoff, RetryPolicy};
    use crate::source::InMemorySource;

    #[derive(Debug, thiserror::Error)]
    #[error("remote failure")]
    struct RemoteFailure;

    #[derive(Debug, thiserror::Error)]
    #[error("translated")]
    struct Translated;

    struct Fixture {
        registry: Arc<HandlerRegistry>,
        source: Arc<InMemorySource>,
        container: Arc<DefaultContainer>,
        retries: u32,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Arc::new(HandlerRegistry::new()),
                source: Arc::new(InMemorySource::new()),
                container: Arc::new(DefaultContainer::new()),
                retries: 0,
            }
        }

        fn build(&self) -> Arc<Dispatcher> {
            let metadata = MetadataCache::new(
                &ProcessorConfig::default(),
                self.source.clone(),
                Arc::clone(&self.registry),
                Arc::new(StructuralChecker),
            );
            let retry = RetryExecutor::new(RetryPolicy {
                max_retries: self.retries,
                initial_delay: Duration::ZERO,
                backoff: Backoff::Fixed,
            })
            .with_sleeper(|_| {});
            Arc::new(Dispatcher::new(metadata, self.container.clone(), retry))
        }
    }

    fn returned(outcome: Result<DispatchOutcome, DispatchError>) -> Value {
        match outcome {
            Ok(DispatchOutcome::Returned(value)) => value,
            other => panic!("expected a returned value, got {other:?}"),
        }
    }

    fn api(op: OperationSchema) -> DeclaredTypeSchema {
        DeclaredTypeSchema::interface("Api").operation(op)
    }

    /// Counts attempts; returns `ok` or fails with [`RemoteFailure`] when `None`.
    fn counting_exec(
        counter: &Arc<AtomicUsize>,
        types: StageTypes,
        ok: Option<Value>,
    ) -> impl apiproc_core::ExecutionHandler {
        let counter = Arc::clone(counter);
        execution_fn("counting", types, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            ok.clone().ok_or_else(|| anyhow::Error::new(RemoteFailure))
        })
    }

    #[test]
    fn unconfigured_pipeline_returns_execution_result() {
        let fx = Fixture::new();
        fx.registry.register_execution(
            "sum",
            execution_fn(
                "sum",
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::int()),
                |ctx| {
                    let total = ctx.arguments().iter().filter_map(Value::as_int).sum::<i64>();
                    Ok(Value::Int(total))
                },
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("add")
                .param("a", TypeDescriptor::int())
                .param("b", TypeDescriptor::int())
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "sum"),
        ));
        let dispatcher = fx.build();
        let value = returned(dispatcher.dispatch("Api", "add", vec![Value::Int(2), Value::Int(3)]));
        assert_eq!(value, Value::Int(5));
    }

    #[test]
    fn retry_count_n_gives_n_plus_one_attempts() {
        let mut fx = Fixture::new();
        fx.retries = 2;
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "flaky",
            counting_exec(&attempts, StageTypes::generic(), None),
        );
        fx.source.insert(api(
            OperationSchema::new("get")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "flaky"),
        ));
        let err = fx.build().dispatch("Api", "get", vec![]).unwrap_err();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(err, DispatchError::Unhandled { .. }));
    }

    #[test]
    fn failing_execution_without_fallback_throws_original_error() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "remote",
            counting_exec(
                &attempts,
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::int()),
                None,
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "remote"),
        ));
        let err = fx.build().dispatch("Api", "count", vec![]).unwrap_err();
        assert!(err.into_source().downcast_ref::<RemoteFailure>().is_some());
    }

    #[test]
    fn fallback_value_reaches_caller_and_skips_response() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let responses = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "remote",
            counting_exec(
                &attempts,
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::int()),
                None,
            ),
        );
        fx.registry.register_fallback(
            "answer",
            fallback_fn(
                "answer",
                StageTypes::new(TypeDescriptor::any(), TypeDescriptor::int()),
                |ctx| {
                    assert!(ctx.error.downcast_ref::<RemoteFailure>().is_some());
                    Ok(Value::Int(42))
                },
            ),
        );
        let seen = Arc::clone(&responses);
        fx.registry.register_response(
            "double",
            response_fn(
                "double",
                StageTypes::new(TypeDescriptor::int(), TypeDescriptor::int()),
                move |ctx| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Int(ctx.result.as_int().unwrap_or(0) * 2))
                },
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "remote")
                .bind(StageKind::Fallback, "answer")
                .bind(StageKind::Response, "double"),
        ));
        let value = returned(fx.build().dispatch("Api", "count", vec![]));
        assert_eq!(value, Value::Int(42));
        assert_eq!(responses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn response_output_replaces_raw_result() {
        let fx = Fixture::new();
        fx.registry.register_execution(
            "raw",
            execution_fn(
                "raw",
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::int()),
                |_| Ok(Value::Int(21)),
            ),
        );
        fx.registry.register_response(
            "double",
            response_fn(
                "double",
                StageTypes::new(TypeDescriptor::int(), TypeDescriptor::int()),
                |ctx| Ok(Value::Int(ctx.result.as_int().unwrap_or(0) * 2)),
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "raw")
                .bind(StageKind::Response, "double"),
        ));
        assert_eq!(returned(fx.build().dispatch("Api", "count", vec![])), Value::Int(42));
    }

    #[test]
    fn error_stage_replacement_reaches_caller() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "remote",
            counting_exec(&attempts, StageTypes::generic(), None),
        );
        fx.registry.register_error(
            "translate",
            error_fn("translate", StageTypes::generic(), |_| {
                Ok(Some(anyhow::Error::new(Translated)))
            }),
        );
        fx.registry.register_error(
            "keep",
            error_fn("keep", StageTypes::generic(), |_| Ok(None)),
        );
        fx.source.insert(
            DeclaredTypeSchema::interface("Api")
                .operation(
                    OperationSchema::new("translated")
                        .bind(StageKind::Execution, "remote")
                        .bind(StageKind::Error, "translate"),
                )
                .operation(
                    OperationSchema::new("kept")
                        .bind(StageKind::Execution, "remote")
                        .bind(StageKind::Error, "keep"),
                ),
        );
        let dispatcher = fx.build();
        let err = dispatcher.dispatch("Api", "translated", vec![]).unwrap_err();
        assert!(err.into_source().downcast_ref::<Translated>().is_some());
        let err = dispatcher.dispatch("Api", "kept", vec![]).unwrap_err();
        assert!(err.into_source().downcast_ref::<RemoteFailure>().is_some());
    }

    #[test]
    fn failing_error_stage_propagates_without_fallback() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let fallbacks = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "remote",
            counting_exec(&attempts, StageTypes::generic(), None),
        );
        fx.registry.register_error(
            "broken",
            error_fn("broken", StageTypes::generic(), |_| anyhow::bail!("translator down")),
        );
        let seen = Arc::clone(&fallbacks);
        fx.registry.register_fallback(
            "answer",
            fallback_fn("answer", StageTypes::generic(), move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Int(42))
            }),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "remote")
                .bind(StageKind::Error, "broken")
                .bind(StageKind::Fallback, "answer"),
        ));
        let err = fx.build().dispatch("Api", "count", vec![]).unwrap_err();
        assert!(matches!(err, DispatchError::Stage { stage: StageKind::Error, .. }));
        assert_eq!(err.into_source().to_string(), "translator down");
        assert_eq!(fallbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_fallback_and_response_stages_propagate() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let int_out = StageTypes::new(TypeDescriptor::void(), TypeDescriptor::int());
        fx.registry.register_execution(
            "remote",
            counting_exec(&attempts, int_out.clone(), None),
        );
        fx.registry.register_execution(
            "one",
            counting_exec(&attempts, int_out, Some(Value::Int(1))),
        );
        fx.registry.register_fallback(
            "broken-fallback",
            fallback_fn(
                "broken-fallback",
                StageTypes::new(TypeDescriptor::any(), TypeDescriptor::int()),
                |_| anyhow::bail!("no substitute"),
            ),
        );
        fx.registry.register_response(
            "broken-response",
            response_fn(
                "broken-response",
                StageTypes::new(TypeDescriptor::int(), TypeDescriptor::int()),
                |_| anyhow::bail!("cannot shape"),
            ),
        );
        fx.source.insert(
            DeclaredTypeSchema::interface("Api")
                .operation(
                    OperationSchema::new("substituted")
                        .returns(TypeDescriptor::int())
                        .bind(StageKind::Execution, "remote")
                        .bind(StageKind::Fallback, "broken-fallback"),
                )
                .operation(
                    OperationSchema::new("shaped")
                        .returns(TypeDescriptor::int())
                        .bind(StageKind::Execution, "one")
                        .bind(StageKind::Response, "broken-response"),
                ),
        );
        let dispatcher = fx.build();

        let err = dispatcher.dispatch("Api", "substituted", vec![]).unwrap_err();
        assert!(matches!(err, DispatchError::Stage { stage: StageKind::Fallback, .. }));
        assert_eq!(err.into_source().to_string(), "no substitute");

        let err = dispatcher.dispatch("Api", "shaped", vec![]).unwrap_err();
        assert!(matches!(err, DispatchError::Stage { stage: StageKind::Response, .. }));
        assert_eq!(err.into_source().to_string(), "cannot shape");
    }

    #[test]
    fn null_fallback_into_primitive_return_is_rejected() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "remote",
            counting_exec(
                &attempts,
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::int()),
                None,
            ),
        );
        fx.registry.register_fallback(
            "nothing",
            fallback_fn(
                "nothing",
                StageTypes::new(TypeDescriptor::any(), TypeDescriptor::int()),
                |_| Ok(Value::Null),
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "remote")
                .bind(StageKind::Fallback, "nothing"),
        ));
        assert!(matches!(
            fx.build().dispatch("Api", "count", vec![]),
            Err(DispatchError::NullNotAllowed { stage: StageKind::Fallback, .. })
        ));
    }

    #[test]
    fn mismatched_request_and_error_links_fail_before_execution() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "takes-string",
            counting_exec(
                &attempts,
                StageTypes::new(TypeDescriptor::string(), TypeDescriptor::any()),
                Some(Value::Null),
            ),
        );
        fx.registry.register_request(
            "makes-bean",
            request_fn(
                "makes-bean",
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::named("Bean")),
                |_| Ok(Value::object("Bean")),
            ),
        );
        fx.registry.register_error(
            "wants-int",
            error_fn(
                "wants-int",
                StageTypes::new(TypeDescriptor::int(), TypeDescriptor::any()),
                |_| Ok(None),
            ),
        );
        fx.source.insert(
            DeclaredTypeSchema::interface("Api")
                .bind(StageKind::Execution, "takes-string")
                .operation(OperationSchema::new("shaped").bind(StageKind::Request, "makes-bean"))
                .operation(OperationSchema::new("guarded").bind(StageKind::Error, "wants-int")),
        );
        let dispatcher = fx.build();
        assert!(matches!(
            dispatcher.dispatch("Api", "shaped", vec![]),
            Err(DispatchError::TypeMismatch { link: StageLink::RequestToExecution, .. })
        ));
        assert!(matches!(
            dispatcher.dispatch("Api", "guarded", vec![]),
            Err(DispatchError::TypeMismatch { link: StageLink::ExecutionToError, .. })
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn request_null_into_non_void_input_fails_before_execution() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "uses-bean",
            counting_exec(
                &attempts,
                StageTypes::new(TypeDescriptor::named("Bean"), TypeDescriptor::any()),
                Some(Value::Null),
            ),
        );
        fx.registry.register_request(
            "nothing",
            request_fn(
                "nothing",
                StageTypes::new(TypeDescriptor::named("Bean"), TypeDescriptor::named("Bean")),
                |_| Ok(Value::Null),
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("run")
                .bind(StageKind::Execution, "uses-bean")
                .bind(StageKind::Request, "nothing"),
        ));
        let err = fx.build().dispatch("Api", "run", vec![]).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::NullNotAllowed { stage: StageKind::Request, .. }
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn request_context_reaches_execution_with_injected_members() {
        let fx = Fixture::new();
        fx.container.register_factory("Token", || Ok(Value::from("t-1")));
        fx.container
            .bind_member("Bean", "token", TypeDescriptor::named("Token"));
        let bean = TypeDescriptor::named("Bean");
        fx.registry.register_request(
            "shape",
            request_fn("shape", StageTypes::new(bean.clone(), bean.clone()), |_| {
                let mut replacement = Value::object("Bean");
                replacement.set_field("user", Value::from("ann"));
                Ok(replacement)
            }),
        );
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&seen);
        fx.registry.register_execution(
            "exec",
            execution_fn("exec", StageTypes::new(bean, TypeDescriptor::string()), move |ctx| {
                *sink.lock() = ctx.context().clone();
                Ok(Value::from("done"))
            }),
        );
        fx.source.insert(api(
            OperationSchema::new("run")
                .returns(TypeDescriptor::string())
                .bind(StageKind::Execution, "exec")
                .bind(StageKind::Request, "shape"),
        ));
        assert_eq!(returned(fx.build().dispatch("Api", "run", vec![])), Value::from("done"));
        let context = seen.lock().clone();
        assert_eq!(context.field("user"), Some(&Value::from("ann")));
        assert_eq!(context.field("token"), Some(&Value::from("t-1")));
    }

    #[test]
    fn incompatible_stage_types_fail_before_execution() {
        let fx = Fixture::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        fx.registry.register_execution(
            "strings",
            counting_exec(
                &attempts,
                StageTypes::new(TypeDescriptor::void(), TypeDescriptor::string()),
                Some(Value::from("x")),
            ),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "strings"),
        ));
        let dispatcher = fx.build();
        for _ in 0..2 {
            let err = dispatcher.dispatch("Api", "count", vec![]).unwrap_err();
            assert!(matches!(
                err,
                DispatchError::TypeMismatch { link: StageLink::ExecutionToReturn, .. }
            ));
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.metadata().stats().verdict_computations, 1);
    }

    #[test]
    fn generic_stages_are_value_checked() {
        let fx = Fixture::new();
        fx.registry.register_execution(
            "loose",
            execution_fn("loose", StageTypes::generic(), |_| Ok(Value::from("text"))),
        );
        fx.source.insert(api(
            OperationSchema::new("count")
                .returns(TypeDescriptor::int())
                .bind(StageKind::Execution, "loose"),
        ));
        let err = fx.build().dispatch("Api", "count", vec![]).unwrap_err();
        assert!(matches!(err, DispatchError::ValueMismatch { .. }));
    }

    #[test]
    fn null_into_primitive_return_is_rejected() {
        let fx = Fixture::new();
        fx.registry.register_execution(
            "nothing",
            execution_fn("nothing", StageTypes::generic(), |_| Ok(Value::Null)),
        );
        fx.source.insert(
            DeclaredTypeSchema::interface("Api")
                .bind(StageKind::Execution, "nothing")
                .operation(OperationSchema::new("count").returns(TypeDescriptor::int()))
                .operation(OperationSchema::new("name").returns(TypeDescriptor::string())),
        );
        let dispatcher = fx.build();
        assert!(matches!(
            dispatcher.dispatch("Api", "count", vec![]),
            Err(DispatchError::NullNotAllowed { stage: StageKind::Execution, .. })
        ));
        assert_eq!(returned(dispatcher.dispatch("Api", "name", vec![])), Value::Null);
    }

    #[test]
    fn delegate_returns_stand_in_for_declared_type() {
        let fx = Fixture::new();
        fx.registry.register_execution(
            "hello",
            execution_fn("hello", StageTypes::generic(), |_| Ok(Value::from("hi"))),
        );
        fx.source.insert(
            DeclaredTypeSchema::interface("Api").operation(
                OperationSchema::new("child")
                    .returns(TypeDescriptor::named("Child"))
                    .delegate(),
            ),
        );
        fx.source.insert(
            DeclaredTypeSchema::interface("Child").operation(
                OperationSchema::new("greet")
                    .returns(TypeDescriptor::string())
                    .bind(StageKind::Execution, "hello"),
            ),
        );
        let dispatcher = fx.build();
        let Ok(DispatchOutcome::Delegated(child)) = dispatcher.dispatch("Api", "child", vec![]) else {
            panic!("expected a delegated stand-in");
        };
        assert_eq!(child.declared_type(), "Child");
        assert_eq!(child.call("greet", vec![]).unwrap(), Value::from("hi"));
    }
}

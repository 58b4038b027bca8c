//! Invocation pipeline and its supporting services.
//!
//! 1. **Registry** (`registry`): named stage handlers and process defaults
//! 2. **Gate** (`gate`): stage-to-stage compatibility verdicts and value checks
//! 3. **Retry** (`retry`): bounded retries of the execution stage
//! 4. **Dispatcher** (`dispatcher`): the per-call pipeline
//! 5. **Config** (`config`): process-wide properties

pub mod config;
pub mod dispatcher;
pub mod gate;
pub mod operation;
pub mod registry;
pub mod retry;

// Re-export key types for convenient access.
pub use config::ProcessorConfig;
pub use dispatcher::Dispatcher;
pub use gate::StageLink;
pub use operation::{ConfigurationError, DispatchError, DispatchOutcome};
pub use registry::HandlerRegistry;
pub use retry::{Backoff, RetryExecutor, RetryPolicy};

//! API processor runtime: metadata cache, retry executor, invocation
//! dispatcher, stand-ins and the processor builder.

pub mod container;
pub mod metadata;
pub mod processor;
pub mod service;
pub mod source;
pub mod stand_in;
pub mod telemetry;
pub mod traits;

pub use container::DefaultContainer;
pub use metadata::{CacheStats, MetadataCache};
pub use processor::{ApiProcessor, ApiProcessorBuilder};
pub use service::{
    ConfigurationError, DispatchError, DispatchOutcome, Dispatcher, HandlerRegistry,
    ProcessorConfig, RetryExecutor, RetryPolicy, StageLink,
};
pub use source::InMemorySource;
pub use stand_in::{DeclaredApi, StandIn};
pub use traits::{DependencyContainer, DescriptorSource};

//! Composition root: wires configuration, handlers, the descriptor source
//! and the dependency container into a dispatcher, and validates every
//! registered API up front.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use apiproc_core::{
    CompatibilityChecker, ErrorHandler, ExecutionHandler, FallbackHandler, RequestHandler,
    ResponseHandler, StageKind, StructuralChecker, Value,
};
use tracing::info;

use crate::container::DefaultContainer;
use crate::metadata::{CacheStats, MetadataCache};
use crate::service::config::ProcessorConfig;
use crate::service::dispatcher::Dispatcher;
use crate::service::gate;
use crate::service::operation::{ConfigurationError, DispatchError};
use crate::service::registry::HandlerRegistry;
use crate::service::retry::RetryExecutor;
use crate::source::InMemorySource;
use crate::stand_in::{DeclaredApi, StandIn};
use crate::traits::{DependencyContainer, DescriptorSource};

/// A configured processor: hands out stand-ins for the registered APIs.
#[derive(Debug)]
pub struct ApiProcessor {
    dispatcher: Arc<Dispatcher>,
    apis: Vec<String>,
}

impl ApiProcessor {
    #[must_use]
    pub fn builder() -> ApiProcessorBuilder {
        ApiProcessorBuilder::default()
    }

    /// Stand-in for a declared API type.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the type cannot be resolved.
    pub fn stand_in(&self, declared_type: &str) -> Result<StandIn, ConfigurationError> {
        self.dispatcher.metadata().descriptor_for(declared_type)?;
        Ok(StandIn::new(declared_type, Arc::clone(&self.dispatcher)))
    }

    /// Typed adapter for a declared API type.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if `A::TYPE_NAME` cannot be resolved.
    pub fn get<A: DeclaredApi>(&self) -> Result<A, ConfigurationError> {
        self.stand_in(A::TYPE_NAME).map(A::from_stand_in)
    }

    #[must_use]
    pub fn apis(&self) -> &[String] {
        &self.apis
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.dispatcher.metadata().stats()
    }
}

/// Builder for [`ApiProcessor`].
pub struct ApiProcessorBuilder {
    config: Option<ProcessorConfig>,
    properties: HashMap<String, String>,
    source: Option<Arc<dyn DescriptorSource>>,
    container: Option<Arc<dyn DependencyContainer>>,
    checker: Arc<dyn CompatibilityChecker>,
    registry: HandlerRegistry,
    defaults: Vec<(StageKind, String)>,
    sleeper: Option<Arc<dyn Fn(Duration) + Send + Sync>>,
    apis: Vec<String>,
}

impl Default for ApiProcessorBuilder {
    fn default() -> Self {
        Self {
            config: None,
            properties: HashMap::new(),
            source: None,
            container: None,
            checker: Arc::new(StructuralChecker),
            registry: HandlerRegistry::new(),
            defaults: Vec::new(),
            sleeper: None,
            apis: Vec::new(),
        }
    }
}

impl ApiProcessorBuilder {
    /// Uses `config` as-is instead of reading properties.
    #[must_use]
    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Adds a property consulted before the environment.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl DescriptorSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn container(mut self, container: impl DependencyContainer + 'static) -> Self {
        self.container = Some(Arc::new(container));
        self
    }

    #[must_use]
    pub fn checker(mut self, checker: Arc<dyn CompatibilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    /// Replaces the retry sleep function.
    #[must_use]
    pub fn sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    #[must_use]
    pub fn request_handler(self, name: &str, handler: impl RequestHandler) -> Self {
        self.registry.register_request(name, handler);
        self
    }

    #[must_use]
    pub fn execution_handler(self, name: &str, handler: impl ExecutionHandler) -> Self {
        self.registry.register_execution(name, handler);
        self
    }

    #[must_use]
    pub fn error_handler(self, name: &str, handler: impl ErrorHandler) -> Self {
        self.registry.register_error(name, handler);
        self
    }

    #[must_use]
    pub fn fallback_handler(self, name: &str, handler: impl FallbackHandler) -> Self {
        self.registry.register_fallback(name, handler);
        self
    }

    #[must_use]
    pub fn response_handler(self, name: &str, handler: impl ResponseHandler) -> Self {
        self.registry.register_response(name, handler);
        self
    }

    /// Makes the handler registered under `name` the process default for `kind`.
    #[must_use]
    pub fn default_handler(mut self, kind: StageKind, name: impl Into<String>) -> Self {
        self.defaults.push((kind, name.into()));
        self
    }

    /// Registers a declared API type to be validated and served.
    #[must_use]
    pub fn api(mut self, declared_type: impl Into<String>) -> Self {
        self.apis.push(declared_type.into());
        self
    }

    /// Wires everything together and validates every registered API,
    /// including the APIs reachable through delegate operations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoApis`] without registered APIs, any
    /// other [`ConfigurationError`] raised while resolving, and
    /// [`DispatchError::TypeMismatch`] for incompatible stage types.
    pub fn build(self) -> Result<ApiProcessor, DispatchError> {
        if self.apis.is_empty() {
            return Err(ConfigurationError::NoApis.into());
        }
        let config = match self.config {
            Some(config) => config,
            None => ProcessorConfig::from_properties(&self.properties)?,
        };
        for (kind, name) in &self.defaults {
            self.registry.set_default(*kind, name)?;
        }

        let source: Arc<dyn DescriptorSource> = match self.source {
            Some(source) => source,
            None => Arc::new(InMemorySource::new()),
        };
        let container: Arc<dyn DependencyContainer> = match self.container {
            Some(container) => container,
            None => Arc::new(DefaultContainer::new()),
        };
        let mut retry = RetryExecutor::new(config.retry_policy());
        if let Some(sleeper) = self.sleeper {
            retry = retry.with_sleeper(move |d| sleeper(d));
        }
        let metadata = MetadataCache::new(
            &config,
            Arc::clone(&source),
            Arc::new(self.registry),
            self.checker,
        );
        let dispatcher = Arc::new(Dispatcher::new(metadata, container, retry));

        let validated = validate(&dispatcher, source.as_ref(), &self.apis)?;
        info!(
            apis = self.apis.len(),
            operations = validated,
            retry_count = config.retry_count,
            "api processor ready"
        );
        Ok(ApiProcessor {
            dispatcher,
            apis: self.apis,
        })
    }
}

/// Resolves every operation of every reachable API and runs its static
/// compatibility gate. Returns the number of operations checked.
fn validate(
    dispatcher: &Dispatcher,
    source: &dyn DescriptorSource,
    apis: &[String],
) -> Result<usize, DispatchError> {
    let metadata = dispatcher.metadata();
    let mut queue: VecDeque<String> = apis.iter().cloned().collect();
    let mut visited = HashSet::new();
    let mut operations = 0;

    while let Some(api) = queue.pop_front() {
        if !visited.insert(api.clone()) {
            continue;
        }
        let class = metadata.descriptor_for(&api)?;
        let mut names = HashSet::new();
        for ancestor in &class.lineage {
            let Some(schema) = source.declared_type(ancestor) else {
                continue;
            };
            for op in &schema.operations {
                if !names.insert(op.name.clone()) {
                    continue;
                }
                let descriptor = metadata.operation_for(&api, &op.name)?;
                operations += 1;
                if descriptor.delegate {
                    queue.push_back(descriptor.return_type.main_type().to_string());
                    continue;
                }
                let placeholders = vec![Value::Null; descriptor.parameters.len()];
                let ctx = metadata.context_for(&api, &op.name, placeholders)?;
                gate::evaluate(metadata, &ctx)?;
            }
        }
    }
    Ok(operations)
}

impl std::fmt::Debug for ApiProcessorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiProcessorBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("apis", &self.apis)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::sync::Arc;

use apiproc_core::{
    Bound, ErrorHandler, ExecutionHandler, FallbackHandler, HandlerBindings, HandlerSet,
    RequestHandler, ResponseHandler, Stage, StageKind,
};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::operation::ConfigurationError;

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Registry of named stage handlers.
///
/// Each stage kind has its own namespace. A handler's declared types are
/// captured once, at registration, and travel with every binding of it.
/// Process defaults name a registered handler per stage and fill any slot
/// left unbound by operation and class declarations.
pub struct HandlerRegistry {
    request: DashMap<Arc<str>, Bound<dyn RequestHandler>>,
    execution: DashMap<Arc<str>, Bound<dyn ExecutionHandler>>,
    error: DashMap<Arc<str>, Bound<dyn ErrorHandler>>,
    fallback: DashMap<Arc<str>, Bound<dyn FallbackHandler>>,
    response: DashMap<Arc<str>, Bound<dyn ResponseHandler>>,
    /// Process-default bindings (handler names per stage).
    defaults: RwLock<HandlerBindings>,
}

fn insert<H: ?Sized>(
    map: &DashMap<Arc<str>, Bound<H>>,
    kind: StageKind,
    name: &str,
    handler: Arc<H>,
    types: apiproc_core::StageTypes,
) {
    let name: Arc<str> = Arc::from(name);
    debug!(
        stage = %kind,
        handler = &*name,
        input = %types.input,
        output = %types.output,
        "registering handler"
    );
    let bound = Bound::new(Arc::clone(&name), handler, types);
    if map.insert(name, bound).is_some() {
        warn!(stage = %kind, "replaced previously registered handler");
    }
}

fn lookup<H: ?Sized>(
    map: &DashMap<Arc<str>, Bound<H>>,
    kind: StageKind,
    name: Option<&str>,
) -> Result<Option<Bound<H>>, ConfigurationError> {
    let Some(name) = name else {
        return Ok(None);
    };
    map.get(name)
        .map(|entry| Some(entry.value().clone()))
        .ok_or_else(|| ConfigurationError::UnknownHandler {
            kind,
            name: name.to_string(),
        })
}

impl HandlerRegistry {
    /// Creates an empty registry without defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request: DashMap::new(),
            execution: DashMap::new(),
            error: DashMap::new(),
            fallback: DashMap::new(),
            response: DashMap::new(),
            defaults: RwLock::new(HandlerBindings::default()),
        }
    }

    pub fn register_request<H: RequestHandler>(&self, name: &str, handler: H) {
        let types = handler.types();
        insert(&self.request, StageKind::Request, name, Arc::new(handler) as Arc<dyn RequestHandler>, types);
    }

    pub fn register_execution<H: ExecutionHandler>(&self, name: &str, handler: H) {
        let types = handler.types();
        insert(&self.execution, StageKind::Execution, name, Arc::new(handler) as Arc<dyn ExecutionHandler>, types);
    }

    pub fn register_error<H: ErrorHandler>(&self, name: &str, handler: H) {
        let types = handler.types();
        insert(&self.error, StageKind::Error, name, Arc::new(handler) as Arc<dyn ErrorHandler>, types);
    }

    pub fn register_fallback<H: FallbackHandler>(&self, name: &str, handler: H) {
        let types = handler.types();
        insert(&self.fallback, StageKind::Fallback, name, Arc::new(handler) as Arc<dyn FallbackHandler>, types);
    }

    pub fn register_response<H: ResponseHandler>(&self, name: &str, handler: H) {
        let types = handler.types();
        insert(&self.response, StageKind::Response, name, Arc::new(handler) as Arc<dyn ResponseHandler>, types);
    }

    /// Whether a handler is registered under `name` for `kind`.
    #[must_use]
    pub fn contains(&self, kind: StageKind, name: &str) -> bool {
        match kind {
            StageKind::Request => self.request.contains_key(name),
            StageKind::Execution => self.execution.contains_key(name),
            StageKind::Error => self.error.contains_key(name),
            StageKind::Fallback => self.fallback.contains_key(name),
            StageKind::Response => self.response.contains_key(name),
        }
    }

    /// Makes the handler registered under `name` the process default for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownHandler`] if nothing is registered
    /// under `name`.
    pub fn set_default(&self, kind: StageKind, name: &str) -> Result<(), ConfigurationError> {
        if !self.contains(kind, name) {
            return Err(ConfigurationError::UnknownHandler {
                kind,
                name: name.to_string(),
            });
        }
        self.defaults.write().set(kind, name);
        Ok(())
    }

    /// Resolves handler names to bound handlers. Unbound slots stay empty.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownHandler`] for a name that is not
    /// registered for its stage.
    pub fn resolve(&self, bindings: &HandlerBindings) -> Result<HandlerSet, ConfigurationError> {
        Ok(HandlerSet {
            request: lookup(&self.request, StageKind::Request, bindings.get(StageKind::Request))?,
            execution: lookup(
                &self.execution,
                StageKind::Execution,
                bindings.get(StageKind::Execution),
            )?,
            error: lookup(&self.error, StageKind::Error, bindings.get(StageKind::Error))?,
            fallback: lookup(
                &self.fallback,
                StageKind::Fallback,
                bindings.get(StageKind::Fallback),
            )?,
            response: lookup(
                &self.response,
                StageKind::Response,
                bindings.get(StageKind::Response),
            )?,
        })
    }

    /// The process-default handler set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownHandler`] if a default names a
    /// handler that is no longer registered.
    pub fn defaults(&self) -> Result<HandlerSet, ConfigurationError> {
        let bindings = self.defaults.read().clone();
        self.resolve(&bindings)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("request", &self.request.len())
            .field("execution", &self.execution.len())
            .field("error", &self.error.len())
            .field("fallback", &self.fallback.len())
            .field("response", &self.response.len())
            .field("defaults", &*self.defaults.read())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

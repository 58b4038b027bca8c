//! Metadata cache: resolves declared types and operations into compiled
//! descriptors and memoizes them, together with stage compatibility verdicts.

pub mod cache;

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;

use apiproc_core::{
    ClassDescriptor, CompatibilityChecker, DeclaredTypeSchema, HandlerSet, InvocationContext,
    OperationDescriptor, ParameterDescriptor, TypeDescriptor, TypeKind, TypeMismatchError, Value,
    Verdict,
};
use tracing::debug;

use self::cache::MemoCache;
use crate::service::config::ProcessorConfig;
use crate::service::gate::StageLink;
use crate::service::operation::{ConfigurationError, DispatchError};
use crate::service::registry::HandlerRegistry;
use crate::traits::DescriptorSource;

/// Signature, link, producer and consumer. The descriptors are part of the
/// key so a handler re-registered with other stage types gets a new verdict.
type VerdictKey = (String, StageLink, TypeDescriptor, TypeDescriptor);

/// Computation counts per cache kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub class_computations: usize,
    pub operation_computations: usize,
    pub verdict_computations: usize,
}

pub struct MetadataCache {
    source: Arc<dyn DescriptorSource>,
    registry: Arc<HandlerRegistry>,
    checker: Arc<dyn CompatibilityChecker>,
    classes: MemoCache<String, Arc<ClassDescriptor>>,
    operations: MemoCache<(String, String), Arc<OperationDescriptor>>,
    verdicts: MemoCache<VerdictKey, Result<Verdict, TypeMismatchError>>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(
        config: &ProcessorConfig,
        source: Arc<dyn DescriptorSource>,
        registry: Arc<HandlerRegistry>,
        checker: Arc<dyn CompatibilityChecker>,
    ) -> Self {
        let expire = config.cache_expire();
        Self {
            source,
            registry,
            checker,
            classes: MemoCache::new(config.cache_capacity, expire),
            operations: MemoCache::new(config.cache_capacity, expire),
            verdicts: MemoCache::new(config.cache_capacity, expire),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            class_computations: self.classes.computations(),
            operation_computations: self.operations.computations(),
            verdict_computations: self.verdicts.computations(),
        }
    }

    /// Drops every cached descriptor and verdict.
    pub fn clear(&self) {
        self.classes.clear();
        self.operations.clear();
        self.verdicts.clear();
    }

    fn schema(&self, name: &str) -> Result<Arc<DeclaredTypeSchema>, ConfigurationError> {
        let schema = self
            .source
            .declared_type(name)
            .ok_or_else(|| ConfigurationError::UnknownType {
                name: name.to_string(),
            })?;
        if schema.kind == TypeKind::Concrete {
            return Err(ConfigurationError::NotDeclarable {
                name: name.to_string(),
            });
        }
        Ok(schema)
    }

    /// The type followed by its ancestors, depth-first, closest first.
    fn lineage(&self, name: &str) -> Result<Vec<Arc<DeclaredTypeSchema>>, ConfigurationError> {
        let mut lineage = Vec::new();
        let mut seen = HashSet::new();
        let mut path = Vec::new();
        self.walk(name, &mut path, &mut seen, &mut lineage)?;
        Ok(lineage)
    }

    fn walk(
        &self,
        name: &str,
        path: &mut Vec<String>,
        seen: &mut HashSet<String>,
        lineage: &mut Vec<Arc<DeclaredTypeSchema>>,
    ) -> Result<(), ConfigurationError> {
        if path.iter().any(|p| p == name) {
            let mut cycle = path.clone();
            cycle.push(name.to_string());
            return Err(ConfigurationError::CyclicInheritance { cycle });
        }
        if !seen.insert(name.to_string()) {
            return Ok(());
        }
        let schema = self.schema(name)?;
        path.push(name.to_string());
        lineage.push(Arc::clone(&schema));
        for parent in &schema.extends {
            self.walk(parent, path, seen, lineage)?;
        }
        path.pop();
        Ok(())
    }

    /// Compiled descriptor of a declared type.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the type or an ancestor is unknown
    /// or concrete, the inheritance graph has a cycle, or a bound handler
    /// name is not registered.
    pub fn descriptor_for(&self, declared_type: &str) -> Result<Arc<ClassDescriptor>, ConfigurationError> {
        self.classes
            .get_or_try_insert(&declared_type.to_string(), || {
                let lineage = self.lineage(declared_type)?;
                let mut handlers = HandlerSet::default();
                for schema in &lineage {
                    handlers = handlers.overlay(&self.registry.resolve(&schema.handlers)?);
                }
                debug!(declared_type, depth = lineage.len(), "compiled class descriptor");
                Ok(Arc::new(ClassDescriptor {
                    name: declared_type.to_string(),
                    lineage: lineage.iter().map(|s| s.name.clone()).collect(),
                    handlers,
                    attributes: lineage.iter().map(|s| s.attributes.clone()).collect(),
                }))
            })
    }

    /// Compiled descriptor of an operation, looked up along the lineage of
    /// `declared_type`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the type cannot be resolved, the
    /// operation is not declared, a handler name is unknown, a delegate
    /// operation is contradictory, or no execution handler is reachable.
    pub fn operation_for(
        &self,
        declared_type: &str,
        operation: &str,
    ) -> Result<Arc<OperationDescriptor>, ConfigurationError> {
        let key = (declared_type.to_string(), operation.to_string());
        self.operations.get_or_try_insert(&key, || {
            let class = self.descriptor_for(declared_type)?;
            let (owner, schema) = class
                .lineage
                .iter()
                .filter_map(|name| self.source.declared_type(name))
                .find_map(|owner| {
                    let op = owner.find_operation(operation).cloned()?;
                    Some((owner.name.clone(), op))
                })
                .ok_or_else(|| ConfigurationError::UnknownOperation {
                    declared_type: declared_type.to_string(),
                    operation: operation.to_string(),
                })?;

            let parameters: Vec<ParameterDescriptor> = schema
                .parameters
                .iter()
                .map(|p| ParameterDescriptor {
                    name: p.name.clone(),
                    ty: p.ty.clone(),
                    attributes: p.attributes.clone(),
                })
                .collect();
            let signature = OperationDescriptor::signature_of(
                declared_type,
                operation,
                &parameters,
                &schema.returns,
            );
            let handlers = self.registry.resolve(&schema.handlers)?;

            if schema.delegate {
                self.validate_delegate(&signature, &schema.returns, &handlers)?;
            } else if handlers
                .overlay(&class.handlers)
                .overlay(&self.registry.defaults()?)
                .execution
                .is_none()
            {
                return Err(ConfigurationError::MissingExecutionHandler { signature });
            }

            debug!(%signature, owner = %owner, delegate = schema.delegate, "compiled operation descriptor");
            Ok(Arc::new(OperationDescriptor {
                owner,
                name: operation.to_string(),
                signature,
                parameters,
                return_type: schema.returns,
                handlers,
                delegate: schema.delegate,
                attributes: schema.attributes,
            }))
        })
    }

    fn validate_delegate(
        &self,
        signature: &str,
        returns: &TypeDescriptor,
        handlers: &HandlerSet,
    ) -> Result<(), ConfigurationError> {
        let contradictory = |reason: String| ConfigurationError::Contradictory {
            signature: signature.to_string(),
            reason,
        };
        if !handlers.is_empty() {
            return Err(contradictory(
                "a delegate operation cannot bind stage handlers".to_string(),
            ));
        }
        match self.source.declared_type(returns.main_type()) {
            Some(schema) if schema.kind == TypeKind::Interface => Ok(()),
            _ => Err(contradictory(format!(
                "delegate return type '{returns}' is not a declared API type"
            ))),
        }
    }

    /// Builds the per-call context: descriptors, arguments and handlers
    /// resolved operation > class > process default.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Configuration`] on resolution failure and
    /// [`DispatchError::InvalidArguments`] when the argument count differs
    /// from the declared parameters.
    pub fn context_for(
        &self,
        declared_type: &str,
        operation: &str,
        arguments: Vec<Value>,
    ) -> Result<InvocationContext, DispatchError> {
        let class = self.descriptor_for(declared_type)?;
        let op = self.operation_for(declared_type, operation)?;
        if arguments.len() != op.parameters.len() {
            return Err(DispatchError::InvalidArguments {
                signature: op.signature.clone(),
                expected: op.parameters.len(),
                actual: arguments.len(),
            });
        }
        let handlers = op
            .handlers
            .overlay(&class.handlers)
            .overlay(&self.registry.defaults()?)
            .into_resolved()
            .ok_or_else(|| ConfigurationError::MissingExecutionHandler {
                signature: op.signature.clone(),
            })?;
        Ok(InvocationContext::new(class, op, arguments, handlers))
    }

    /// Compatibility verdict for one stage link of an operation, computed
    /// once and memoized (mismatches included).
    ///
    /// # Errors
    ///
    /// Returns the (cached) [`TypeMismatchError`] for incompatible types.
    pub fn compatibility_for(
        &self,
        signature: &str,
        link: StageLink,
        producer: &TypeDescriptor,
        consumer: &TypeDescriptor,
    ) -> Result<Verdict, TypeMismatchError> {
        let key = (signature.to_string(), link, producer.clone(), consumer.clone());
        self.verdicts
            .get_or_try_insert(&key, || {
                let verdict = self.checker.compare(producer, consumer);
                debug!(signature, %link, ?verdict, "computed compatibility verdict");
                Ok::<_, Infallible>(verdict)
            })
            .unwrap_or_else(|never| match never {})
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use std::sync::Arc;

use apiproc_core::{DeclaredTypeSchema, TypeDescriptor, Value};

/// Supplies declared-type schemas by name.
///
/// Implementations: [`crate::source::InMemorySource`] (JSON or programmatic
/// registration); others may read annotations, files or a registry service.
pub trait DescriptorSource: Send + Sync {
    /// The schema declared under `name`, if any.
    fn declared_type(&self, name: &str) -> Option<Arc<DeclaredTypeSchema>>;
}

/// Provides instances of named types and injects their members.
///
/// The request stage receives a fresh instance of its declared input type
/// from the container; a replacement context it returns is injected again.
pub trait DependencyContainer: Send + Sync {
    /// A fresh instance of `ty`.
    ///
    /// # Errors
    ///
    /// Returns an error if no instance of `ty` can be produced.
    fn instance_of(&self, ty: &TypeDescriptor) -> anyhow::Result<Value>;

    /// Populates the injectable members of `value` in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a member binding fails to produce its value.
    fn inject_members(&self, value: &mut Value) -> anyhow::Result<()>;
}

//! Per-call invocation state handed to every stage.

use std::fmt;
use std::sync::Arc;

use crate::descriptor::TypeDescriptor;
use crate::model::{ClassDescriptor, OperationDescriptor, ResolvedHandlers};
use crate::types::Value;

/// Per-call state threaded through the invocation pipeline.
///
/// Created fresh for every call and owned exclusively by it. The class and
/// operation descriptors are shared, immutable cache entries.
#[derive(Debug)]
pub struct InvocationContext {
    class: Arc<ClassDescriptor>,
    operation: Arc<OperationDescriptor>,
    arguments: Vec<Value>,
    handlers: ResolvedHandlers,
    /// Execution context produced by the request stage. `Null` until set.
    context: Value,
}

impl InvocationContext {
    #[must_use]
    pub fn new(
        class: Arc<ClassDescriptor>,
        operation: Arc<OperationDescriptor>,
        arguments: Vec<Value>,
        handlers: ResolvedHandlers,
    ) -> Self {
        Self {
            class,
            operation,
            arguments,
            handlers,
            context: Value::Null,
        }
    }

    #[must_use]
    pub fn class(&self) -> &ClassDescriptor {
        &self.class
    }

    #[must_use]
    pub fn operation(&self) -> &OperationDescriptor {
        &self.operation
    }

    #[must_use]
    pub fn handlers(&self) -> &ResolvedHandlers {
        &self.handlers
    }

    #[must_use]
    pub fn signature(&self) -> &str {
        &self.operation.signature
    }

    #[must_use]
    pub fn return_type(&self) -> &TypeDescriptor {
        &self.operation.return_type
    }

    #[must_use]
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    #[must_use]
    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// Argument bound to the named parameter.
    #[must_use]
    pub fn argument_named(&self, name: &str) -> Option<&Value> {
        let index = self
            .operation
            .parameters
            .iter()
            .position(|p| p.name == name)?;
        self.arguments.get(index)
    }

    /// Attribute declared on the parameter at `index`.
    #[must_use]
    pub fn parameter_attribute(&self, index: usize, key: &str) -> Option<&Value> {
        self.operation.parameters.get(index)?.attributes.get(key)
    }

    /// Attribute declared on the named parameter.
    #[must_use]
    pub fn parameter_attribute_named(&self, name: &str, key: &str) -> Option<&Value> {
        self.operation
            .parameters
            .iter()
            .find(|p| p.name == name)?
            .attributes
            .get(key)
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.operation.parameters.len()
    }

    #[must_use]
    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn set_context(&mut self, context: Value) {
        self.context = context;
    }

    // -- attribute lookups --

    /// Class attribute from the closest declaring type.
    #[must_use]
    pub fn first_class_attribute(&self, key: &str) -> Option<&Value> {
        self.class.first_attribute(key)
    }

    /// Class attribute from the farthest declaring ancestor.
    #[must_use]
    pub fn last_class_attribute(&self, key: &str) -> Option<&Value> {
        self.class.last_attribute(key)
    }

    #[must_use]
    pub fn class_attributes(&self, key: &str) -> Vec<&Value> {
        self.class.attributes_named(key)
    }

    #[must_use]
    pub fn operation_attribute(&self, key: &str) -> Option<&Value> {
        self.operation.attributes.get(key)
    }

    /// The operation's declaration of `key` (if any) followed by every class
    /// declaration along the lineage.
    #[must_use]
    pub fn combined_attributes(&self, key: &str) -> Vec<&Value> {
        self.operation_attribute(key)
            .into_iter()
            .chain(self.class.attributes_named(key))
            .collect()
    }
}

impl fmt::Display for InvocationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.class.name, self.operation.name)
    }
}

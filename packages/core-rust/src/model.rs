//! Compiled descriptors: the resolved, immutable form of declared types and
//! operations, produced by the metadata cache and shared across calls.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::TypeDescriptor;
use crate::traits::{
    ErrorHandler, ExecutionHandler, FallbackHandler, RequestHandler, ResponseHandler, StageTypes,
};
use crate::types::Value;

/// Named attribute values attached to a declared type or operation.
pub type Attributes = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Bound handlers
// ---------------------------------------------------------------------------

/// A registered handler together with its registration name and the stage
/// types captured when it was registered.
pub struct Bound<H: ?Sized> {
    pub name: Arc<str>,
    pub handler: Arc<H>,
    pub types: StageTypes,
}

impl<H: ?Sized> Bound<H> {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, handler: Arc<H>, types: StageTypes) -> Self {
        Self {
            name: name.into(),
            handler,
            types,
        }
    }
}

impl<H: ?Sized> Clone for Bound<H> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            handler: Arc::clone(&self.handler),
            types: self.types.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for Bound<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bound")
            .field("name", &self.name)
            .field("input", &self.types.input.to_string())
            .field("output", &self.types.output.to_string())
            .finish_non_exhaustive()
    }
}

/// Registration names are unique per stage kind; handlers are compared by
/// name and captured types, never by identity.
impl<H: ?Sized> PartialEq for Bound<H> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.types == other.types
    }
}

/// Per-stage handler bindings at one level (operation, class or process default).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerSet {
    pub request: Option<Bound<dyn RequestHandler>>,
    pub execution: Option<Bound<dyn ExecutionHandler>>,
    pub error: Option<Bound<dyn ErrorHandler>>,
    pub fallback: Option<Bound<dyn FallbackHandler>>,
    pub response: Option<Bound<dyn ResponseHandler>>,
}

impl HandlerSet {
    /// Fills every empty slot of `self` from `lower`. `self` wins per slot.
    #[must_use]
    pub fn overlay(&self, lower: &HandlerSet) -> HandlerSet {
        HandlerSet {
            request: self.request.clone().or_else(|| lower.request.clone()),
            execution: self.execution.clone().or_else(|| lower.execution.clone()),
            error: self.error.clone().or_else(|| lower.error.clone()),
            fallback: self.fallback.clone().or_else(|| lower.fallback.clone()),
            response: self.response.clone().or_else(|| lower.response.clone()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.request.is_none()
            && self.execution.is_none()
            && self.error.is_none()
            && self.fallback.is_none()
            && self.response.is_none()
    }

    /// Converts into the per-call form. `None` when no execution stage is bound.
    #[must_use]
    pub fn into_resolved(self) -> Option<ResolvedHandlers> {
        Some(ResolvedHandlers {
            execution: self.execution?,
            request: self.request,
            error: self.error,
            fallback: self.fallback,
            response: self.response,
        })
    }
}

/// Fully resolved handlers for one call. The execution stage is mandatory.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHandlers {
    pub request: Option<Bound<dyn RequestHandler>>,
    pub execution: Bound<dyn ExecutionHandler>,
    pub error: Option<Bound<dyn ErrorHandler>>,
    pub fallback: Option<Bound<dyn FallbackHandler>>,
    pub response: Option<Bound<dyn ResponseHandler>>,
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Resolved configuration of a declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDescriptor {
    pub name: String,
    /// The type itself followed by its ancestors, depth-first, closest first.
    pub lineage: Vec<String>,
    /// Class-level bindings, closest declaration wins per stage.
    pub handlers: HandlerSet,
    /// Attributes of each lineage entry, in lineage order.
    pub attributes: Vec<Attributes>,
}

impl ClassDescriptor {
    /// Attribute from the closest declaring type.
    #[must_use]
    pub fn first_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.iter().find_map(|a| a.get(key))
    }

    /// Attribute from the farthest declaring ancestor.
    #[must_use]
    pub fn last_attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.iter().rev().find_map(|a| a.get(key))
    }

    /// Every declaration of `key` along the lineage, closest first.
    #[must_use]
    pub fn attributes_named(&self, key: &str) -> Vec<&Value> {
        self.attributes.iter().filter_map(|a| a.get(key)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    pub ty: TypeDescriptor,
    pub attributes: Attributes,
}

impl ParameterDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            attributes: Attributes::new(),
        }
    }
}

/// Resolved configuration of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Declared type that declares the operation (may be an ancestor of the
    /// type it was looked up on).
    pub owner: String,
    pub name: String,
    /// Stable key, `Owner@name(t1, t2) -> ret`.
    pub signature: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub return_type: TypeDescriptor,
    /// Operation-level bindings; these win over class bindings.
    pub handlers: HandlerSet,
    /// Returns a new stand-in for `return_type` instead of running the pipeline.
    pub delegate: bool,
    pub attributes: Attributes,
}

impl OperationDescriptor {
    /// Builds the signature key for an operation.
    #[must_use]
    pub fn signature_of(
        owner: &str,
        name: &str,
        parameters: &[ParameterDescriptor],
        return_type: &TypeDescriptor,
    ) -> String {
        let params: Vec<String> = parameters.iter().map(|p| p.ty.to_string()).collect();
        format!("{owner}@{name}({}) -> {return_type}", params.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{execution_fn, request_fn};

    fn exec(name: &str) -> Bound<dyn ExecutionHandler> {
        let handler: Arc<dyn ExecutionHandler> =
            Arc::new(execution_fn("exec", StageTypes::generic(), |_| Ok(Value::Null)));
        Bound::new(name, handler, StageTypes::generic())
    }

    fn req(name: &str) -> Bound<dyn RequestHandler> {
        let handler: Arc<dyn RequestHandler> =
            Arc::new(request_fn("req", StageTypes::generic(), Ok));
        Bound::new(name, handler, StageTypes::generic())
    }

    #[test]
    fn overlay_prefers_upper_level_per_slot() {
        let upper = HandlerSet {
            execution: Some(exec("op")),
            ..HandlerSet::default()
        };
        let lower = HandlerSet {
            execution: Some(exec("class")),
            request: Some(req("class")),
            ..HandlerSet::default()
        };
        let merged = upper.overlay(&lower);
        assert_eq!(merged.execution.as_ref().map(|b| &*b.name), Some("op"));
        assert_eq!(merged.request.as_ref().map(|b| &*b.name), Some("class"));
        assert!(merged.error.is_none());
    }

    #[test]
    fn resolution_requires_execution() {
        let no_exec = HandlerSet {
            request: Some(req("r")),
            ..HandlerSet::default()
        };
        assert!(no_exec.into_resolved().is_none());

        let with_exec = HandlerSet {
            execution: Some(exec("e")),
            ..HandlerSet::default()
        };
        let resolved = with_exec.into_resolved().unwrap();
        assert_eq!(&*resolved.execution.name, "e");
        assert!(resolved.request.is_none());
    }

    #[test]
    fn class_attribute_lookups_follow_lineage() {
        let mut own = Attributes::new();
        own.insert("scope".into(), Value::from("own"));
        let mut base = Attributes::new();
        base.insert("scope".into(), Value::from("base"));
        base.insert("version".into(), Value::Int(2));

        let class = ClassDescriptor {
            name: "Api".into(),
            lineage: vec!["Api".into(), "Base".into()],
            handlers: HandlerSet::default(),
            attributes: vec![own, base],
        };
        assert_eq!(class.first_attribute("scope"), Some(&Value::from("own")));
        assert_eq!(class.last_attribute("scope"), Some(&Value::from("base")));
        assert_eq!(class.first_attribute("version"), Some(&Value::Int(2)));
        assert_eq!(class.attributes_named("scope").len(), 2);
        assert!(class.first_attribute("missing").is_none());
    }

    #[test]
    fn signature_key_format() {
        let params = vec![
            ParameterDescriptor::new("id", TypeDescriptor::int()),
            ParameterDescriptor::new("tags", TypeDescriptor::list(TypeDescriptor::string())),
        ];
        assert_eq!(
            OperationDescriptor::signature_of("Repo", "find", &params, &TypeDescriptor::string()),
            "Repo@find(int, list<string>) -> string"
        );
    }
}

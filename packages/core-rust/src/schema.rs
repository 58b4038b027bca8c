//! Declarative configuration surface: how declared types, their operations
//! and their stage bindings are described (typically loaded from JSON).

use serde::{Deserialize, Serialize};

use crate::descriptor::TypeDescriptor;
use crate::model::Attributes;
use crate::traits::StageKind;

/// Handler names bound to each stage at one declaration level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerBindings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_handler: Option<String>,
}

impl HandlerBindings {
    #[must_use]
    pub fn get(&self, kind: StageKind) -> Option<&str> {
        let slot = match kind {
            StageKind::Request => &self.request_handler,
            StageKind::Execution => &self.execution_handler,
            StageKind::Error => &self.error_handler,
            StageKind::Fallback => &self.fallback_handler,
            StageKind::Response => &self.response_handler,
        };
        slot.as_deref()
    }

    pub fn set(&mut self, kind: StageKind, name: impl Into<String>) {
        let slot = match kind {
            StageKind::Request => &mut self.request_handler,
            StageKind::Execution => &mut self.execution_handler,
            StageKind::Error => &mut self.error_handler,
            StageKind::Fallback => &mut self.fallback_handler,
            StageKind::Response => &mut self.response_handler,
        };
        *slot = Some(name.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        StageKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    /// Per-parameter metadata, e.g. how an execution handler maps the argument.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl ParameterSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<crate::types::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSchema {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSchema>,
    #[serde(default = "TypeDescriptor::void")]
    pub returns: TypeDescriptor,
    #[serde(flatten)]
    pub handlers: HandlerBindings,
    #[serde(default)]
    pub delegate: bool,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl OperationSchema {
    /// A `void` operation without parameters or bindings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            returns: TypeDescriptor::void(),
            handlers: HandlerBindings::default(),
            delegate: false,
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn param(self, name: impl Into<String>, ty: TypeDescriptor) -> Self {
        self.parameter(ParameterSchema::new(name, ty))
    }

    /// Appends a fully specified parameter.
    #[must_use]
    pub fn parameter(mut self, parameter: ParameterSchema) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn returns(mut self, ty: TypeDescriptor) -> Self {
        self.returns = ty;
        self
    }

    #[must_use]
    pub fn bind(mut self, kind: StageKind, handler: impl Into<String>) -> Self {
        self.handlers.set(kind, handler);
        self
    }

    #[must_use]
    pub fn delegate(mut self) -> Self {
        self.delegate = true;
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<crate::types::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Whether a declared type may own operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    /// A declarable API type.
    #[default]
    Interface,
    /// A concrete (non-declarable) type; may only be used as a value type.
    Concrete,
}

/// Declaration of one type: its ancestors, class-level bindings, operations
/// and attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredTypeSchema {
    pub name: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extends: Vec<String>,
    #[serde(flatten)]
    pub handlers: HandlerBindings,
    #[serde(default)]
    pub operations: Vec<OperationSchema>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl DeclaredTypeSchema {
    #[must_use]
    pub fn interface(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TypeKind::Interface,
            extends: Vec::new(),
            handlers: HandlerBindings::default(),
            operations: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    #[must_use]
    pub fn concrete(name: impl Into<String>) -> Self {
        Self {
            kind: TypeKind::Concrete,
            ..Self::interface(name)
        }
    }

    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.extends.push(parent.into());
        self
    }

    #[must_use]
    pub fn bind(mut self, kind: StageKind, handler: impl Into<String>) -> Self {
        self.handlers.set(kind, handler);
        self
    }

    #[must_use]
    pub fn operation(mut self, operation: OperationSchema) -> Self {
        self.operations.push(operation);
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<crate::types::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn find_operation(&self, name: &str) -> Option<&OperationSchema> {
        self.operations.iter().find(|op| op.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn declared_type_from_json() {
        let json = r#"{
            "name": "GitHubApi",
            "extends": ["BaseApi"],
            "executionHandler": "http",
            "attributes": {"baseUrl": "https://example.invalid"},
            "operations": [
                {
                    "name": "repos",
                    "parameters": [
                        {"name": "user", "type": "string", "attributes": {"in": "path"}}
                    ],
                    "returns": "list<Repo>",
                    "fallbackHandler": "empty"
                },
                {"name": "admin", "returns": "AdminApi", "delegate": true}
            ]
        }"#;
        let schema: DeclaredTypeSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.kind, TypeKind::Interface);
        assert_eq!(schema.extends, vec!["BaseApi".to_string()]);
        assert_eq!(schema.handlers.get(StageKind::Execution), Some("http"));
        assert_eq!(
            schema.attributes.get("baseUrl"),
            Some(&Value::from("https://example.invalid"))
        );

        let repos = schema.find_operation("repos").unwrap();
        assert_eq!(repos.returns.to_string(), "list<Repo>");
        assert_eq!(repos.parameters[0].ty, TypeDescriptor::string());
        assert_eq!(repos.parameters[0].attributes.get("in"), Some(&Value::from("path")));
        assert_eq!(repos.handlers.get(StageKind::Fallback), Some("empty"));
        assert!(!repos.delegate);

        let admin = schema.find_operation("admin").unwrap();
        assert!(admin.delegate);
        assert!(admin.handlers.is_empty());
    }

    #[test]
    fn operation_defaults_to_void() {
        let op: OperationSchema = serde_json::from_str(r#"{"name": "ping"}"#).unwrap();
        assert!(op.returns.is_void());
        assert!(op.parameters.is_empty());
        assert_eq!(op, OperationSchema::new("ping"));
    }

    #[test]
    fn concrete_kind_parses() {
        let schema: DeclaredTypeSchema =
            serde_json::from_str(r#"{"name": "Repo", "kind": "concrete"}"#).unwrap();
        assert_eq!(schema, DeclaredTypeSchema::concrete("Repo"));
    }

    #[test]
    fn malformed_type_is_rejected() {
        let result: Result<OperationSchema, _> =
            serde_json::from_str(r#"{"name": "x", "returns": "list<"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn builder_serializes_binding_keys() {
        let schema = DeclaredTypeSchema::interface("Api").bind(StageKind::Response, "wrap");
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["responseHandler"], "wrap");
        assert!(json.get("requestHandler").is_none());
    }
}

//! Type descriptors: tree representations of (possibly generic) type signatures.
//!
//! A [`TypeDescriptor`] is a main type identifier plus an ordered list of
//! subtype descriptors, e.g. `map<string, list<int>>`. Descriptors are built
//! once, when a stage handler is registered or a declared type is compiled,
//! and never mutated afterwards.
//!
//! Two kinds of identifiers act as "unknown" placeholders during
//! compatibility checks: the universal top type [`names::ANY`] and unresolved
//! generic parameters, written with a leading `?` (e.g. `?T`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Well-known type identifiers.
pub mod names {
    /// Universal top type. Treated as unknown by the compatibility checker.
    pub const ANY: &str = "any";
    /// The "no value" type. A stage whose input is `void` receives `Null`.
    pub const VOID: &str = "void";
    /// Type of the null value; only produced by [`super::TypeDescriptor::of_value`].
    pub const NULL: &str = "null";
    pub const BOOL: &str = "bool";
    pub const INT: &str = "int";
    pub const FLOAT: &str = "float";
    pub const STRING: &str = "string";
    pub const BYTES: &str = "bytes";
    pub const LIST: &str = "list";
    pub const MAP: &str = "map";
    /// Nullable wrapper: `option<int>` accepts `Null` where `int` does not.
    pub const OPTION: &str = "option";
    /// Prefix marking an unresolved generic parameter.
    pub const PARAM_PREFIX: char = '?';

    /// Non-nullable kinds.
    pub const PRIMITIVES: [&str; 3] = [BOOL, INT, FLOAT];
}

static IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\??[A-Za-z_][A-Za-z0-9_.:$]*$").expect("identifier pattern is valid")
});

/// Tree-shaped type signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeDescriptor {
    main_type: String,
    sub_types: Vec<TypeDescriptor>,
}

impl TypeDescriptor {
    /// A descriptor without subtypes.
    #[must_use]
    pub fn named(main_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_types: Vec::new(),
        }
    }

    /// A generic descriptor with the given subtypes, in order.
    #[must_use]
    pub fn generic(main_type: impl Into<String>, sub_types: Vec<TypeDescriptor>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_types,
        }
    }

    #[must_use]
    pub fn any() -> Self {
        Self::named(names::ANY)
    }

    #[must_use]
    pub fn void() -> Self {
        Self::named(names::VOID)
    }

    /// An unresolved generic parameter, e.g. `param("T")` is `?T`.
    #[must_use]
    pub fn param(name: &str) -> Self {
        Self::named(format!("{}{name}", names::PARAM_PREFIX))
    }

    #[must_use]
    pub fn bool() -> Self {
        Self::named(names::BOOL)
    }

    #[must_use]
    pub fn int() -> Self {
        Self::named(names::INT)
    }

    #[must_use]
    pub fn float() -> Self {
        Self::named(names::FLOAT)
    }

    #[must_use]
    pub fn string() -> Self {
        Self::named(names::STRING)
    }

    #[must_use]
    pub fn list(element: TypeDescriptor) -> Self {
        Self::generic(names::LIST, vec![element])
    }

    #[must_use]
    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::generic(names::MAP, vec![key, value])
    }

    #[must_use]
    pub fn option(inner: TypeDescriptor) -> Self {
        Self::generic(names::OPTION, vec![inner])
    }

    #[must_use]
    pub fn main_type(&self) -> &str {
        &self.main_type
    }

    #[must_use]
    pub fn sub_types(&self) -> &[TypeDescriptor] {
        &self.sub_types
    }

    #[must_use]
    pub fn sub_type(&self, index: usize) -> Option<&TypeDescriptor> {
        self.sub_types.get(index)
    }

    /// Returns the node reached by following `path` (subtype indices) from this node.
    #[must_use]
    pub fn at_path(&self, path: &[usize]) -> Option<&TypeDescriptor> {
        path.iter()
            .try_fold(self, |node, &index| node.sub_types.get(index))
    }

    /// Whether the main type is an unknown placeholder (`any` or `?T`).
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.main_type == names::ANY || self.main_type.starts_with(names::PARAM_PREFIX)
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        self.main_type == names::VOID
    }

    /// Whether this is a non-nullable primitive kind.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        names::PRIMITIVES.contains(&self.main_type.as_str())
    }

    /// Whether a `Null` value is acceptable where this type is declared.
    #[must_use]
    pub fn accepts_null(&self) -> bool {
        !self.is_primitive()
    }

    /// Number of nodes in the tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.sub_types.iter().map(Self::node_count).sum::<usize>()
    }

    /// Derives a descriptor from a runtime value.
    ///
    /// Containers report a concrete element type only when every non-null
    /// element agrees; empty, all-null or heterogeneous containers report `any`.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::named(names::NULL),
            Value::Bool(_) => Self::bool(),
            Value::Int(_) => Self::int(),
            Value::Float(_) => Self::float(),
            Value::String(_) => Self::string(),
            Value::Bytes(_) => Self::named(names::BYTES),
            Value::Array(items) => Self::list(Self::common(items.iter())),
            Value::Map(entries) => Self::map(Self::string(), Self::common(entries.values())),
            Value::Object { type_name, .. } => Self::named(type_name.clone()),
        }
    }

    fn common<'a>(values: impl Iterator<Item = &'a Value>) -> Self {
        let mut values = values.filter(|v| !v.is_null());
        let Some(first) = values.next() else {
            return Self::any();
        };
        let first = Self::of_value(first);
        if values.all(|v| Self::of_value(v) == first) {
            first
        } else {
            Self::any()
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.main_type)?;
        if self.sub_types.is_empty() {
            return Ok(());
        }
        f.write_str("<")?;
        for (i, sub) in self.sub_types.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            sub.write(f)?;
        }
        f.write_str(">")
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Error from parsing the textual form of a type descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid type '{input}' at offset {offset}: {reason}")]
pub struct ParseTypeError {
    pub input: String,
    pub offset: usize,
    pub reason: &'static str,
}

/// Deepest generic nesting accepted by the parser.
pub const MAX_TYPE_DEPTH: usize = 64;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &'static str) -> ParseTypeError {
        ParseTypeError {
            input: self.input.to_string(),
            offset: self.pos,
            reason,
        }
    }

    fn skip_ws(&mut self) {
        let rest = &self.input[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn ident(&mut self) -> Result<&'a str, ParseTypeError> {
        self.skip_ws();
        let input = self.input;
        let rest = &input[self.pos..];
        let len = rest
            .find(|c: char| c == '<' || c == '>' || c == ',' || c.is_whitespace())
            .unwrap_or(rest.len());
        let ident = &rest[..len];
        if !IDENT.is_match(ident) {
            return Err(self.error("expected a type identifier"));
        }
        self.pos += len;
        Ok(ident)
    }

    fn descriptor(&mut self) -> Result<TypeDescriptor, ParseTypeError> {
        if self.depth >= MAX_TYPE_DEPTH {
            return Err(self.error("type nesting too deep"));
        }
        self.depth += 1;
        let result = self.generic();
        self.depth -= 1;
        result
    }

    fn generic(&mut self) -> Result<TypeDescriptor, ParseTypeError> {
        let main = self.ident()?;
        self.skip_ws();
        let mut sub_types = Vec::new();
        if self.peek() == Some('<') {
            self.pos += 1;
            loop {
                sub_types.push(self.descriptor()?);
                self.skip_ws();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some('>') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error("expected ',' or '>'")),
                }
            }
        }
        Ok(TypeDescriptor::generic(main, sub_types))
    }
}

impl FromStr for TypeDescriptor {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            input: s,
            pos: 0,
            depth: 0,
        };
        let descriptor = parser.descriptor()?;
        parser.skip_ws();
        if parser.pos != s.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(descriptor)
    }
}

impl TryFrom<String> for TypeDescriptor {
    type Error = ParseTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeDescriptor> for String {
    fn from(value: TypeDescriptor) -> Self {
        value.to_string()
    }
}

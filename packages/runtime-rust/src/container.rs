use std::collections::BTreeMap;
use std::sync::Arc;

use apiproc_core::descriptor::names;
use apiproc_core::{TypeDescriptor, Value};
use dashmap::DashMap;

use crate::traits::DependencyContainer;

type Factory = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

/// Nesting limit for member injection; deeper graphs are treated as cyclic.
const MAX_INJECTION_DEPTH: usize = 32;

/// Dependency container with per-type factories and member bindings.
///
/// Types without a factory get their zero value: `Null` for `void`,
/// `option` and unknown types, empty containers and strings, numeric zero,
/// and an empty `Object` for named types. Member bindings fill the named
/// fields of an `Object` that are missing or `Null`.
#[derive(Default)]
pub struct DefaultContainer {
    factories: DashMap<String, Factory>,
    members: DashMap<String, Vec<(String, TypeDescriptor)>>,
}

impl DefaultContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory producing instances of `type_name`.
    pub fn register_factory(
        &self,
        type_name: impl Into<String>,
        factory: impl Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    ) {
        self.factories.insert(type_name.into(), Arc::new(factory));
    }

    /// Declares that objects of `type_name` carry an injected member `member`
    /// of type `ty`.
    pub fn bind_member(&self, type_name: impl Into<String>, member: impl Into<String>, ty: TypeDescriptor) {
        self.members
            .entry(type_name.into())
            .or_default()
            .push((member.into(), ty));
    }

    fn create(&self, ty: &TypeDescriptor, depth: usize) -> anyhow::Result<Value> {
        let factory = self
            .factories
            .get(ty.main_type())
            .map(|entry| Arc::clone(entry.value()));
        let mut value = match factory {
            Some(factory) => factory()?,
            None => zero_value(ty),
        };
        self.inject(&mut value, depth)?;
        Ok(value)
    }

    fn inject(&self, value: &mut Value, depth: usize) -> anyhow::Result<()> {
        let Value::Object { type_name, fields } = value else {
            return Ok(());
        };
        if depth >= MAX_INJECTION_DEPTH {
            anyhow::bail!("member injection of '{type_name}' exceeds depth {MAX_INJECTION_DEPTH}");
        }
        let bindings = match self.members.get(type_name.as_str()) {
            Some(entry) => entry.value().clone(),
            None => return Ok(()),
        };
        for (member, ty) in bindings {
            if fields.get(&member).is_some_and(|v| !v.is_null()) {
                continue;
            }
            let member_value = self.create(&ty, depth + 1)?;
            fields.insert(member, member_value);
        }
        Ok(())
    }
}

fn zero_value(ty: &TypeDescriptor) -> Value {
    if ty.is_unknown() {
        return Value::Null;
    }
    match ty.main_type() {
        names::VOID | names::NULL | names::OPTION => Value::Null,
        names::BOOL => Value::Bool(false),
        names::INT => Value::Int(0),
        names::FLOAT => Value::Float(0.0),
        names::STRING => Value::String(String::new()),
        names::BYTES => Value::Bytes(Vec::new()),
        names::LIST => Value::Array(Vec::new()),
        names::MAP => Value::Map(BTreeMap::new()),
        other => Value::object(other),
    }
}

impl DependencyContainer for DefaultContainer {
    fn instance_of(&self, ty: &TypeDescriptor) -> anyhow::Result<Value> {
        self.create(ty, 0)
    }

    fn inject_members(&self, value: &mut Value) -> anyhow::Result<()> {
        self.inject(value, 0)
    }
}

impl std::fmt::Debug for DefaultContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultContainer")
            .field("factories", &self.factories.len())
            .field("members", &self.members.len())
            .finish()
    }
}

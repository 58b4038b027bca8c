use std::sync::Arc;

use apiproc_core::DeclaredTypeSchema;
use dashmap::DashMap;

use crate::traits::DescriptorSource;

/// Descriptor source backed by an in-memory map of schemas.
#[derive(Debug, Default)]
pub struct InMemorySource {
    types: DashMap<String, Arc<DeclaredTypeSchema>>,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a declared type.
    pub fn insert(&self, schema: DeclaredTypeSchema) {
        self.types.insert(schema.name.clone(), Arc::new(schema));
    }

    /// Loads a JSON array of declared-type schemas.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid schema array.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let schemas: Vec<DeclaredTypeSchema> = serde_json::from_str(json)?;
        let source = Self::new();
        for schema in schemas {
            source.insert(schema);
        }
        Ok(source)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl DescriptorSource for InMemorySource {
    fn declared_type(&self, name: &str) -> Option<Arc<DeclaredTypeSchema>> {
        self.types.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

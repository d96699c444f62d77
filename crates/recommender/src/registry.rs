//! Bidirectional identifier registry
//!
//! Maps external string identifiers to the dense zero-based indices used to
//! address rows of the factor matrices. Indices are assigned in first-seen
//! order, so identical input order yields identical indices.

use crate::error::{RecommenderError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierRegistry {
    id_to_index: HashMap<String, usize>,
    index_to_id: Vec<String>,
}

impl IdentifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from ids listed in index order.
    ///
    /// Fails on duplicates since the result would not be a bijection.
    pub fn from_ordered<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (expected, id) in ids.into_iter().enumerate() {
            let id = id.into();
            let index = registry.register(&id);
            if index != expected {
                return Err(RecommenderError::Validation(format!(
                    "duplicate identifier '{}' at position {}",
                    id, expected
                )));
            }
        }
        Ok(registry)
    }

    /// Register an id, returning its index. Re-registering is a no-op.
    pub fn register(&mut self, external_id: &str) -> usize {
        if let Some(&index) = self.id_to_index.get(external_id) {
            return index;
        }
        let index = self.index_to_id.len();
        self.index_to_id.push(external_id.to_string());
        self.id_to_index.insert(external_id.to_string(), index);
        index
    }

    pub fn to_internal(&self, external_id: &str) -> Result<usize> {
        self.id_to_index
            .get(external_id)
            .copied()
            .ok_or_else(|| RecommenderError::UnknownIdentifier(external_id.to_string()))
    }

    pub fn to_external(&self, index: usize) -> Result<&str> {
        self.index_to_id
            .get(index)
            .map(String::as_str)
            .ok_or(RecommenderError::IndexOutOfRange(index))
    }

    pub fn len(&self) -> usize {
        self.index_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_to_id.is_empty()
    }

    /// Ids in index order
    pub fn ids(&self) -> &[String] {
        &self.index_to_id
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.index_to_id
            .iter()
            .enumerate()
            .map(|(i, id)| (i, id.as_str()))
    }
}

/// User, item and feature-token registries of one generation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetMapping {
    pub users: IdentifierRegistry,
    pub items: IdentifierRegistry,
    /// Feature-token vocabulary; token `t` occupies column `items.len() + t`
    pub features: IdentifierRegistry,
}

impl DatasetMapping {
    /// Width of the item-feature matrix: identity columns plus token columns
    pub fn feature_width(&self) -> usize {
        self.items.len() + self.features.len()
    }
}

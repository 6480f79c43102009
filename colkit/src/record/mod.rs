pub mod differ;
pub mod mutation;
pub mod schema;
pub mod store;

pub use differ::Differ;
pub use mutation::{Column, Deletion, Mutation, MutationBatch, MutationBuilder};
pub use schema::{Schema, SchemaRegistry, SchemaResolver};
pub use store::RecordStore;

use std::collections::BTreeSet;

use crate::types::{Attributes, ColumnValue};

/// An open-ended set of named attributes with change tracking.
///
/// `kind` names the record type and selects the schema used to persist it.
#[derive(Debug, Clone)]
pub struct Record {
    kind: String,
    attributes: Attributes,
    differ: Differ,
}

impl Record {
    /// An empty record; every attribute set afterwards counts as added.
    pub fn new(kind: impl Into<String>) -> Self {
        Self::committed(kind, Attributes::new())
    }

    /// A record whose `attributes` are already persisted.
    pub fn committed(kind: impl Into<String>, attributes: Attributes) -> Self {
        let differ = Differ::new(&attributes);
        Self {
            kind: kind.into(),
            attributes,
            differ,
        }
    }

    /// Never report `excluded` attributes as changes.
    pub fn with_exclusions<I, S>(mut self, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.differ = Differ::with_exclusions(self.differ.snapshot(), excluded);
        self
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.attributes.get(name)
    }

    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ColumnValue>,
    ) -> Option<ColumnValue> {
        self.attributes.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<ColumnValue> {
        self.attributes.remove(name)
    }

    pub fn differ(&self) -> &Differ {
        &self.differ
    }

    pub fn added(&self) -> BTreeSet<String> {
        self.differ.added(&self.attributes)
    }

    pub fn modified(&self) -> BTreeSet<String> {
        self.differ.modified(&self.attributes)
    }

    pub fn deleted(&self) -> BTreeSet<String> {
        self.differ.deleted(&self.attributes)
    }

    pub fn is_dirty(&self) -> bool {
        self.differ.is_dirty(&self.attributes)
    }

    pub fn commit(&mut self) {
        self.differ.commit(&self.attributes);
    }

    pub fn revert(&mut self) {
        self.differ.revert(&mut self.attributes);
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.attributes == other.attributes
    }
}

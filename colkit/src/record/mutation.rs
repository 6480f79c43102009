use std::collections::BTreeMap;

use crate::errors::StoreError;
use crate::record::schema::Schema;
use crate::record::Record;

/// A single column write.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub value: Vec<u8>,
    pub timestamp: i64,
}

/// Removal of the named columns from a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Deletion {
    pub timestamp: i64,
    pub predicate: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(Column),
    Delete(Deletion),
}

/// Mutations grouped by partition key, then by column family.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationBatch {
    rows: BTreeMap<String, BTreeMap<String, Vec<Mutation>>>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, column_family: &str, mutation: Mutation) {
        self.rows
            .entry(key.to_string())
            .or_default()
            .entry(column_family.to_string())
            .or_default()
            .push(mutation);
    }

    pub fn rows(&self) -> &BTreeMap<String, BTreeMap<String, Vec<Mutation>>> {
        &self.rows
    }

    pub fn mutations(&self, key: &str, column_family: &str) -> &[Mutation] {
        self.rows
            .get(key)
            .and_then(|families| families.get(column_family))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.rows
            .values()
            .flat_map(|families| families.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate as `(key, column_family, mutation)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Mutation)> {
        self.rows.iter().flat_map(|(key, families)| {
            families.iter().flat_map(move |(family, mutations)| {
                mutations
                    .iter()
                    .map(move |mutation| (key.as_str(), family.as_str(), mutation))
            })
        })
    }
}

/// Current time in microseconds, the resolution the cluster orders writes by.
pub fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

/// Translates a record's pending changes into a [`MutationBatch`].
pub struct MutationBuilder<'a> {
    record: &'a Record,
    schema: &'a Schema,
    timestamp: i64,
}

impl<'a> MutationBuilder<'a> {
    pub fn new(record: &'a Record, schema: &'a Schema) -> Self {
        Self {
            record,
            schema,
            timestamp: now_micros(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// The partition key taken from the schema's key attribute.
    pub fn key(&self) -> Result<String, StoreError> {
        partition_key(self.record, self.schema)
    }

    /// Deleted names become one deletion; added and modified names become
    /// insertions. The key attribute is written as a column too, so a record
    /// holding only its key still leaves a row behind. When the key itself
    /// changed, every live attribute is written so the row under the new key
    /// is complete.
    pub fn build(&self) -> Result<MutationBatch, StoreError> {
        let key = self.key()?;
        let family = self.schema.column_family.as_str();
        let mut batch = MutationBatch::new();

        let deleted: Vec<String> = self.record.deleted().into_iter().collect();
        if !deleted.is_empty() {
            batch.push(
                &key,
                family,
                Mutation::Delete(Deletion {
                    timestamp: self.timestamp,
                    predicate: deleted,
                }),
            );
        }

        let mut changed = self.record.modified();
        changed.extend(self.record.added());
        if changed.contains(&self.schema.key_attribute) {
            let differ = self.record.differ();
            changed.extend(
                self.record
                    .attributes()
                    .iter()
                    .filter(|(name, value)| !value.is_empty() && !differ.is_excluded(name))
                    .map(|(name, _)| name.clone()),
            );
        }

        for name in changed {
            let Some(value) = self.record.get(&name) else {
                continue;
            };
            if !value.is_finite() {
                return Err(StoreError::ValidationError(format!(
                    "attribute '{}' of {} record holds a non-finite number",
                    name,
                    self.record.kind()
                )));
            }
            batch.push(
                &key,
                family,
                Mutation::Insert(Column {
                    value: value.to_bytes()?,
                    name,
                    timestamp: self.timestamp,
                }),
            );
        }

        Ok(batch)
    }
}

pub(crate) fn partition_key(record: &Record, schema: &Schema) -> Result<String, StoreError> {
    let value = record.get(&schema.key_attribute).ok_or_else(|| {
        StoreError::ValidationError(format!(
            "{} record has no value for key attribute '{}'",
            record.kind(),
            schema.key_attribute
        ))
    })?;

    value.as_key().ok_or_else(|| {
        StoreError::ValidationError(format!(
            "key attribute '{}' of {} record cannot be used as a partition key: {:?}",
            schema.key_attribute,
            record.kind(),
            value
        ))
    })
}

use std::collections::BTreeSet;

use crate::types::Attributes;

/// Tracks how a live attribute map diverges from its state at the last commit.
///
/// The differ holds only the snapshot; every query takes the live map and
/// rescans it, so results always reflect the current state.
#[derive(Debug, Clone, Default)]
pub struct Differ {
    snapshot: Attributes,
    excluded: BTreeSet<String>,
}

impl Differ {
    /// Create a differ whose snapshot is `live`.
    pub fn new(live: &Attributes) -> Self {
        Self::with_exclusions(live, std::iter::empty::<String>())
    }

    /// Create a differ that never reports the `excluded` names.
    pub fn with_exclusions<I, S>(live: &Attributes, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            snapshot: live.clone(),
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn snapshot(&self) -> &Attributes {
        &self.snapshot
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.excluded.contains(name)
    }

    /// Names set on `live` that were unset or `Null` at the last commit.
    pub fn added(&self, live: &Attributes) -> BTreeSet<String> {
        live.iter()
            .filter(|(name, value)| {
                !self.is_excluded(name)
                    && !value.is_empty()
                    && self.snapshot.get(*name).map_or(true, |old| old.is_empty())
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names whose committed value was replaced by a different one.
    pub fn modified(&self, live: &Attributes) -> BTreeSet<String> {
        live.iter()
            .filter(|(name, value)| {
                !self.is_excluded(name)
                    && matches!(self.snapshot.get(*name), Some(old) if !old.is_empty() && old != *value)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Names present at the last commit that `live` no longer has.
    pub fn deleted(&self, live: &Attributes) -> BTreeSet<String> {
        self.snapshot
            .keys()
            .filter(|name| !self.is_excluded(name) && !live.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn is_dirty(&self, live: &Attributes) -> bool {
        !self.added(live).is_empty()
            || !self.modified(live).is_empty()
            || !self.deleted(live).is_empty()
    }

    pub fn commit(&mut self, live: &Attributes) {
        self.snapshot = live.clone();
    }

    /// Roll `live` back to the snapshot, then re-commit.
    pub fn revert(&mut self, live: &mut Attributes) {
        live.retain(|name, _| self.snapshot.contains_key(name));
        for (name, value) in &self.snapshot {
            live.insert(name.clone(), value.clone());
        }
        self.commit(live);
    }
}

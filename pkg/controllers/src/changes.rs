use pkg_types::model::Endpoint;
use std::collections::{HashMap, HashSet};

/// Endpoint mutations needed to move the registry from `current` to `desired`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub create: Vec<Endpoint>,
    pub update: Vec<Endpoint>,
    pub delete: Vec<Endpoint>,
}

impl Changes {
    /// Anything to register (new or changed).
    pub fn has_updates(&self) -> bool {
        !self.create.is_empty() || !self.update.is_empty()
    }

    pub fn has_deletes(&self) -> bool {
        !self.delete.is_empty()
    }

    pub fn is_none(&self) -> bool {
        !self.has_updates() && !self.has_deletes()
    }

    /// Endpoints to register in one batch: creates followed by updates.
    pub fn upserts(&self) -> Vec<Endpoint> {
        self.create.iter().chain(self.update.iter()).cloned().collect()
    }
}

/// Match endpoints by id. Same id with any differing field is an update;
/// an id only in `desired` is a create, only in `current` a delete.
/// Duplicate ids in `desired` keep their first occurrence.
pub fn calculate_changes(current: &[Endpoint], desired: &[Endpoint]) -> Changes {
    let mut unmatched: HashMap<&str, &Endpoint> =
        current.iter().map(|ep| (ep.id.as_str(), ep)).collect();
    let mut seen = HashSet::new();
    let mut changes = Changes::default();

    for ep in desired {
        if !seen.insert(ep.id.as_str()) {
            continue;
        }
        match unmatched.remove(ep.id.as_str()) {
            Some(existing) if existing != ep => changes.update.push(ep.clone()),
            Some(_) => {}
            None => changes.create.push(ep.clone()),
        }
    }

    // Walk `current` again so deletes keep a stable order
    for ep in current {
        if unmatched.remove(ep.id.as_str()).is_some() {
            changes.delete.push(ep.clone());
        }
    }

    changes
}

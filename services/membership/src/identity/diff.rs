//! Group diff engine.
//!
//! # Purpose
//! Computes the minimal add/remove operations that move an account from its
//! current group set to a desired one. Pure and deterministic.
//!
//! # Key invariants
//! - Names compare case-insensitively; `to_add` keeps the desired spelling and
//!   `to_remove` keeps the provider's spelling.
//! - Output sets are ordered, so repeated runs emit operations in the same order.
use crate::model::fold_name;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl GroupDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

pub fn diff<C, D, S1, S2>(current: C, desired: D) -> GroupDiff
where
    C: IntoIterator<Item = S1>,
    D: IntoIterator<Item = S2>,
    S1: AsRef<str>,
    S2: AsRef<str>,
{
    let current = fold(current);
    let desired = fold(desired);
    GroupDiff {
        to_add: desired
            .iter()
            .filter(|(key, _)| !current.contains_key(*key))
            .map(|(_, name)| name.clone())
            .collect(),
        to_remove: current
            .iter()
            .filter(|(key, _)| !desired.contains_key(*key))
            .map(|(_, name)| name.clone())
            .collect(),
    }
}

/// Case-insensitive membership test over a set of names.
pub fn contains_ignore_case<'a, I>(names: I, wanted: &str) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    let wanted = fold_name(wanted);
    names.into_iter().any(|name| fold_name(name) == wanted)
}

// First spelling wins when a set carries the same name in several casings.
fn fold<I, S>(names: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut folded = BTreeMap::new();
    for name in names {
        let name = name.as_ref();
        folded
            .entry(fold_name(name))
            .or_insert_with(|| name.to_string());
    }
    folded
}

// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Write operations carried by a prepare.

use std::collections::HashSet;

use super::key::{Key, Value};

/// A single write operation in a transaction's modification list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    /// Unconditional write.
    Put { key: Key, value: Value },
    /// Unconditional removal.
    Remove { key: Key },
    /// Conditional write; subject to the write-skew check.
    Replace {
        key: Key,
        expected: Option<Value>,
        value: Value,
    },
    /// Multi-key write.
    PutAll(Vec<(Key, Value)>),
    /// Removes every entry. Names no keys.
    Clear,
}

impl Modification {
    /// Returns the keys this operation writes, in declaration order.
    pub fn affected_keys(&self) -> Vec<&Key> {
        match self {
            Modification::Put { key, .. }
            | Modification::Remove { key }
            | Modification::Replace { key, .. } => vec![key],
            Modification::PutAll(entries) => entries.iter().map(|(k, _)| k).collect(),
            Modification::Clear => Vec::new(),
        }
    }

    #[inline]
    pub fn is_clear(&self) -> bool {
        matches!(self, Modification::Clear)
    }
}

/// Collects the distinct keys written by `modifications`, keeping first-seen order.
pub fn modified_keys(modifications: &[Modification]) -> Vec<Key> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for key in modifications.iter().flat_map(Modification::affected_keys) {
        if seen.insert(key) {
            keys.push(key.clone());
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modified_keys_dedup_keeps_order() {
        let mods = vec![
            Modification::Put {
                key: Key::from("b"),
                value: Value::from("1"),
            },
            Modification::PutAll(vec![
                (Key::from("a"), Value::from("2")),
                (Key::from("b"), Value::from("3")),
            ]),
            Modification::Remove { key: Key::from("c") },
        ];

        let keys = modified_keys(&mods);
        assert_eq!(keys, vec![Key::from("b"), Key::from("a"), Key::from("c")]);
    }

    #[test]
    fn test_clear_has_no_keys() {
        assert!(modified_keys(&[Modification::Clear]).is_empty());
        assert!(Modification::Clear.is_clear());
    }
}

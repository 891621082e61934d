//! Truncated ID index.
//!
//! Resolves abbreviated IDs the way `docker ps` output is used: any prefix
//! that identifies exactly one stored ID resolves to it. IDs live in a
//! sorted set so a prefix query is a single range scan that stops after
//! the second match.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::ops::Bound;

/// Sorted set of full IDs supporting unique-prefix lookup.
#[derive(Debug, Default, Clone)]
pub struct TruncIndex {
    ids: BTreeSet<String>,
}

impl TruncIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a full ID.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidId`] for empty IDs or IDs containing whitespace
    /// - [`Error::AlreadyExists`] if the ID is already indexed
    pub fn add(&mut self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidId {
                id: id.to_string(),
                reason: "id must not be empty".to_string(),
            });
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::InvalidId {
                id: id.to_string(),
                reason: "id must not contain whitespace".to_string(),
            });
        }
        if !self.ids.insert(id.to_string()) {
            return Err(Error::AlreadyExists(id.to_string()));
        }
        Ok(())
    }

    /// Resolves `prefix` to the single full ID it abbreviates.
    ///
    /// Zero matches and several matches are both [`Error::NotFound`].
    pub fn get(&self, prefix: &str) -> Result<String> {
        if prefix.is_empty() {
            return Err(Error::NotFound("empty id prefix".to_string()));
        }
        let mut matches = self
            .ids
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|id| id.starts_with(prefix));

        let Some(first) = matches.next() else {
            return Err(Error::NotFound(prefix.to_string()));
        };
        if matches.next().is_some() {
            tracing::debug!(prefix, "Ambiguous id prefix");
            return Err(Error::NotFound(format!("{prefix} (ambiguous prefix)")));
        }
        Ok(first.clone())
    }

    /// Removes a full ID. Returns false if it was not indexed.
    pub fn delete(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(ids: &[&str]) -> TruncIndex {
        let mut idx = TruncIndex::new();
        for id in ids {
            idx.add(id).unwrap();
        }
        idx
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let idx = index(&["abc123", "abd456", "xyz"]);
        assert_eq!(idx.get("abc").unwrap(), "abc123");
        assert_eq!(idx.get("abd").unwrap(), "abd456");
        assert_eq!(idx.get("x").unwrap(), "xyz");
        assert_eq!(idx.get("abc123").unwrap(), "abc123");
    }

    #[test]
    fn test_ambiguous_prefix_is_not_found() {
        let idx = index(&["abc123", "abd456"]);
        assert!(idx.get("ab").unwrap_err().is_not_found());
        assert!(idx.get("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_missing_and_empty_prefix_are_not_found() {
        let idx = index(&["abc123"]);
        assert!(idx.get("zzz").unwrap_err().is_not_found());
        assert!(idx.get("").unwrap_err().is_not_found());
        assert!(idx.get("abc1234").unwrap_err().is_not_found());
    }

    #[test]
    fn test_full_id_that_prefixes_another() {
        let idx = index(&["abc", "abcdef"]);
        // "abc" is a prefix of both, so even the exact ID is ambiguous.
        assert!(idx.get("abc").is_err());
        assert_eq!(idx.get("abcd").unwrap(), "abcdef");
    }

    #[test]
    fn test_add_rejects_invalid_and_duplicate() {
        let mut idx = TruncIndex::new();
        assert!(matches!(idx.add(""), Err(Error::InvalidId { .. })));
        assert!(matches!(idx.add("a b"), Err(Error::InvalidId { .. })));
        idx.add("abc").unwrap();
        assert!(matches!(idx.add("abc"), Err(Error::AlreadyExists(_))));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_delete() {
        let mut idx = index(&["abc123", "abd456"]);
        assert!(idx.delete("abc123"));
        assert!(!idx.delete("abc123"));
        assert_eq!(idx.get("ab").unwrap(), "abd456");
    }
}

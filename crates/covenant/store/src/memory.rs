//! In-memory reference implementation of [`OwnerStore`].
//!
//! Deterministic and test-friendly; every value is cloned in and out so
//! callers never observe shared mutable state.

use dashmap::DashMap;

use crate::traits::OwnerStore;
use crate::{StoreError, StoreResult};

pub struct MemoryOwnerStore<T> {
    values: DashMap<String, T>,
}

impl<T> MemoryOwnerStore<T> {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<T> Default for MemoryOwnerStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync> OwnerStore<T> for MemoryOwnerStore<T> {
    fn get(&self, owner: &str) -> StoreResult<Option<T>> {
        Ok(self.values.get(owner).map(|v| v.value().clone()))
    }

    fn put(&self, owner: &str, value: T) -> StoreResult<()> {
        if owner.trim().is_empty() {
            return Err(StoreError::InvalidInput("owner id must not be empty".into()));
        }
        self.values.insert(owner.to_string(), value);
        Ok(())
    }

    fn list(&self) -> StoreResult<Vec<(String, T)>> {
        let mut all: Vec<(String, T)> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_list() {
        let store = MemoryOwnerStore::<u32>::new();
        store.put("b", 2).unwrap();
        store.put("a", 1).unwrap();

        assert_eq!(store.get("a").unwrap(), Some(1));
        assert_eq!(store.get("missing").unwrap(), None);
        assert_eq!(
            store.list().unwrap(),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn insert_new_refuses_existing_owner() {
        let store = MemoryOwnerStore::<u32>::new();
        store.insert_new("a", 1).unwrap();
        let err = store.insert_new("a", 2).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.require("a").unwrap(), 1);
    }

    #[test]
    fn require_missing_is_not_found() {
        let store = MemoryOwnerStore::<u32>::new();
        assert!(matches!(store.require("x"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn blank_owner_rejected() {
        let store = MemoryOwnerStore::<u32>::new();
        assert!(matches!(store.put(" ", 1), Err(StoreError::InvalidInput(_))));
    }
}

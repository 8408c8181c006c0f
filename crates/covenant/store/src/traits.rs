use crate::StoreResult;

/// Keyed state persistence: one value per owner id.
///
/// Callers serialize mutations for one owner themselves (see
/// `covenant_types::KeyedLocks`); the store only has to make single
/// operations atomic.
pub trait OwnerStore<T>: Send + Sync {
    /// Get the value stored for `owner`, if any.
    fn get(&self, owner: &str) -> StoreResult<Option<T>>;

    /// Insert or replace the value for `owner`.
    fn put(&self, owner: &str, value: T) -> StoreResult<()>;

    /// All stored values, ordered by owner id.
    fn list(&self) -> StoreResult<Vec<(String, T)>>;

    /// Like [`OwnerStore::get`] but a missing owner is an error.
    fn require(&self, owner: &str) -> StoreResult<T> {
        self.get(owner)?
            .ok_or_else(|| crate::StoreError::NotFound(owner.to_string()))
    }

    /// Insert only when `owner` has no value yet.
    fn insert_new(&self, owner: &str, value: T) -> StoreResult<()> {
        if self.get(owner)?.is_some() {
            return Err(crate::StoreError::Conflict(format!(
                "{owner} already exists"
            )));
        }
        self.put(owner, value)
    }
}

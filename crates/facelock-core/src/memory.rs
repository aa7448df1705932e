//! In-memory store implementations for embedding hosts and tests.

use crate::store::{BlobStore, GalleryStore, StoreError};
use crate::types::Identity;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Backend("store mutex poisoned".into()))
}

#[derive(Debug, Default)]
pub struct MemoryGallery {
    records: Mutex<Vec<Identity>>,
}

impl MemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GalleryStore for MemoryGallery {
    fn insert(&self, identity: &Identity) -> Result<String, StoreError> {
        let mut records = lock(&self.records)?;
        // Same id replaces the record, as an upsert would.
        records.retain(|r| r.id != identity.id);
        records.push(identity.clone());
        Ok(identity.id.clone())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    fn list(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(lock(&self.records)?.clone())
    }

    fn get(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        Ok(lock(&self.records)?.iter().find(|r| r.id == id).cloned())
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let mut records = lock(&self.records)?;
        let n = records.len();
        records.clear();
        Ok(n)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobs {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.blobs
            .lock()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl BlobStore for MemoryBlobs {
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        lock(&self.blobs)?.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        lock(&self.blobs)?
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::BlobNotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.blobs)?.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: &str, name: &str) -> Identity {
        Identity {
            id: id.into(),
            name: name.into(),
            created_at: "2024-01-01 00:00:00".into(),
        }
    }

    #[test]
    fn test_gallery_crud() {
        let store = MemoryGallery::new();
        assert_eq!(store.insert(&identity("1", "a")).unwrap(), "1");
        store.insert(&identity("2", "b")).unwrap();

        let names: Vec<_> = store.list().unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(store.get("2").unwrap().unwrap().name, "b");
        assert!(store.delete("1").unwrap());
        assert!(!store.delete("1").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_blobs() {
        let blobs = MemoryBlobs::new();
        blobs.write("x", b"abc").unwrap();
        assert_eq!(blobs.read("x").unwrap(), b"abc");
        assert!(matches!(blobs.read("y"), Err(StoreError::BlobNotFound(_))));
        assert!(blobs.delete("x").unwrap());
        assert!(blobs.names().is_empty());
    }
}

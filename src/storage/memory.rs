use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use super::{is_under, normalize, Storage, StorageError, StorageResult};

/// Objects kept in process memory. Doubles as the default scratch space
/// for intermediate map output.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: DashMap<String, Bytes>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn has_children(&self, name: &str) -> bool {
        self.objects
            .iter()
            .any(|entry| entry.key() != name && is_under(entry.key(), name))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn open(&self, name: &str) -> StorageResult<Bytes> {
        let name = normalize(name);
        self.objects
            .get(&name)
            .map(|data| data.value().clone())
            .ok_or(StorageError::NotFound(name))
    }

    async fn put(&self, name: &str, data: Bytes) -> StorageResult<()> {
        self.objects.insert(normalize(name), data);
        Ok(())
    }

    async fn delete(&self, name: &str, recursive: bool) -> StorageResult<()> {
        let name = normalize(name);
        if recursive {
            let before = self.objects.len();
            self.objects.retain(|key, _| !is_under(key, &name));
            if self.objects.len() == before {
                return Err(StorageError::NotFound(name));
            }
            return Ok(());
        }
        if self.objects.remove(&name).is_some() {
            Ok(())
        } else if self.has_children(&name) {
            Err(StorageError::NotEmpty(name))
        } else {
            Err(StorageError::NotFound(name))
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut names: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| is_under(entry.key(), prefix))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        let name = normalize(name);
        Ok(self.objects.contains_key(&name) || self.has_children(&name))
    }

    async fn len(&self, name: &str) -> StorageResult<u64> {
        let name = normalize(name);
        self.objects
            .get(&name)
            .map(|data| data.len() as u64)
            .ok_or(StorageError::NotFound(name))
    }
}

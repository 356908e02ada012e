use std::io::SeekFrom;
use std::ops::Range;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;
use uuid::Uuid;

use super::{clamp, file_name, normalize, Storage, StorageError, StorageResult};

/// Objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> PathBuf {
        let name = normalize(name);
        if name.is_empty() {
            self.root.clone()
        } else {
            self.root.join(name)
        }
    }

    async fn walk(&self, dir: PathBuf, out: &mut Vec<String>) -> StorageResult<()> {
        let mut pending = vec![dir];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StorageError::from_io(&dir.to_string_lossy(), err)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|err| StorageError::from_io(&dir.to_string_lossy(), err))?
            {
                let path = entry.path();
                let kind = entry
                    .file_type()
                    .await
                    .map_err(|err| StorageError::from_io(&path.to_string_lossy(), err))?;
                if kind.is_dir() {
                    pending.push(path);
                } else if let Some(name) = self.name_of(&path) {
                    out.push(name);
                }
            }
        }
        Ok(())
    }

    fn name_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn open(&self, name: &str) -> StorageResult<Bytes> {
        let data = fs::read(self.path(name))
            .await
            .map_err(|err| StorageError::from_io(name, err))?;
        Ok(Bytes::from(data))
    }

    async fn open_range(&self, name: &str, range: Range<u64>) -> StorageResult<Bytes> {
        let io_err = |err| StorageError::from_io(name, err);
        let mut file = fs::File::open(self.path(name)).await.map_err(io_err)?;
        let len = file.metadata().await.map_err(io_err)?.len();
        let (start, end) = clamp(range, len);
        file.seek(SeekFrom::Start(start)).await.map_err(io_err)?;
        let mut buf = Vec::with_capacity((end - start) as usize);
        file.take(end - start)
            .read_to_end(&mut buf)
            .await
            .map_err(io_err)?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, name: &str, data: Bytes) -> StorageResult<()> {
        let path = self.path(name);
        let io_err = |err| StorageError::from_io(name, err);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // write next to the target, then rename into place
        let staging = path.with_file_name(format!(".{}.{}.tmp", file_name(name), Uuid::new_v4()));
        fs::write(&staging, &data).await.map_err(io_err)?;
        fs::rename(&staging, &path).await.map_err(io_err)?;
        trace!(name, bytes = data.len(), "wrote object");
        Ok(())
    }

    async fn delete(&self, name: &str, recursive: bool) -> StorageResult<()> {
        let path = self.path(name);
        let io_err = |err| StorageError::from_io(name, err);
        let meta = fs::metadata(&path).await.map_err(io_err)?;
        if !meta.is_dir() {
            return fs::remove_file(&path).await.map_err(io_err);
        }
        if recursive {
            return fs::remove_dir_all(&path).await.map_err(io_err);
        }
        let mut entries = fs::read_dir(&path).await.map_err(io_err)?;
        if entries.next_entry().await.map_err(io_err)?.is_some() {
            return Err(StorageError::NotEmpty(normalize(name)));
        }
        fs::remove_dir(&path).await.map_err(io_err)
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let path = self.path(prefix);
        let mut names = Vec::new();
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => self.walk(path, &mut names).await?,
            Ok(_) => names.push(normalize(prefix)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::from_io(prefix, err)),
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        fs::try_exists(self.path(name))
            .await
            .map_err(|err| StorageError::from_io(name, err))
    }

    async fn len(&self, name: &str) -> StorageResult<u64> {
        let meta = fs::metadata(self.path(name))
            .await
            .map_err(|err| StorageError::from_io(name, err))?;
        if meta.is_dir() {
            return Err(StorageError::NotFound(normalize(name)));
        }
        Ok(meta.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_list_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage.put("job/out/mr-out-00000", Bytes::from("a\t1\n")).await.unwrap();
        storage.put("job/out/_SUCCESS", Bytes::new()).await.unwrap();
        storage.put("job/in.txt", Bytes::from("x")).await.unwrap();

        assert_eq!(
            storage.list("job/out").await.unwrap(),
            vec!["job/out/_SUCCESS".to_string(), "job/out/mr-out-00000".to_string()]
        );
        assert_eq!(storage.list("job/in.txt").await.unwrap(), vec!["job/in.txt".to_string()]);
        assert!(storage.list("missing").await.unwrap().is_empty());
        assert_eq!(storage.len("job/out/mr-out-00000").await.unwrap(), 4);
        assert_eq!(
            storage.open_range("job/out/mr-out-00000", 2..10).await.unwrap(),
            Bytes::from("1\n")
        );

        assert!(matches!(
            storage.delete("job/out", false).await,
            Err(StorageError::NotEmpty(_))
        ));
        storage.delete("job/out", true).await.unwrap();
        assert!(!storage.exists("job/out").await.unwrap());
        assert!(matches!(
            storage.delete("job/out", true).await,
            Err(StorageError::NotFound(_))
        ));
    }
}

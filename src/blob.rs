//! Blob storage for uploaded attachments.
//!
//! Keys are `/`-separated paths whose first segment is the owning user id:
//! `{user_id}/{uuid}-{name}` or `{user_id}/{conversation_id}/{uuid}-{name}`.
//! Blobs are append-only per key; the only removal is a prefix delete when a
//! conversation goes away.
//!
//! Two backends:
//! - [`FsBlobStore`] writes `{root}/{key}` plus a `{key}.meta.json` sidecar.
//! - [`MemoryBlobStore`] keeps everything in a map, for tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const META_SUFFIX: &str = ".meta.json";

/// Metadata stored next to every blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobInfo {
    pub key: String,
    /// Original file name as uploaded.
    pub name: String,
    pub size: u64,
    pub content_type: String,
    /// Hex SHA-256 of the bytes.
    pub etag: String,
}

#[derive(Debug, Clone)]
pub struct Blob {
    pub info: BlobInfo,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the recorded metadata.
    async fn put(&self, key: &str, name: &str, content_type: &str, bytes: &[u8])
        -> Result<BlobInfo>;

    /// Fetch a blob; `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<Blob>>;

    /// Metadata only.
    async fn head(&self, key: &str) -> Result<Option<BlobInfo>>;

    /// Remove every blob whose key starts with `prefix` (which must end in `/`).
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn safe_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // A bare "." or ".." would become a path component.
    if cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

/// Key for a new upload by `user_id`, optionally scoped to a conversation.
pub fn upload_key(user_id: &str, conversation_id: Option<&str>, file_name: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match conversation_id {
        Some(conv) => format!("{}/{}/{}-{}", user_id, conv, id, safe_name(file_name)),
        None => format!("{}/{}-{}", user_id, id, safe_name(file_name)),
    }
}

/// Namespace prefix of blobs attached to one conversation.
pub fn conversation_prefix(user_id: &str, conversation_id: &str) -> String {
    format!("{}/{}/", user_id, conversation_id)
}

/// True when `key` is a well-formed key inside `user_id`'s namespace.
pub fn owns_key(user_id: &str, key: &str) -> bool {
    !user_id.is_empty()
        && key
            .strip_prefix(user_id)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some()
        && validate_key(key).is_ok()
}

/// Reject keys that could escape the blob root.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        bail!("invalid blob key '{}'", key);
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            bail!("invalid blob key '{}'", key);
        }
    }
    if key.ends_with(META_SUFFIX) {
        bail!("invalid blob key '{}'", key);
    }
    Ok(())
}

fn etag_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Filesystem-backed blob store rooted at a directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", key, META_SUFFIX))
    }

    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let temp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create {}", temp_path.display()))?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %path.display(), error = %e, "blob rename failed");
            e
        })?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(
        &self,
        key: &str,
        name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<BlobInfo> {
        validate_key(key)?;
        let info = BlobInfo {
            key: key.to_string(),
            name: name.to_string(),
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
            etag: etag_of(bytes),
        };
        debug!(key, size = bytes.len(), "blob put");
        Self::write_atomic(&self.data_path(key), bytes).await?;
        Self::write_atomic(&self.meta_path(key), &serde_json::to_vec(&info)?).await?;
        Ok(info)
    }

    async fn get(&self, key: &str) -> Result<Option<Blob>> {
        let Some(info) = self.head(key).await? else {
            return Ok(None);
        };
        match fs::read(self.data_path(key)).await {
            Ok(bytes) => Ok(Some(Blob { info, bytes })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blob {}", key)),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<BlobInfo>> {
        validate_key(key)?;
        match fs::read(self.meta_path(key)).await {
            Ok(raw) => Ok(Some(
                serde_json::from_slice(&raw)
                    .with_context(|| format!("Corrupt metadata for blob {}", key))?,
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read metadata for {}", key)),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let dir = prefix
            .strip_suffix('/')
            .ok_or_else(|| anyhow!("blob prefix '{}' must end with '/'", prefix))?;
        validate_key(dir)?;
        let path = self.root.join(dir);
        if !fs::try_exists(&path).await? {
            return Ok(0);
        }
        let mut removed = 0u64;
        let mut stack = vec![path.clone()];
        while let Some(d) = stack.pop() {
            let mut entries = fs::read_dir(&d).await?;
            while let Some(entry) = entries.next_entry().await? {
                let ty = entry.file_type().await?;
                if ty.is_dir() {
                    stack.push(entry.path());
                } else if !entry.file_name().to_string_lossy().ends_with(META_SUFFIX) {
                    removed += 1;
                }
            }
        }
        fs::remove_dir_all(&path)
            .await
            .with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(removed)
    }
}

/// In-memory blob store for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Blob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("blob store lock poisoned")
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        name: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<BlobInfo> {
        validate_key(key)?;
        let info = BlobInfo {
            key: key.to_string(),
            name: name.to_string(),
            size: bytes.len() as u64,
            content_type: content_type.to_string(),
            etag: etag_of(bytes),
        };
        self.blobs.write().map_err(poisoned)?.insert(
            key.to_string(),
            Blob {
                info: info.clone(),
                bytes: bytes.to_vec(),
            },
        );
        Ok(info)
    }

    async fn get(&self, key: &str) -> Result<Option<Blob>> {
        Ok(self.blobs.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn head(&self, key: &str) -> Result<Option<BlobInfo>> {
        Ok(self
            .blobs
            .read()
            .map_err(poisoned)?
            .get(key)
            .map(|b| b.info.clone()))
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        let before = blobs.len();
        blobs.retain(|k, _| !k.starts_with(prefix));
        Ok((before - blobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_name_replaces_specials() {
        assert_eq!(safe_name("my report (v2).pdf"), "my_report__v2_.pdf");
        assert_eq!(safe_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(safe_name(".."), "_..");
        assert_eq!(safe_name("naïve.txt"), "na_ve.txt");
    }

    #[test]
    fn upload_keys_are_namespaced() {
        let k = upload_key("u1", None, "a b.txt");
        assert!(k.starts_with("u1/"));
        assert!(k.ends_with("-a_b.txt"));
        assert_eq!(k.matches('/').count(), 1);

        let k = upload_key("u1", Some("c9"), "x.png");
        assert!(k.starts_with("u1/c9/"));
        assert!(owns_key("u1", &k));
        assert!(!owns_key("u2", &k));
    }

    #[test]
    fn ownership_requires_exact_segment() {
        assert!(!owns_key("u1", "u10/file"));
        assert!(!owns_key("u1", "u1/../u2/file"));
        assert!(!owns_key("u1", "u1"));
        assert!(!owns_key("", "/file"));
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_prefix_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let info = store
            .put("u1/c1/1-notes.txt", "notes.txt", "text/plain", b"hello")
            .await
            .unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.etag, etag_of(b"hello"));
        store
            .put("u1/2-other.txt", "other.txt", "text/plain", b"keep")
            .await
            .unwrap();

        let blob = store.get("u1/c1/1-notes.txt").await.unwrap().unwrap();
        assert_eq!(blob.bytes, b"hello");
        assert_eq!(blob.info.name, "notes.txt");
        assert!(store.get("u1/missing").await.unwrap().is_none());

        assert_eq!(store.delete_prefix("u1/c1/").await.unwrap(), 1);
        assert!(store.get("u1/c1/1-notes.txt").await.unwrap().is_none());
        assert!(store.get("u1/2-other.txt").await.unwrap().is_some());
        assert_eq!(store.delete_prefix("u1/c1/").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn fs_store_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.put("../escape", "x", "text/plain", b"x").await.is_err());
        assert!(store.get("u1/../../x").await.is_err());
    }

    #[tokio::test]
    async fn memory_store_prefix_delete() {
        let store = MemoryBlobStore::new();
        store.put("u1/c1/a", "a", "text/plain", b"1").await.unwrap();
        store.put("u1/c2/b", "b", "text/plain", b"2").await.unwrap();
        assert_eq!(store.delete_prefix("u1/c1/").await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }
}

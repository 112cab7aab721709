//! Remote object storage boundary.
//!
//! Only three operations are needed: put, list-by-prefix and get. Keys are
//! `{component}/{file}`, so a retried put of the same artifact overwrites the
//! same object.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from remote storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote storage unavailable: {0}")]
    Unavailable(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

impl RemoteError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Object storage used as the secondary artifact location.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Copy the local file at `source` to `key`.
    async fn put_object(&self, key: &str, source: &Path) -> Result<(), RemoteError>;

    /// Keys beginning with `prefix`, sorted.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;

    /// Download `key` into the local file `dest`.
    async fn get_object(&self, key: &str, dest: &Path) -> Result<(), RemoteError>;
}

/// Object key for a file belonging to a component.
#[must_use]
pub fn object_key(component: crate::artifact::Component, file_name: &str) -> String {
    format!("{component}/{file_name}")
}

/// Remote store backed by a directory (mounted bucket, NFS mirror).
#[derive(Debug, Clone)]
pub struct FsRemoteStore {
    root: PathBuf,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, RemoteError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "..")
        {
            return Err(RemoteError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

fn unavailable(err: &std::io::Error) -> RemoteError {
    RemoteError::Unavailable(err.to_string())
}

#[async_trait]
impl RemoteStore for FsRemoteStore {
    async fn put_object(&self, key: &str, source: &Path) -> Result<(), RemoteError> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(&e))?;
        }
        let mut partial = target.clone().into_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        tokio::fs::copy(source, &partial)
            .await
            .map_err(|e| unavailable(&e))?;
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            if root.exists() {
                collect_keys(&root, &root, &mut keys).map_err(|e| unavailable(&e))?;
            }
            keys.retain(|k| k.starts_with(&prefix) && !k.ends_with(".partial"));
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| RemoteError::Unavailable(format!("list task failed: {e}")))?
    }

    async fn get_object(&self, key: &str, dest: &Path) -> Result<(), RemoteError> {
        let source = self.resolve(key)?;
        match tokio::fs::metadata(&source).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RemoteError::NotFound(key.to_string()));
            }
            Err(e) => return Err(unavailable(&e)),
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(&e))?;
        }
        tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| unavailable(&e))?;
        Ok(())
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    Ok(())
}

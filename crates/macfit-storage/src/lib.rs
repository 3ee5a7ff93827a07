//! Immutable capture artifact storage + catalog snapshot persistence.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use macfit_core::{Catalog, CatalogSnapshot};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "macfit-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Hash-addressed archive of captured page bodies.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(
        &self,
        captured_at: DateTime<Utc>,
        target_id: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let stamp = captured_at.format("%Y%m%d_%H%M%S").to_string();
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        PathBuf::from(stamp)
            .join(target_id)
            .join(format!("{content_hash}.{ext}"))
    }

    /// Store bytes immutably using a hash-addressed path and atomic temp-file rename.
    pub async fn store_bytes(
        &self,
        captured_at: DateTime<Utc>,
        target_id: &str,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.artifact_relative_path(captured_at, target_id, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let stored = |deduplicated| StoredArtifact {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(stored(true));
        }

        match write_via_temp_file(&absolute_path, bytes).await {
            Ok(()) => Ok(stored(false)),
            Err(StorageError::Io { source, .. }) if source.kind() == std::io::ErrorKind::AlreadyExists => {
                Ok(stored(true))
            }
            Err(err) => Err(err).with_context(|| format!("storing artifact {}", absolute_path.display())),
        }
    }
}

/// Persists the catalog snapshot as `{ "timestamp": .., "products": [..] }`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the snapshot file wholesale; readers never observe a partial write.
    pub async fn save(&self, snapshot: &CatalogSnapshot) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_via_temp_file(&self.path, &bytes).await?;
        debug!(
            path = %self.path.display(),
            products = snapshot.products.len(),
            "snapshot saved"
        );
        Ok(())
    }

    /// Loads the snapshot. A missing file, undecodable JSON, or an object
    /// without both `timestamp` and `products` all read as `None`.
    pub async fn load(&self) -> Result<Option<CatalogSnapshot>, StorageError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::io(&self.path, err)),
        };

        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot is not valid JSON");
                return Ok(None);
            }
        };
        let has_shape = value
            .as_object()
            .is_some_and(|obj| obj.contains_key("timestamp") && obj.contains_key("products"));
        if !has_shape {
            warn!(path = %self.path.display(), "snapshot is missing timestamp/products");
            return Ok(None);
        }

        match serde_json::from_value::<CatalogSnapshot>(value) {
            Ok(snapshot) => Ok(Some(self.drop_unvalidated(snapshot))),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "snapshot records do not decode");
                Ok(None)
            }
        }
    }
}

impl SnapshotStore {
    /// Persisted files may be hand-edited; records without a price or a
    /// storage size never enter a catalog.
    fn drop_unvalidated(&self, snapshot: CatalogSnapshot) -> CatalogSnapshot {
        let before = snapshot.products.len();
        let kept = snapshot
            .products
            .into_records()
            .into_iter()
            .filter(|record| record.price > 0 && record.storage_gb > 0)
            .collect::<Vec<_>>();
        if kept.len() < before {
            warn!(
                path = %self.path.display(),
                dropped = before - kept.len(),
                "snapshot records without price or storage dropped"
            );
        }
        CatalogSnapshot {
            timestamp: snapshot.timestamp,
            products: Catalog::from_records(kept),
        }
    }
}

async fn write_via_temp_file(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| StorageError::io(&parent, e))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|e| StorageError::io(&temp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| StorageError::io(&temp_path, e))?;
    file.flush().await.map_err(|e| StorageError::io(&temp_path, e))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, dest).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::io(dest, err));
    }
    Ok(())
}

//! On-disk artifact layout: `<root>/<run_id>/<name><ext>`

use chrono::Utc;
use patchwright_core::{new_id, ArtifactKind, ArtifactRecord, Error, Result};
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

#[derive(Clone)]
pub struct ArtifactFileStore {
    root: PathBuf,
    max_size_bytes: u64,
}

impl ArtifactFileStore {
    pub fn new(root: impl Into<PathBuf>, max_size_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_size_bytes,
        }
    }

    /// Write the bytes and return the durable record. The record is only
    /// built once the file is on disk, so a record implies the file exists.
    pub async fn save(
        &self,
        run_id: &str,
        kind: ArtifactKind,
        name: &str,
        content: &[u8],
        metadata: Option<Value>,
    ) -> Result<ArtifactRecord> {
        let size = content.len() as u64;
        if size > self.max_size_bytes {
            return Err(Error::ArtifactTooLarge {
                size,
                limit: self.max_size_bytes,
            });
        }

        let dir = self.root.join(run_id);
        fs::create_dir_all(&dir).await?;

        let filename = format!("{}{}", name, kind.extension());
        let path = dir.join(&filename);
        fs::write(&path, content).await?;

        debug!("artifact saved: {} ({} bytes)", path.display(), size);
        Ok(ArtifactRecord {
            id: new_id(),
            run_id: run_id.to_string(),
            kind,
            name: name.to_string(),
            path: path.to_string_lossy().to_string(),
            size_bytes: size,
            metadata,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn saves_with_type_extension() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactFileStore::new(dir.path(), 1024 * 1024);

        let record = store
            .save("run1", ArtifactKind::Diff, "changes", b"--- a\n+++ b\n", None)
            .await
            .unwrap();
        assert!(record.path.ends_with("run1/changes.patch"));
        assert_eq!(record.size_bytes, 12);
        assert_eq!(
            std::fs::read_to_string(&record.path).unwrap(),
            "--- a\n+++ b\n"
        );
    }

    #[tokio::test]
    async fn rejects_oversized_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactFileStore::new(dir.path(), 8);

        let result = store
            .save(
                "run1",
                ArtifactKind::Screenshot,
                "shot",
                &[0u8; 64],
                Some(json!({"url": "http://localhost"})),
            )
            .await;
        assert!(matches!(result, Err(Error::ArtifactTooLarge { .. })));
        assert!(!dir.path().join("run1").exists());
    }
}

//! Recording persistence
//!
//! Finalized containers are handed to a [`RecordingStore`]. The built-in
//! [`LibraryStore`] moves them into a library directory and writes a JSON
//! sidecar next to each one.

use super::state::RecordingMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Recording file not found: {0}")]
    MissingFile(PathBuf),
}

/// Where a saved recording ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecording {
    pub path: PathBuf,
    pub metadata_path: Option<PathBuf>,
}

#[async_trait]
pub trait RecordingStore: Send + Sync {
    async fn save(&self, file: &Path, metadata: &RecordingMetadata) -> Result<StoredRecording, StoreError>;
}

/// Directory of finished recordings
pub struct LibraryStore {
    dir: PathBuf,
}

impl LibraryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Metadata sidecars in the library, oldest first
    pub async fn list(&self) -> Result<Vec<RecordingMetadata>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut recordings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str::<RecordingMetadata>(&content) {
                    Ok(meta) => recordings.push(meta),
                    Err(e) => tracing::warn!("Skipping unreadable sidecar {:?}: {}", path, e),
                }
            }
        }
        recordings.sort_by_key(|m| m.started_at);
        Ok(recordings)
    }
}

#[async_trait]
impl RecordingStore for LibraryStore {
    async fn save(&self, file: &Path, metadata: &RecordingMetadata) -> Result<StoredRecording, StoreError> {
        if !tokio::fs::try_exists(file).await.unwrap_or(false) {
            return Err(StoreError::MissingFile(file.to_path_buf()));
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let dest = self.dir.join(&metadata.file_name);
        if dest != file {
            // Rename fails across filesystems; fall back to copy + remove
            if let Err(e) = tokio::fs::rename(file, &dest).await {
                tracing::debug!("Rename into library failed ({}), copying instead", e);
                tokio::fs::copy(file, &dest).await?;
                tokio::fs::remove_file(file).await?;
            }
        }

        let metadata_path = dest.with_extension("json");
        let json = serde_json::to_string_pretty(metadata)?;
        tokio::fs::write(&metadata_path, json).await?;

        tracing::info!("Saved recording {} to {:?}", metadata.id, dest);
        Ok(StoredRecording {
            path: dest,
            metadata_path: Some(metadata_path),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::state::SessionStats;
    use chrono::{Duration, Utc};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn metadata(file_name: &str, offset_secs: i64) -> RecordingMetadata {
        let started_at = Utc::now() + Duration::seconds(offset_secs);
        RecordingMetadata {
            id: Uuid::new_v4(),
            file_name: file_name.to_string(),
            started_at,
            ended_at: started_at + Duration::seconds(10),
            width: 1280,
            height: 720,
            fps: 30,
            audio_channels: 1,
            audio_sample_rate: 44_100,
            stats: SessionStats::default(),
        }
    }

    #[tokio::test]
    async fn test_save_moves_file_and_writes_sidecar() {
        let scratch = tempdir().unwrap();
        let library = tempdir().unwrap();
        let file = scratch.path().join("drive.mp4");
        tokio::fs::write(&file, b"not really an mp4").await.unwrap();

        let store = LibraryStore::new(library.path().join("drives"));
        let meta = metadata("drive.mp4", 0);
        let stored = store.save(&file, &meta).await.unwrap();

        assert_eq!(stored.path, library.path().join("drives/drive.mp4"));
        assert!(!file.exists());
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"not really an mp4");

        let sidecar = stored.metadata_path.unwrap();
        let loaded: RecordingMetadata =
            serde_json::from_str(&std::fs::read_to_string(sidecar).unwrap()).unwrap();
        assert_eq!(loaded, meta);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let library = tempdir().unwrap();
        let store = LibraryStore::new(library.path());
        let result = store
            .save(&library.path().join("nope.mp4"), &metadata("nope.mp4", 0))
            .await;
        assert!(matches!(result, Err(StoreError::MissingFile(_))));
    }

    #[tokio::test]
    async fn test_list_returns_sidecars_in_start_order() {
        let scratch = tempdir().unwrap();
        let library = tempdir().unwrap();
        let store = LibraryStore::new(library.path());
        assert!(store.list().await.unwrap().is_empty());

        for (name, offset) in [("b.mp4", 5), ("a.mp4", -5)] {
            let file = scratch.path().join(name);
            tokio::fs::write(&file, b"x").await.unwrap();
            store.save(&file, &metadata(name, offset)).await.unwrap();
        }

        let names: Vec<_> = store.list().await.unwrap().into_iter().map(|m| m.file_name).collect();
        assert_eq!(names, vec!["a.mp4", "b.mp4"]);
    }
}

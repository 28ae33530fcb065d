//! Serialized conversation history payloads.
//!
//! Each successful generation writes a new payload under a new history id, so
//! earlier turns stay inspectable. The pointer to the latest payload lives in
//! the thread store as a [`HistoryRecord`](super::HistoryRecord).

use crate::error::{HistoryError, Result};

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read as _, Write as _};
use std::path::PathBuf;
use uuid::Uuid;

/// Blob storage for serialized session history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load_payload(&self, thread_id: Uuid, history_id: Uuid) -> Result<Vec<u8>>;

    async fn save_payload(&self, thread_id: Uuid, history_id: Uuid, payload: &[u8]) -> Result<()>;
}

/// Gzip-compressed payloads on the local filesystem:
/// `<root>/<thread_id>/<history_id>.json.gz`.
#[derive(Debug, Clone)]
pub struct FsHistoryStore {
    root: PathBuf,
}

impl FsHistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn payload_path(&self, thread_id: Uuid, history_id: Uuid) -> PathBuf {
        self.root
            .join(thread_id.to_string())
            .join(format!("{history_id}.json.gz"))
    }
}

#[async_trait]
impl HistoryStore for FsHistoryStore {
    async fn load_payload(&self, thread_id: Uuid, history_id: Uuid) -> Result<Vec<u8>> {
        let path = self.payload_path(thread_id, history_id);
        let compressed = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(HistoryError::NotFound {
                    thread_id: thread_id.to_string(),
                    history_id: history_id.to_string(),
                }
                .into());
            }
            Err(error) => return Err(HistoryError::Read(error).into()),
        };

        let mut payload = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut payload)
            .map_err(HistoryError::Read)?;
        Ok(payload)
    }

    async fn save_payload(&self, thread_id: Uuid, history_id: Uuid, payload: &[u8]) -> Result<()> {
        let path = self.payload_path(thread_id, history_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(HistoryError::Write)?;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).map_err(HistoryError::Write)?;
        let compressed = encoder.finish().map_err(HistoryError::Write)?;

        // Write-then-rename so a reader never sees a half-written payload.
        let tmp_path = path.with_extension("gz.tmp");
        tokio::fs::write(&tmp_path, compressed)
            .await
            .map_err(HistoryError::Write)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(HistoryError::Write)?;

        tracing::debug!(%thread_id, %history_id, bytes = payload.len(), "saved history payload");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn payload_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = FsHistoryStore::new(dir.path());
        let thread_id = Uuid::new_v4();
        let history_id = Uuid::now_v7();
        let payload = br#"{"version":1,"turns":[{"role":"user","text":"hi"}]}"#;

        store
            .save_payload(thread_id, history_id, payload)
            .await
            .expect("save should succeed");

        let loaded = store
            .load_payload(thread_id, history_id)
            .await
            .expect("load should succeed");
        assert_eq!(loaded, payload.to_vec());

        let on_disk = std::fs::read(
            dir.path()
                .join(thread_id.to_string())
                .join(format!("{history_id}.json.gz")),
        )
        .expect("payload file should exist");
        assert_ne!(on_disk, payload.to_vec(), "payload should be compressed");
    }

    #[tokio::test]
    async fn missing_payload_reports_not_found() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let store = FsHistoryStore::new(dir.path());

        let error = store
            .load_payload(Uuid::new_v4(), Uuid::now_v7())
            .await
            .expect_err("missing payload must fail");
        assert!(matches!(error, Error::History(HistoryError::NotFound { .. })));
    }
}

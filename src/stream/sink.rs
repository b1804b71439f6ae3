//! Destinations for parsed posts.

use super::types::PostRecord;
use crate::error::StreamError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Receives every post read from the stream.
#[async_trait]
pub trait PostSink: Send + Sync {
    async fn handle(&self, record: &PostRecord) -> Result<(), StreamError>;
}

/// Writes each post as JSON to `<dir>/<timeline>___<tid>.txt`.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// Create the output directory if needed.
    pub async fn create(dir: impl AsRef<Path>) -> Result<Self, StreamError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, record: &PostRecord) -> PathBuf {
        // Tags are free text; keep them inside the output directory.
        let timeline = record.timeline.replace(['/', '\\'], "_");
        self.dir.join(format!("{}___{}.txt", timeline, record.tid))
    }
}

#[async_trait]
impl PostSink for FileSink {
    async fn handle(&self, record: &PostRecord) -> Result<(), StreamError> {
        let path = self.path_for(record);
        let body = serde_json::to_vec(record)?;
        tokio::fs::write(&path, body).await?;

        info!(
            tid = %record.tid,
            timeline = %record.timeline,
            ticker = ?record.ticker,
            path = %path.display(),
            "Post saved"
        );
        Ok(())
    }
}

//! Disk sink: persists event records and frame images to a directory.
//!
//! Each delivery writes one JSON record plus a copy of every attached
//! frame image, then prunes the oldest files beyond the retention limit.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{Notification, Sink, SinkError};

pub struct DiskSink {
    id: String,
    directory: PathBuf,
    /// Retention limit: prune oldest files beyond this count.
    max_keep: usize,
}

impl DiskSink {
    pub fn new(id: impl Into<String>, directory: impl Into<PathBuf>, max_keep: usize) -> Self {
        Self {
            id: id.into(),
            directory: directory.into(),
            max_keep,
        }
    }

    /// Remove the oldest files beyond `max_keep`, by modification time
    /// (name as a tiebreaker so pruning is deterministic).
    async fn prune_old(&self) -> Result<usize, SinkError> {
        let mut entries: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() {
                let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                entries.push((modified, entry.path()));
            }
        }
        if entries.len() <= self.max_keep {
            return Ok(0);
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let excess = entries.len() - self.max_keep;
        let mut removed = 0;
        for (_, path) in entries.into_iter().take(excess) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), "failed to prune old file: {e}"),
            }
        }
        if removed > 0 {
            info!(sink = %self.id, removed, "pruned old detection files");
        }
        Ok(removed)
    }
}

fn record_stem(n: &Notification) -> String {
    format!(
        "{}_{}",
        n.source_id,
        n.summary.start_time.format("%Y%m%d_%H%M%S")
    )
}

#[async_trait]
impl Sink for DiskSink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let stem = record_stem(notification);

        // Copy attached frame images. A missing source image is logged and
        // skipped rather than failing the whole delivery.
        for (rank, frame) in notification.frames.iter().enumerate() {
            let src = Path::new(frame.image_ref.as_str());
            let dest = self.directory.join(format!(
                "{stem}_r{}_conf{:.2}.jpg",
                rank + 1,
                frame.confidence
            ));
            match tokio::fs::copy(src, &dest).await {
                Ok(_) => debug!(sink = %self.id, dest = %dest.display(), "frame image written"),
                Err(e) => warn!(
                    sink = %self.id,
                    src = %src.display(),
                    "could not copy frame image: {e}"
                ),
            }
        }

        // The JSON record is the delivery's success criterion.
        let record_path = self.directory.join(format!("{stem}.json"));
        let body = serde_json::to_vec_pretty(notification)
            .map_err(|e| SinkError::Rejected(format!("record serialization failed: {e}")))?;
        tokio::fs::write(&record_path, body).await?;
        info!(
            sink = %self.id,
            record = %record_path.display(),
            frames = notification.frames.len(),
            "event record written"
        );

        self.prune_old().await?;
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────

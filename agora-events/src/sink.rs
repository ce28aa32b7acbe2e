//! Line-delimited JSON file sink with time-based rotation.

use bedrock::{EventLogError, KernelEvent};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Appends events as one JSON object per line, rotating the file each hour.
///
/// File names look like `events-20260801-14.jsonl`. Appends go through a
/// buffered handle that is flushed on [`flush`](JsonlSink::flush) and on
/// rotation; the kernel flushes at shutdown.
pub struct JsonlSink {
    dir: PathBuf,
    current: Mutex<Option<(String, File)>>,
}

impl JsonlSink {
    /// A sink writing into `dir`. The directory is created lazily on the
    /// first append.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            current: Mutex::new(None),
        }
    }

    /// The file name events at `ts` belong to.
    fn file_name(ts: DateTime<Utc>) -> String {
        format!("events-{}.jsonl", ts.format("%Y%m%d-%H"))
    }

    /// Append one event.
    pub async fn append(&self, event: &KernelEvent) -> Result<(), EventLogError> {
        let line = serde_json::to_string(event)
            .map_err(|e| EventLogError::Serialization(e.to_string()))?;
        let name = Self::file_name(event.ts);

        let mut current = self.current.lock().await;
        let rotate = match current.as_ref() {
            Some((open_name, _)) => open_name != &name,
            None => true,
        };
        if rotate {
            if let Some((old_name, mut old_file)) = current.take() {
                old_file
                    .flush()
                    .await
                    .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
                tracing::debug!(from = %old_name, to = %name, "rotating event log file");
            }
            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(&name))
                .await
                .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
            *current = Some((name, file));
        }

        let (_, file) = current.as_mut().expect("file opened above");
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
        file.write_all(b"\n")
            .await
            .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Flush the current file to disk.
    pub async fn flush(&self) -> Result<(), EventLogError> {
        if let Some((_, file)) = self.current.lock().await.as_mut() {
            file.flush()
                .await
                .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
            file.sync_all()
                .await
                .map_err(|e| EventLogError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }
}

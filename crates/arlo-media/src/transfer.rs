//! Crash-safe streamed downloads and the bounded worker pool
//!
//! A body is streamed into `.<name>.<uuid>.part` beside its destination,
//! synced, then renamed into place. The final path therefore either does
//! not exist or holds a complete file, which is what makes
//! "skip if present" a sound resume rule.

use crate::errors::{Result, TransferError};
use crate::library::DownloadTask;
use crate::router::MediaFetcher;
use arlo_core::ByteStream;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What happened to one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The file was written
    Downloaded { bytes: u64 },
    /// The destination was already present
    Skipped,
}

/// Totals for a run
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Tasks written to their destination
    pub downloaded: usize,
    /// Tasks whose destination already existed
    pub skipped: usize,
    /// Destination and cause of every failed task
    pub failed: Vec<(PathBuf, TransferError)>,
}

impl TransferReport {
    /// Whether no task failed
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Download one task to its destination
pub async fn fetch(fetcher: &dyn MediaFetcher, task: &DownloadTask) -> Result<FetchOutcome> {
    let destination = &task.destination;
    if tokio::fs::try_exists(destination)
        .await
        .map_err(|e| TransferError::io(destination, e))?
    {
        return Ok(FetchOutcome::Skipped);
    }

    let stream = fetcher.fetch(task).await?;

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| TransferError::io(parent, e))?;

    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{name}.{}.part", uuid::Uuid::new_v4()));

    let written = match write_stream(stream, &temp).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %cleanup, "failed to remove partial download");
                }
            }
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&temp, destination).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(TransferError::io(destination, e));
    }
    Ok(FetchOutcome::Downloaded { bytes: written })
}

async fn write_stream(mut stream: ByteStream, temp: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(temp)
        .await
        .map_err(|e| TransferError::io(temp, e))?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(temp, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| TransferError::io(temp, e))?;
    file.sync_all().await.map_err(|e| TransferError::io(temp, e))?;
    Ok(written)
}

/// Download every task with at most `concurrency` in flight.
///
/// A failed task is recorded in the report; it never stops the others.
pub async fn run(
    fetcher: Arc<dyn MediaFetcher>,
    tasks: Vec<DownloadTask>,
    concurrency: usize,
) -> TransferReport {
    let total = tasks.len();
    info!(tasks = total, concurrency, "starting downloads");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();
    for task in tasks {
        let fetcher = fetcher.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => {
                    debug!(destination = %task.destination.display(), source = %task.source, "downloading");
                    fetch(fetcher.as_ref(), &task).await
                }
                Err(_) => Err(TransferError::routing(
                    &task.item.content_url,
                    "worker pool closed",
                )),
            };
            (task.destination, result)
        });
    }

    let mut report = TransferReport::default();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((destination, Ok(FetchOutcome::Downloaded { bytes }))) => {
                info!(destination = %destination.display(), bytes, "downloaded");
                report.downloaded += 1;
            }
            Ok((_, Ok(FetchOutcome::Skipped))) => report.skipped += 1,
            Ok((destination, Err(e))) => {
                warn!(destination = %destination.display(), error = %e, "download failed");
                report.failed.push((destination, e));
            }
            Err(e) => error!(error = %e, "download worker panicked"),
        }
    }

    info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failed.len(),
        "downloads finished"
    );
    report
}

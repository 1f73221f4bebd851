//! Chunked file upload into NXT flash
//!
//! The sequence is OPEN_WRITE, then WRITE for every chunk, then CLOSE. The
//! handle comes from the OPEN_WRITE reply; once it exists CLOSE is issued
//! exactly once, whether the writes succeeded or not.

use std::time::Duration;

use async_trait::async_trait;
use protocol::nxt::{self, Reply, Telegram};
use tracing::{debug, info, warn};

use crate::config::TransferSettings;
use crate::error::{HubError, Result, TransferStage};

/// Sends a reply-bearing telegram and returns its successful reply
///
/// Implementations fail with [`HubError::Device`] when the reply status is a
/// failure, so callers only ever see successful replies.
#[async_trait]
pub trait TelegramSender: Send + Sync {
    async fn request(&self, telegram: Telegram) -> Result<Reply>;
}

/// Upload progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub written: usize,
    pub total: usize,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        (self.written * 100 / self.total) as u8
    }
}

/// Outcome of a completed upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub filename: String,
    pub handle: u8,
    pub bytes: usize,
    pub chunks: usize,
}

/// Upload parameters
#[derive(Debug, Clone)]
pub struct ChunkedTransfer {
    chunk_size: usize,
    chunk_delay: Duration,
    progress_every: usize,
}

impl Default for ChunkedTransfer {
    fn default() -> Self {
        Self::from_settings(&TransferSettings::default())
    }
}

impl ChunkedTransfer {
    pub fn from_settings(settings: &TransferSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size.clamp(1, nxt::MAX_WRITE_CHUNK),
            chunk_delay: Duration::from_millis(settings.chunk_delay_ms),
            progress_every: settings.progress_every_bytes.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write `data` to `filename` on the brick
    pub async fn upload(
        &self,
        sender: &dyn TelegramSender,
        filename: &str,
        data: &[u8],
        progress: Option<&(dyn Fn(TransferProgress) + Send + Sync)>,
    ) -> Result<TransferSummary> {
        let total = data.len();
        let size = u32::try_from(total).map_err(|_| {
            HubError::transfer(
                TransferStage::Open,
                HubError::Unsupported(format!("{} bytes do not fit a brick file", total)),
            )
        })?;

        info!("Uploading {} ({} bytes)", filename, total);

        let reply = sender
            .request(nxt::command::open_write(filename, size))
            .await
            .map_err(|e| HubError::transfer(TransferStage::Open, e))?;
        let handle = nxt::reply::open_write_handle(&reply)
            .map_err(|e| HubError::transfer(TransferStage::Open, e.into()))?;
        debug!("Opened {} with handle {}", filename, handle);

        let written = self.write_chunks(sender, handle, data, progress).await;

        let closed = sender.request(nxt::command::close(handle)).await;

        let chunks = match written {
            Ok(chunks) => chunks,
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!("Close after failed write also failed: {}", close_err);
                }
                return Err(HubError::transfer(TransferStage::Write, e));
            }
        };
        closed.map_err(|e| HubError::transfer(TransferStage::Close, e))?;

        info!("Uploaded {} in {} chunks", filename, chunks);
        Ok(TransferSummary {
            filename: filename.to_string(),
            handle,
            bytes: total,
            chunks,
        })
    }

    async fn write_chunks(
        &self,
        sender: &dyn TelegramSender,
        handle: u8,
        data: &[u8],
        progress: Option<&(dyn Fn(TransferProgress) + Send + Sync)>,
    ) -> Result<usize> {
        let total = data.len();
        let mut written = 0;
        let mut next_log = self.progress_every;
        let mut chunks = 0;

        for chunk in data.chunks(self.chunk_size) {
            if chunks > 0 && !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }

            let reply = sender.request(nxt::command::write(handle, chunk)).await?;
            if let Ok(accepted) = nxt::reply::bytes_written(&reply)
                && usize::from(accepted) != chunk.len()
            {
                warn!(
                    "Brick accepted {} of {} bytes in chunk {}",
                    accepted,
                    chunk.len(),
                    chunks
                );
            }

            chunks += 1;
            written += chunk.len();

            if written >= next_log || written == total {
                debug!("Upload progress: {}/{} bytes", written, total);
                next_log = written + self.progress_every;
            }
            if let Some(callback) = progress {
                callback(TransferProgress { written, total });
            }
        }

        Ok(chunks)
    }
}

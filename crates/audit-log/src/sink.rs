use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::entry::AuditEntry;
use crate::writer::{AuditWriteError, AuditWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// How often pending writes are flushed to disk.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// A cheap, cloneable handle used to submit [`AuditEntry`] values into the
/// background audit-log writer.
#[derive(Clone, Debug)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Open the log at `path` and spawn the background writer task.
    ///
    /// The task writes each entry as one JSON line, flushes about once a
    /// second while there are unflushed writes, and performs a final flush
    /// when the last `AuditSink` clone is dropped. I/O errors are logged and
    /// the affected entry is skipped; the task never panics.
    pub async fn start(
        path: impl AsRef<Path>,
    ) -> Result<(Self, JoinHandle<()>), AuditWriteError> {
        let (tx, rx) = mpsc::channel::<AuditEntry>(CHANNEL_BUFFER);
        let writer = AuditWriter::new(path).await?;
        let handle = tokio::spawn(run_writer_loop(writer, rx));
        Ok((Self { tx }, handle))
    }

    /// A sink whose entries land in the returned receiver instead of a file.
    pub fn in_memory(buffer: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Send an entry, waiting for channel capacity if necessary.
    pub async fn log(&self, entry: AuditEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "audit sink closed, entry dropped"
            );
        }
    }

    /// Send an entry without waiting. Used on the message path, where a slow
    /// disk must not stall relaying; the entry is dropped if the channel is
    /// full.
    pub fn try_log(&self, entry: AuditEntry) {
        match self.tx.try_send(entry) {
            Ok(()) => {}
            Err(TrySendError::Full(entry)) => {
                tracing::warn!(event_type = ?entry.event_type, "audit sink full, entry dropped");
            }
            Err(TrySendError::Closed(entry)) => {
                tracing::warn!(event_type = ?entry.event_type, "audit sink closed, entry dropped");
            }
        }
    }
}

async fn run_writer_loop(mut writer: AuditWriter, mut rx: mpsc::Receiver<AuditEntry>) {
    let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut dirty = false;

    loop {
        tokio::select! {
            maybe_entry = rx.recv() => match maybe_entry {
                Some(entry) => match writer.write(&entry).await {
                    Ok(()) => dirty = true,
                    Err(err) => tracing::error!(%err, "failed to write audit entry"),
                },
                None => break,
            },
            _ = ticker.tick(), if dirty => {
                match writer.flush().await {
                    Ok(()) => dirty = false,
                    Err(err) => tracing::error!(%err, "periodic audit log flush failed"),
                }
            }
        }
    }

    if dirty {
        if let Err(err) = writer.flush().await {
            tracing::error!(%err, "failed to flush audit log on shutdown");
        }
    }
    tracing::debug!(written = writer.entries_written(), "audit writer shutting down");
}

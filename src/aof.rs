//! Append-only command journal for RedVault
//!
//! Every successful mutating request is appended in its wire encoding, with
//! no header, footer or checksum. The file is replayed front-to-back at
//! startup, and a background task fsyncs it on a fixed interval.

use crate::error::{RedVaultError, Result};
use crate::protocol::{parse_value, Value};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Default interval between fsync calls
pub const DEFAULT_FSYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Append-only journal file
pub struct Aof {
    file: Mutex<File>,
    path: PathBuf,
}

impl Aof {
    /// Open the journal, creating it if absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one encoded request frame
    pub async fn append(&self, frame: &Value) -> Result<()> {
        let bytes = frame.to_bytes();
        let mut file = self.file.lock().await;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Force journal contents to disk
    pub async fn sync(&self) -> Result<()> {
        let file = self.file.lock().await;
        file.sync_data()?;
        Ok(())
    }

    /// Decode every entry in the journal, in order.
    ///
    /// A truncated final entry is an error unless `load_truncated` is set, in
    /// which case the file is cut back to the last complete entry.
    pub async fn read_entries(&self, load_truncated: bool) -> Result<Vec<Value>> {
        let data = tokio::fs::read(&self.path).await?;
        let mut entries = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let parsed = parse_value(&data[offset..]).map_err(|e| {
                RedVaultError::Aof(format!("corrupt entry at byte {}: {}", offset, e))
            })?;

            match parsed {
                Some((frame @ Value::Array(_), consumed)) => {
                    entries.push(frame);
                    offset += consumed;
                }
                Some((other, _)) => {
                    return Err(RedVaultError::Aof(format!(
                        "entry at byte {} is {}, expected array",
                        offset,
                        other.kind()
                    )));
                }
                None if load_truncated => {
                    warn!(
                        path = %self.path.display(),
                        valid_bytes = offset,
                        dropped_bytes = data.len() - offset,
                        "truncating incomplete trailing AOF entry"
                    );
                    let file = self.file.lock().await;
                    file.set_len(offset as u64)?;
                    file.sync_data()?;
                    break;
                }
                None => {
                    return Err(RedVaultError::Aof(format!(
                        "truncated entry at byte {} of {}",
                        offset,
                        data.len()
                    )));
                }
            }
        }

        Ok(entries)
    }

    /// Spawn the periodic fsync task.
    ///
    /// The task holds the journal lock only while syncing and does one last
    /// sync when the shutdown signal arrives.
    pub fn spawn_fsync_task(
        self: &Arc<Self>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let aof = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = aof.sync().await {
                            error!(error = %e, "AOF fsync failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            match aof.sync().await {
                Ok(()) => debug!("final AOF fsync complete"),
                Err(e) => error!(error = %e, "final AOF fsync failed"),
            }
        })
    }
}

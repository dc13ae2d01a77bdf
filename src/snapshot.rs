//! JSON-lines persistence of the pair store
//!
//! Reloading goes through [`PairStore::store`] like any live update, so a
//! stale file can never overwrite newer in-memory state.

use eyre::{Result, WrapErr};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dex::record::{FromStorageRecord, StorageRecord, ToStorageRecord};
use crate::dex::Pair;
use crate::store::PairStore;

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every valid record. A missing file is an empty snapshot; bad
    /// lines are logged and skipped.
    pub fn load(&self) -> Result<Vec<Pair>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No snapshot at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).wrap_err_with(|| format!("failed to open {}", self.path.display()))
            }
        };

        let mut pairs = Vec::new();
        let mut skipped = 0usize;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.wrap_err_with(|| format!("failed to read {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match StorageRecord::from_json_line(&line).and_then(Pair::from_storage_record) {
                Ok(pair) => pairs.push(pair),
                Err(e) => {
                    skipped += 1;
                    warn!("Skipping snapshot line {}: {}", idx + 1, e);
                }
            }
        }
        debug!("Loaded {} pairs ({} skipped) from {}", pairs.len(), skipped, self.path.display());
        Ok(pairs)
    }

    /// Load the file and merge it into `store`. Returns the number of entries changed.
    pub fn restore_into(&self, store: &PairStore) -> Result<usize> {
        let pairs = self.load()?;
        let total = pairs.len();
        let changed = store.store_pairs(pairs);
        info!("Restored {}/{} pairs from {}", changed, total, self.path.display());
        Ok(changed)
    }

    /// Write all live pairs. The file is replaced atomically via rename.
    pub fn write(&self, store: &PairStore) -> Result<usize> {
        self.write_pairs(&store.snapshot())
    }

    pub fn write_pairs(&self, pairs: &[Arc<Pair>]) -> Result<usize> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut writer = BufWriter::new(
            File::create(&tmp).wrap_err_with(|| format!("failed to create {}", tmp.display()))?,
        );
        let mut written = 0usize;
        for pair in pairs {
            match pair.to_storage_record().to_json_line() {
                Ok(line) => {
                    writeln!(writer, "{line}")?;
                    written += 1;
                }
                Err(e) => warn!("Not persisting pair {}: {}", pair.address, e),
            }
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, &self.path)
            .wrap_err_with(|| format!("failed to move snapshot into {}", self.path.display()))?;
        Ok(written)
    }
}

/// Dump the store every `every`, and once more when shutdown fires
pub async fn run_periodic_writer(
    file: SnapshotFile,
    store: Arc<PairStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    loop {
        let stopping = tokio::select! {
            _ = ticker.tick() => false,
            _ = shutdown.changed() => true,
        };

        let file = file.clone();
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || file.write(&store)).await {
            Ok(Ok(n)) => debug!("Snapshot written: {} pairs", n),
            Ok(Err(e)) => error!("Snapshot write failed: {:#}", e),
            Err(e) => error!("Snapshot task panicked: {}", e),
        }

        if stopping {
            info!("Snapshot writer stopped");
            break;
        }
    }
}

//! Persistent trade list.
//!
//! All trades live in one CBOR file, `trades.cbor`, written atomically (write to a
//! tmp file, then rename over the original). Saves can be coalesced: [TradeStore::save_later]
//! schedules one delayed write that picks up every update made until it runs. Only the
//! state present at a write is durable, so the owner calls [TradeStore::flush] before
//! shutting down.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::{error::TradeError, model::Trade};
use crate::utill::now_secs;

const TRADES_FILE: &str = "trades.cbor";
const CORRUPTED_DIR: &str = "corrupted";

#[derive(Serialize, Deserialize, Default)]
struct TradeStoreData {
    trades: BTreeMap<String, Trade>,
}

struct StoreInner {
    path: PathBuf,
    data: Mutex<TradeStoreData>,
    save_pending: AtomicBool,
    save_delay: Duration,
}

impl StoreInner {
    fn write(&self) -> Result<(), TradeError> {
        let bytes = {
            let data = self.data.lock()?;
            serde_cbor::to_vec(&*data)?
        };
        let tmp_path = self.path.with_extension("cbor.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &self.path)?;
        log::debug!("Saved trade list to {}", self.path.display());
        Ok(())
    }
}

/// Handle to the trade list file. Clones share the same list.
#[derive(Clone)]
pub struct TradeStore {
    inner: Arc<StoreInner>,
}

impl TradeStore {
    /// Opens the trade list in `data_dir`, creating an empty one if none exists.
    ///
    /// A file that can't be decoded is moved to `data_dir/corrupted/` and an empty list
    /// is used instead.
    pub fn open(data_dir: &Path, save_delay: Duration) -> Result<Self, TradeError> {
        let path = data_dir.join(TRADES_FILE);
        let data = if path.exists() {
            let bytes = std::fs::read(&path)?;
            match serde_cbor::from_slice::<TradeStoreData>(&bytes) {
                Ok(data) => data,
                Err(e) => {
                    let backup = Self::backup_corrupted(data_dir, &path)?;
                    log::error!(
                        "Trade list {} is corrupted ({}), moved to {}",
                        path.display(),
                        e,
                        backup.display()
                    );
                    TradeStoreData::default()
                }
            }
        } else {
            TradeStoreData::default()
        };
        log::info!("Loaded {} trades from {}", data.trades.len(), path.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                data: Mutex::new(data),
                save_pending: AtomicBool::new(false),
                save_delay,
            }),
        })
    }

    fn backup_corrupted(data_dir: &Path, path: &Path) -> Result<PathBuf, TradeError> {
        let dir = data_dir.join(CORRUPTED_DIR);
        std::fs::create_dir_all(&dir)?;
        let backup = dir.join(format!("{}_{}", now_secs(), TRADES_FILE));
        std::fs::rename(path, &backup)?;
        Ok(backup)
    }

    /// Path of the trade list file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// All stored trades, ordered by id.
    pub fn trades(&self) -> Result<Vec<Trade>, TradeError> {
        Ok(self.inner.data.lock()?.trades.values().cloned().collect())
    }

    /// Replaces the stored snapshot of `trade`. Not written until the next save.
    pub fn update(&self, trade: &Trade) -> Result<(), TradeError> {
        self.inner
            .data
            .lock()?
            .trades
            .insert(trade.id().to_string(), trade.clone());
        Ok(())
    }

    /// Writes the list immediately.
    pub fn save_now(&self) -> Result<(), TradeError> {
        self.inner.save_pending.store(false, Relaxed);
        self.inner.write()
    }

    /// Schedules a delayed write. Calls made while one is pending are merged into it.
    pub fn save_later(&self) {
        if self.inner.save_pending.swap(true, Relaxed) {
            return;
        }
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("trade-store-writer".to_string())
            .spawn(move || {
                thread::sleep(inner.save_delay);
                if !inner.save_pending.swap(false, Relaxed) {
                    // Flushed in the meantime.
                    return;
                }
                if let Err(e) = inner.write() {
                    log::error!("Delayed trade list save failed: {:?}", e);
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn trade list writer, saving now: {}", e);
            if let Err(e) = self.save_now() {
                log::error!("Trade list save failed: {:?}", e);
            }
        }
    }

    /// Whether a delayed write is pending.
    pub fn is_save_pending(&self) -> bool {
        self.inner.save_pending.load(Relaxed)
    }

    /// Writes any pending changes now. Call before teardown.
    pub fn flush(&self) -> Result<(), TradeError> {
        if self.inner.save_pending.swap(false, Relaxed) {
            self.inner.write()?;
        }
        Ok(())
    }
}

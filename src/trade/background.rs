//! Background thread polling the deposit timeouts.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering::Relaxed},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::manager::TradeManager;

/// Periodically calls [TradeManager::check_timeouts] until dropped.
pub struct TimeoutWatcher {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutWatcher {
    /// Spawns the watcher thread.
    pub fn start(manager: Arc<TradeManager>, interval: Duration) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::Builder::new()
            .name("Timeout watcher".to_string())
            .spawn(move || {
                log::info!("Timeout watcher started");
                while !shutdown_clone.load(Relaxed) {
                    let expired = manager.check_timeouts(Instant::now());
                    if !expired.is_empty() {
                        log::warn!("Deposit timeouts expired for {:?}", expired);
                    }
                    thread::sleep(interval);
                }
                log::info!("Timeout watcher stopped");
            })?;

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimeoutWatcher {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

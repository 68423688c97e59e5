//! Per-document debouncing of analysis passes while the user types

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use hansei_core::config::DEFAULT_DEBOUNCE_MS;
use tokio::sync::Notify;
use tower_lsp::lsp_types::Url;
use tracing::trace;

struct Pending {
    generation: u64,
    cancel: Arc<Notify>,
}

pub struct Debouncer {
    delay_ms: AtomicU64,
    generation: AtomicU64,
    pending: Arc<DashMap<Url, Pending>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay_ms: AtomicU64::new(delay.as_millis() as u64),
            generation: AtomicU64::new(0),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Applies to tasks scheduled from now on.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }

    /// Runs `task` once `uri` has been quiet for the delay. A task already
    /// waiting for `uri` is cancelled.
    pub fn schedule<F, Fut>(&self, uri: Url, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(Notify::new());

        let previous = self.pending.insert(
            uri.clone(),
            Pending {
                generation,
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            trace!(uri = %uri, "superseding pending analysis");
            previous.cancel.notify_one();
        }

        let delay = self.delay();
        let pending = self.pending.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    pending.remove_if(&uri, |_, p| p.generation == generation);
                    task().await;
                }
                _ = cancel.notified() => {}
            }
        });
    }

    pub fn cancel(&self, uri: &Url) {
        if let Some((_, pending)) = self.pending.remove(uri) {
            pending.cancel.notify_one();
        }
    }

    pub fn is_pending(&self, uri: &Url) -> bool {
        self.pending.contains_key(uri)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

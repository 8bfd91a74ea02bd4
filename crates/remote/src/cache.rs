use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use remote_core::{ExecutionConfig, Result};
use tokio::sync::OnceCell;

type Entry = (ExecutionConfig, Arc<OnceCell<()>>);

/// Records which configurations have passed their pre-check.
///
/// Entries are matched by structural equality and never evicted. A config
/// gets its entry on first activation; the entry is only marked checked when
/// the check succeeds, so after a failure the next activation runs it again.
#[derive(Default)]
pub struct PrecheckCache {
    entries: Mutex<Vec<Entry>>,
}

impl PrecheckCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `check` unless an equal config already passed.
    ///
    /// Concurrent callers with equal configs wait for the one running the
    /// check; callers with different configs never wait on each other.
    pub async fn ensure<F, Fut>(&self, config: &ExecutionConfig, check: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let cell = self.cell(config);
        cell.get_or_try_init(check).await.map(|_| ())
    }

    /// Whether an equal config has passed its pre-check.
    pub fn is_checked(&self, config: &ExecutionConfig) -> bool {
        self.lock()
            .iter()
            .any(|(known, cell)| known == config && cell.initialized())
    }

    fn cell(&self, config: &ExecutionConfig) -> Arc<OnceCell<()>> {
        let mut entries = self.lock();
        if let Some((_, cell)) = entries.iter().find(|(known, _)| known == config) {
            return Arc::clone(cell);
        }
        let cell = Arc::new(OnceCell::new());
        entries.push((config.clone(), Arc::clone(&cell)));
        cell
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

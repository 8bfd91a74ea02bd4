use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

const CHUNK_SIZE: usize = 8192;

/// Incrementally collects a child's output pipe in a background task, so
/// whatever arrived before a kill can still be inspected.
pub(crate) struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl OutputCapture {
    /// Start reading `pipe` until EOF. A missing pipe yields empty output.
    pub(crate) fn start<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|mut pipe| {
            let buffer = Arc::clone(&buffer);
            tokio::spawn(async move {
                let mut chunk = vec![0u8; CHUNK_SIZE];
                loop {
                    let n = pipe.read(&mut chunk).await?;
                    if n == 0 {
                        return Ok(());
                    }
                    if let Some(read) = chunk.get(..n) {
                        lock(&buffer).extend_from_slice(read);
                    }
                }
            })
        });
        Self { buffer, task }
    }

    /// Wait up to `window` for EOF and return everything read. Stops reading
    /// and fails with `TimedOut` if the pipe is still open after the window.
    pub(crate) async fn finish(mut self, window: Duration) -> std::io::Result<Vec<u8>> {
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(window, &mut task).await {
                Ok(joined) => joined.map_err(std::io::Error::other)??,
                Err(_) => {
                    task.abort();
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "pipe still open",
                    ));
                }
            }
        }
        Ok(self.take())
    }

    /// Like [`finish`](Self::finish), but any failure just means nothing
    /// was salvaged.
    pub(crate) async fn drain(self, window: Duration) -> Option<Vec<u8>> {
        self.finish(window).await.ok()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.buffer))
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> std::sync::MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

//! Per-session streaming task tracking.
//!
//! At most one in-flight streaming turn per session: registering a new
//! task cancels and awaits any predecessor; an external `cancel` signals
//! the token and waits for the task to unwind.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use vox_agent::CancelToken;

struct Entry {
    cancel: CancelToken,
    /// Forwarder task handle, when the transport has one to hand over
    /// (the SSE path is driven by the response body and registers only
    /// its token).
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct StreamTaskManager {
    tasks: Mutex<HashMap<String, Entry>>,
}

impl StreamTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new streaming task for a session. A previous task for the
    /// same session is cancelled and awaited first: the new stream
    /// supersedes it.
    pub async fn register(
        &self,
        session_id: &str,
        cancel: CancelToken,
        handle: Option<JoinHandle<()>>,
    ) {
        let previous = {
            let mut tasks = self.tasks.lock().await;
            tasks.insert(session_id.to_string(), Entry { cancel, handle })
        };

        if let Some(previous) = previous {
            tracing::info!(session_id, "superseding in-flight stream");
            previous.cancel.cancel();
            if let Some(handle) = previous.handle {
                let _ = handle.await;
            }
        }
    }

    /// Cancel the tracked task for a session and await its unwind.
    /// Returns whether a task was found.
    pub async fn cancel(&self, session_id: &str) -> bool {
        let entry = self.tasks.lock().await.remove(session_id);
        match entry {
            Some(entry) => {
                tracing::info!(session_id, "cancelling stream");
                entry.cancel.cancel();
                if let Some(handle) = entry.handle {
                    let _ = handle.await;
                }
                true
            }
            None => false,
        }
    }

    /// Called on normal completion.
    pub async fn unregister(&self, session_id: &str) {
        self.tasks.lock().await.remove(session_id);
    }

    /// Remove the entry only if it still belongs to `token`. A stream
    /// that was superseded must not tear down its successor's entry.
    pub async fn unregister_matching(&self, session_id: &str, token: &CancelToken) {
        let mut tasks = self.tasks.lock().await;
        if tasks
            .get(session_id)
            .map_or(false, |e| e.cancel.same_as(token))
        {
            tasks.remove(session_id);
        }
    }

    pub async fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|e| e.handle.as_ref().map_or(true, |h| !h.is_finished()))
            .count()
    }

    /// Drop entries whose tasks already finished. Returns how many were
    /// removed.
    pub async fn cleanup_completed(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, e| e.handle.as_ref().map_or(true, |h| !h.is_finished()));
        before - tasks.len()
    }
}

//! In-process checkpointer, the fallback when no durable backend exists.

use std::collections::HashMap;

use parking_lot::RwLock;

use vox_domain::error::Result;

use crate::{Checkpoint, Checkpointer};

#[derive(Default)]
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .threads
            .read()
            .get(thread_id)
            .and_then(|cps| cps.last().cloned()))
    }

    async fn get_tuple(
        &self,
        thread_id: &str,
    ) -> Result<Option<(Checkpoint, serde_json::Value)>> {
        Ok(self
            .get(thread_id)
            .await?
            .map(|cp| (cp.clone(), cp.metadata)))
    }

    async fn put(
        &self,
        thread_id: &str,
        step: u32,
        state: String,
        metadata: serde_json::Value,
    ) -> Result<String> {
        let checkpoint = Checkpoint::new(thread_id, step, state, metadata);
        let id = checkpoint.checkpoint_id.clone();
        self.threads
            .write()
            .entry(thread_id.to_string())
            .or_default()
            .push(checkpoint);
        Ok(id)
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<&str>,
    ) -> Result<Vec<Checkpoint>> {
        let threads = self.threads.read();
        let mut checkpoints: Vec<Checkpoint> = threads
            .get(thread_id)
            .map(|cps| cps.clone())
            .unwrap_or_default();
        checkpoints.reverse(); // newest first
        if let Some(before) = before {
            checkpoints.retain(|cp| cp.checkpoint_id.as_str() < before);
        }
        if let Some(limit) = limit {
            checkpoints.truncate(limit);
        }
        Ok(checkpoints)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        self.threads.write().remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_checkpoint_wins() {
        let cp = MemoryCheckpointer::new();
        cp.put("t1", 1, "first".into(), serde_json::json!({}))
            .await
            .unwrap();
        cp.put("t1", 2, "second".into(), serde_json::json!({"step": 2}))
            .await
            .unwrap();

        let latest = cp.get("t1").await.unwrap().unwrap();
        assert_eq!(latest.state, "second");

        let (snapshot, meta) = cp.get_tuple("t1").await.unwrap().unwrap();
        assert_eq!(snapshot.state, "second");
        assert_eq!(meta["step"], 2);
    }

    #[tokio::test]
    async fn missing_thread_is_none() {
        let cp = MemoryCheckpointer::new();
        assert!(cp.get("ghost").await.unwrap().is_none());
        assert!(cp.get_tuple("ghost").await.unwrap().is_none());
        assert!(cp.list("ghost", None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first_with_limit_and_before() {
        let cp = MemoryCheckpointer::new();
        for step in 1..=4 {
            cp.put("t1", step, format!("s{step}"), serde_json::json!({}))
                .await
                .unwrap();
        }

        let all = cp.list("t1", None, None).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].state, "s4");

        let limited = cp.list("t1", Some(2), None).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].state, "s4");

        let before = cp
            .list("t1", None, Some(&all[0].checkpoint_id))
            .await
            .unwrap();
        assert!(before.iter().all(|c| c.checkpoint_id < all[0].checkpoint_id));
    }

    #[tokio::test]
    async fn delete_clears_thread() {
        let cp = MemoryCheckpointer::new();
        cp.put("t1", 1, "x".into(), serde_json::json!({}))
            .await
            .unwrap();
        cp.delete("t1").await.unwrap();
        assert!(cp.get("t1").await.unwrap().is_none());
        // Idempotent.
        cp.delete("t1").await.unwrap();
    }
}

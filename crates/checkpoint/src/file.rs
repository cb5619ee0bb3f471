//! File-backed checkpointer.
//!
//! One append-only `<thread_id>.jsonl` per thread under
//! `state_path/checkpoints`; each line is a full [`Checkpoint`]. Appends
//! keep writes cheap; reads scan the file, which stays small because a
//! thread accumulates a handful of checkpoints per turn.

use std::io::Write;
use std::path::{Path, PathBuf};

use vox_domain::error::{Error, Result};

use crate::{Checkpoint, Checkpointer};

pub struct FileCheckpointer {
    base_dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("checkpoints");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        tracing::info!(path = %base_dir.display(), "file checkpointer ready");
        Ok(Self { base_dir })
    }

    fn thread_path(&self, thread_id: &str) -> PathBuf {
        let safe: String = thread_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.base_dir.join(format!("{safe}.jsonl"))
    }

    fn read_thread(&self, thread_id: &str) -> Result<Vec<Checkpoint>> {
        let path = self.thread_path(thread_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        Ok(raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(cp) => Some(cp),
                Err(e) => {
                    tracing::warn!(thread_id, error = %e, "skipping corrupt checkpoint line");
                    None
                }
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl Checkpointer for FileCheckpointer {
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.read_thread(thread_id)?.into_iter().last())
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
        let json = serde_json::to_string(&checkpoint)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.thread_path(thread_id))
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        Ok(id)
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<&str>,
    ) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = self.read_thread(thread_id)?;
        checkpoints.reverse();
        if let Some(before) = before {
            checkpoints.retain(|cp| cp.checkpoint_id.as_str() < before);
        }
        if let Some(limit) = limit {
            checkpoints.truncate(limit);
        }
        Ok(checkpoints)
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        match std::fs::remove_file(self.thread_path(thread_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpointer::new(dir.path()).unwrap();

        cp.put("t1", 1, r#"{"v":1}"#.into(), serde_json::json!({"node": "call_llm"}))
            .await
            .unwrap();
        cp.put("t1", 2, r#"{"v":2}"#.into(), serde_json::json!({}))
            .await
            .unwrap();

        let latest = cp.get("t1").await.unwrap().unwrap();
        assert_eq!(latest.state, r#"{"v":2}"#);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cp = FileCheckpointer::new(dir.path()).unwrap();
            cp.put("t1", 1, "persisted".into(), serde_json::json!({}))
                .await
                .unwrap();
        }
        let cp = FileCheckpointer::new(dir.path()).unwrap();
        assert_eq!(cp.get("t1").await.unwrap().unwrap().state, "persisted");
    }

    #[tokio::test]
    async fn delete_then_get_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpointer::new(dir.path()).unwrap();
        cp.put("t1", 1, "x".into(), serde_json::json!({}))
            .await
            .unwrap();
        cp.delete("t1").await.unwrap();
        assert!(cp.get("t1").await.unwrap().is_none());
        cp.delete("t1").await.unwrap(); // missing file is fine
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let cp = FileCheckpointer::new(dir.path()).unwrap();
        cp.put("a", 1, "for-a".into(), serde_json::json!({}))
            .await
            .unwrap();
        cp.put("b", 1, "for-b".into(), serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(cp.get("a").await.unwrap().unwrap().state, "for-a");
        assert_eq!(cp.get("b").await.unwrap().unwrap().state, "for-b");
    }
}

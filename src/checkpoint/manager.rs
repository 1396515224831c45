//! Pluggable checkpoint persistence backend.
//!
//! Mirrors the `Device` seam in [`crate::log::device`]: a trait plus a
//! default local-filesystem implementation, so a caller embedding this
//! store can redirect checkpoint artifacts to object storage or a
//! custom backend without touching the CPR state machine itself.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// A named, opaque blob store scoped to one checkpoint token. The CPR
/// state machine writes `index.dat` / `snapshot.dat` / `info.dat` /
/// `commit.dat` style artifacts through this trait; it never inspects
/// their bytes itself beyond what it wrote.
pub trait CheckpointManager: Send + Sync {
    fn write_artifact(&self, token: &str, name: &str, bytes: &[u8]) -> Result<()>;
    fn read_artifact(&self, token: &str, name: &str) -> Result<Vec<u8>>;
    fn list_checkpoints(&self) -> Result<Vec<String>>;
    /// True once `commit.dat` (or equivalent) has been durably written
    /// for `token` — the terminal marker a `CompleteCheckpoint` caller
    /// without an active session polls instead of racing the in-memory
    /// phase directly.
    fn is_committed(&self, token: &str) -> Result<bool>;
}

pub struct LocalCheckpointManager {
    root: PathBuf,
}

impl LocalCheckpointManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_for(&self, token: &str) -> PathBuf {
        self.root.join(token)
    }
}

impl CheckpointManager for LocalCheckpointManager {
    fn write_artifact(&self, token: &str, name: &str, bytes: &[u8]) -> Result<()> {
        let dir = self.dir_for(token);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), bytes)?;
        Ok(())
    }

    fn read_artifact(&self, token: &str, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.dir_for(token).join(name))?)
    }

    fn list_checkpoints(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut tokens = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    tokens.push(name.to_string());
                }
            }
        }
        Ok(tokens)
    }

    fn is_committed(&self, token: &str) -> Result<bool> {
        Ok(self.dir_for(token).join("commit.dat").exists())
    }
}

pub fn checkpoint_dir_manager(dir: impl AsRef<Path>) -> LocalCheckpointManager {
    LocalCheckpointManager::new(dir.as_ref().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LocalCheckpointManager::new(dir.path());
        mgr.write_artifact("tok1", "info.dat", b"hello").unwrap();
        assert_eq!(mgr.read_artifact("tok1", "info.dat").unwrap(), b"hello");
    }

    #[test]
    fn is_committed_reflects_commit_file() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LocalCheckpointManager::new(dir.path());
        mgr.write_artifact("tok1", "info.dat", b"hello").unwrap();
        assert!(!mgr.is_committed("tok1").unwrap());
        mgr.write_artifact("tok1", "commit.dat", b"done").unwrap();
        assert!(mgr.is_committed("tok1").unwrap());
    }

    #[test]
    fn list_checkpoints_enumerates_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = LocalCheckpointManager::new(dir.path());
        mgr.write_artifact("tok1", "info.dat", b"a").unwrap();
        mgr.write_artifact("tok2", "info.dat", b"b").unwrap();
        let mut tokens = mgr.list_checkpoints().unwrap();
        tokens.sort();
        assert_eq!(tokens, vec!["tok1".to_string(), "tok2".to_string()]);
    }
}

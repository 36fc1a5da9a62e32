//! Durable per-account history cursor.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CursorStoreError;

/// Persists the last processed history position for each account.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// `None` when nothing has been saved for `account`.
    async fn load(&self, account: &str) -> Result<Option<u64>, CursorStoreError>;

    async fn save(&self, account: &str, position: u64) -> Result<(), CursorStoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorFile {
    history_id: u64,
}

/// One small JSON file per account under a state directory.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    state_dir: PathBuf,
}

impl FileCursorStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    /// `gmail-state.json` for the unnamed account, otherwise
    /// `gmail-state-<account>.json` with `/` → `_` and `@` → `_at_`.
    pub fn path_for(&self, account: &str) -> PathBuf {
        if account.is_empty() {
            return self.state_dir.join("gmail-state.json");
        }
        let safe = account.replace('/', "_").replace('@', "_at_");
        self.state_dir.join(format!("gmail-state-{safe}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CursorStoreError {
    CursorStoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, account: &str) -> Result<Option<u64>, CursorStoreError> {
        let path = self.path_for(account);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        let file: CursorFile = serde_json::from_slice(&data)?;
        Ok(Some(file.history_id))
    }

    async fn save(&self, account: &str, position: u64) -> Result<(), CursorStoreError> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| io_error(&self.state_dir, e))?;

        let path = self.path_for(account);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec(&CursorFile { history_id: position })?;

        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(account, position, path = %path.display(), "Saved cursor");
        Ok(())
    }
}

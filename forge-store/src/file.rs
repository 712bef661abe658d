//! File-backed store writing newline-delimited JSON entries.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use forge_primitives::ToolId;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::record::{
    GeneratedTool, GeneratedToolPatch, LogFilter, NewGeneratedTool, ToolCreationLog, ToolStatus,
};
use crate::state::StoreState;
use crate::store::ToolStore;

/// One line of the store file. Tool entries are full snapshots; the last one
/// for an id wins on replay.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
enum Entry {
    Tool(GeneratedTool),
    Log(ToolCreationLog),
}

struct Inner {
    state: StoreState,
    file: File,
}

/// Durable [`ToolStore`] persisted as an append-only JSON lines file.
///
/// The whole file is replayed into memory on [`FileStore::open`]; reads are
/// served from memory. A mutation reaches memory only after its line has been
/// written, so a failed write leaves both unchanged.
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish_non_exhaustive()
    }
}

impl FileStore {
    /// Opens (or creates) a store file at the provided path.
    ///
    /// # Errors
    ///
    /// Propagates I/O errors and returns [`StoreError::Corrupt`] when a line
    /// other than an unterminated final one cannot be parsed.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        let (state, truncate_to) = replay(&data)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if let Some(len) = truncate_to {
            file.set_len(len).await?;
        } else if !data.is_empty() && !data.ends_with(b"\n") {
            file.write_u8(b'\n').await?;
            file.flush().await?;
        }

        debug!(path = %path.display(), "tool store opened");
        Ok(Self {
            path,
            inner: Mutex::new(Inner { state, file }),
        })
    }

    /// Returns the underlying path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the file with one snapshot per tool followed by every log row.
    ///
    /// # Errors
    ///
    /// Propagates I/O and serialization errors; the previous file is kept
    /// when the rewrite fails.
    pub async fn compact(&self) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let mut buf = Vec::new();
        let mut tools: Vec<_> = guard.state.tools().cloned().collect();
        tools.sort_by_key(|tool| tool.created_at);
        for tool in tools {
            push_line(&mut buf, &Entry::Tool(tool))?;
        }
        for row in guard.state.all_logs() {
            push_line(&mut buf, &Entry::Log(row.clone()))?;
        }

        let tmp = self.path.with_extension("compact");
        fs::write(&tmp, &buf).await?;
        fs::rename(&tmp, &self.path).await?;
        guard.file = OpenOptions::new().append(true).open(&self.path).await?;
        debug!(path = %self.path.display(), bytes = buf.len(), "tool store compacted");
        Ok(())
    }

    /// Writes one line. On failure the file is cut back to its previous
    /// length so a partial line cannot corrupt later entries.
    async fn append(file: &mut File, entry: &Entry) -> StoreResult<()> {
        let mut line = Vec::new();
        push_line(&mut line, entry)?;
        let len = file.metadata().await?.len();
        let written = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;
        if let Err(err) = written {
            if let Err(truncate) = file.set_len(len).await {
                warn!(%err, %truncate, "could not roll back partial store entry");
            }
            return Err(err.into());
        }
        Ok(())
    }
}

fn push_line(buf: &mut Vec<u8>, entry: &Entry) -> StoreResult<()> {
    serde_json::to_writer(&mut *buf, entry)?;
    buf.push(b'\n');
    Ok(())
}

/// Rebuilds the tables. The second element is the length to truncate the
/// file to when an unterminated final line had to be dropped.
fn replay(data: &[u8]) -> StoreResult<(StoreState, Option<u64>)> {
    let mut state = StoreState::default();
    let mut truncate_to = None;
    let terminated = data.ends_with(b"\n");
    let lines: Vec<_> = data.split(|byte| *byte == b'\n').collect();
    let last = lines.len().saturating_sub(1);

    for (index, chunk) in lines.iter().enumerate() {
        if chunk.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Entry>(chunk) {
            Ok(Entry::Tool(tool)) => state.upsert(tool),
            Ok(Entry::Log(row)) => state.replay_log(row),
            Err(err) if index == last && !terminated => {
                warn!(line = index + 1, %err, "dropping truncated trailing store entry");
                let keep = data.len() - chunk.len();
                truncate_to = Some(u64::try_from(keep).unwrap_or(u64::MAX));
            }
            Err(err) => {
                return Err(StoreError::Corrupt {
                    line: index + 1,
                    reason: err.to_string(),
                });
            }
        }
    }
    Ok((state, truncate_to))
}

#[async_trait]
impl ToolStore for FileStore {
    async fn create_generated_tool(&self, tool: NewGeneratedTool) -> StoreResult<GeneratedTool> {
        let mut guard = self.inner.lock().await;
        let Inner { state, file } = &mut *guard;
        let record = state.prepare_create(tool, Utc::now())?;
        Self::append(file, &Entry::Tool(record.clone())).await?;
        state.upsert(record.clone());
        Ok(record)
    }

    async fn get_generated_tools(
        &self,
        status: Option<ToolStatus>,
    ) -> StoreResult<Vec<GeneratedTool>> {
        Ok(self.inner.lock().await.state.list(status))
    }

    async fn get_generated_tool_by_name(&self, name: &str) -> StoreResult<Option<GeneratedTool>> {
        Ok(self.inner.lock().await.state.by_name(name))
    }

    async fn update_generated_tool(
        &self,
        id: ToolId,
        patch: GeneratedToolPatch,
    ) -> StoreResult<GeneratedTool> {
        let mut guard = self.inner.lock().await;
        let Inner { state, file } = &mut *guard;
        let (tool, changed) = state.prepare_update(id, patch, Utc::now())?;
        if changed {
            Self::append(file, &Entry::Tool(tool.clone())).await?;
            state.upsert(tool.clone());
        }
        Ok(tool)
    }

    async fn increment_tool_usage(&self, id: ToolId) -> StoreResult<()> {
        let mut guard = self.inner.lock().await;
        let Inner { state, file } = &mut *guard;
        let tool = state.prepare_usage(id, Utc::now())?;
        Self::append(file, &Entry::Tool(tool.clone())).await?;
        state.upsert(tool);
        Ok(())
    }

    async fn log_tool_creation(&self, row: ToolCreationLog) -> StoreResult<ToolCreationLog> {
        let mut guard = self.inner.lock().await;
        let Inner { state, file } = &mut *guard;
        let row = state.stamp_log(row);
        Self::append(file, &Entry::Log(row.clone())).await?;
        state.replay_log(row.clone());
        Ok(row)
    }

    async fn get_tool_creation_logs(
        &self,
        filter: &LogFilter,
    ) -> StoreResult<Vec<ToolCreationLog>> {
        Ok(self.inner.lock().await.state.logs(filter))
    }
}

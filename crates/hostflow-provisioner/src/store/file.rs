//! JSON snapshot store
//!
//! Layout of the state directory:
//!
//! ```text
//! <state_dir>/resources.json          current snapshot
//! <state_dir>/resources.json.backup   previous snapshot
//! <state_dir>/lock.json               holder of the directory
//! ```
//!
//! An exclusive `flock` on `lock.json` is taken when the store is opened and
//! held until it is dropped, so no two processes write the same directory
//! however long the holder runs.

use super::state::{STATE_VERSION, StoreState};
use super::{ResourceStore, Result};
use crate::error::StoreError;
use crate::resource::{ManagedResource, ResourceUpdate};
use crate::task::{OutboxEntry, ProvisioningTask};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const STATE_FILE: &str = "resources.json";
const STATE_BACKUP: &str = "resources.json.backup";
const LOCK_FILE: &str = "lock.json";

pub struct FileStore {
    dir: PathBuf,
    state: Mutex<StoreState>,
    _lock: StoreLock,
}

impl FileStore {
    /// Lock `dir` and load the current snapshot
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created state directory: {}", dir.display());
        }

        let lock = StoreLock::acquire(&dir)?;
        let state = load(&dir.join(STATE_FILE)).await?;
        tracing::info!(
            dir = %dir.display(),
            resources = state.resources.len(),
            outbox = state.outbox.len(),
            "Opened file store"
        );

        Ok(Self {
            dir,
            state: Mutex::new(state),
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn save(&self, state: &StoreState) -> Result<()> {
        let path = self.dir.join(STATE_FILE);
        let backup = self.dir.join(STATE_BACKUP);
        let tmp = self.dir.join(format!("{}.tmp", STATE_FILE));

        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, content).await?;

        if path.exists() {
            fs::copy(&path, &backup).await?;
        }
        fs::rename(&tmp, &path).await?;

        tracing::debug!("Saved state with {} resources", state.resources.len());
        Ok(())
    }

    /// Apply `op` to a copy of the state, persist it, then publish it
    async fn mutate<T>(&self, op: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let value = op(&mut next)?;
        self.save(&next).await?;
        *guard = next;
        Ok(value)
    }
}

async fn load(path: &Path) -> Result<StoreState> {
    if !path.exists() {
        tracing::debug!("State file not found, starting empty");
        return Ok(StoreState::default());
    }

    let content = fs::read_to_string(path).await?;
    let state: StoreState = serde_json::from_str(&content)?;

    if state.version > STATE_VERSION {
        return Err(StoreError::Unsupported(format!(
            "state file version {} is newer than supported version {}",
            state.version, STATE_VERSION
        )));
    }

    Ok(state)
}

#[async_trait]
impl ResourceStore for FileStore {
    async fn create(
        &self,
        resource: ManagedResource,
        task: ProvisioningTask,
    ) -> Result<ManagedResource> {
        self.mutate(|state| state.create(resource, task)).await
    }

    async fn get(&self, id: &str) -> Result<ManagedResource> {
        self.state.lock().await.get(id)
    }

    async fn list(&self, tenant_id: Option<&str>) -> Result<Vec<ManagedResource>> {
        Ok(self.state.lock().await.list(tenant_id))
    }

    async fn update(
        &self,
        id: &str,
        expected_version: u64,
        update: ResourceUpdate,
    ) -> Result<ManagedResource> {
        self.mutate(|state| state.update(id, expected_version, &update, None))
            .await
    }

    async fn update_with_task(
        &self,
        id: &str,
        expected_version: u64,
        update: ResourceUpdate,
        task: ProvisioningTask,
    ) -> Result<ManagedResource> {
        self.mutate(|state| state.update(id, expected_version, &update, Some(task)))
            .await
    }

    async fn add_task(&self, task: ProvisioningTask) -> Result<()> {
        self.mutate(|state| state.add_task(task)).await
    }

    async fn outbox_pending(&self) -> Result<Vec<OutboxEntry>> {
        Ok(self.state.lock().await.outbox_pending())
    }

    async fn outbox_mark_dispatched(&self, task_id: &str) -> Result<()> {
        self.mutate(|state| state.mark_dispatched(task_id)).await
    }

    async fn outbox_complete(&self, task_id: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        if !guard.outbox.contains_key(task_id) {
            return Ok(());
        }
        let mut next = guard.clone();
        next.complete(task_id);
        self.save(&next).await?;
        *guard = next;
        Ok(())
    }

    async fn outbox_reset(&self) -> Result<usize> {
        self.mutate(|state| Ok(state.reset())).await
    }
}

/// Lock information, written for operators inspecting the directory
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Exclusive advisory lock on `lock.json`
///
/// Held through the open file handle for the lifetime of the store and
/// released by the OS when the handle closes, including on crash.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let lock_path = dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if !try_lock_exclusive(&file)? {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            let holder = match serde_json::from_str::<LockInfo>(&content) {
                Ok(info) => format!(
                    "{} (pid {}) since {}",
                    info.holder, info.pid, info.acquired_at
                ),
                Err(_) => "another process".to_string(),
            };
            return Err(StoreError::Locked(format!(
                "{} is held by {}",
                dir.display(),
                holder
            )));
        }

        let info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
        file.sync_data()?;

        tracing::debug!("Acquired state lock");
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Still locked here, so the file cannot belong to anyone else yet
        let _ = self.file.set_len(0);
    }
}

/// Non-blocking `flock(LOCK_EX)`; `false` when another handle holds it
fn try_lock_exclusive(file: &File) -> std::io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and valid for the call
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock
            || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

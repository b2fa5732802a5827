//! State file access: an exclusive lock held from load until save, and
//! atomic replacement through a uniquely named temp file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use allowance_engine::MemoryStore;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use tempfile::NamedTempFile;
use tracing::debug;

/// Advisory lock on `<state>.lock`. The sidecar is never renamed, so every
/// process contends on the same inode even while the state file is replaced.
/// Released when dropped.
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(state: &Path) -> Result<Self> {
        let path = lock_path(state);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock state file: {}", path.display()))?;
        debug!(path = %path.display(), "state lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well; this just makes it prompt.
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "state lock released");
    }
}

fn lock_path(state: &Path) -> PathBuf {
    let mut name = state
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "allowance.json".into());
    name.push(".lock");
    state.with_file_name(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

pub fn load_store(path: &Path) -> Result<MemoryStore> {
    if !path.exists() {
        debug!(path = %path.display(), "no state file; starting an empty ledger");
        return Ok(MemoryStore::new());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    MemoryStore::from_json(&raw)
        .with_context(|| format!("Failed to parse state file: {}", path.display()))
}

/// Written to a unique temp file in the same directory, then renamed over the state file.
pub fn save_store(store: &MemoryStore, path: &Path) -> Result<()> {
    let json = store.to_json()?;
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(json.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .with_context(|| format!("Failed to write temp file: {}", tmp.path().display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace state file: {}", path.display()))?;
    Ok(())
}

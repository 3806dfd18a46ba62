//! Crash-safe JSON persistence for the settings file.
//!
//! The new contents are written to a temp file in the target's directory,
//! synced, then persisted over the target with a rename. Readers see either
//! the old file or the new one, never a partial write.

use crate::{IdaLinkError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Parse the JSON file at `path`. `Ok(None)` if it does not exist.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(IdaLinkError::io_with_path(e, path)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| IdaLinkError::Json {
            message: format!("{} is not valid settings JSON: {}", path.display(), e),
            source: Some(e),
        })
}

/// Replace `path` with `data` rendered as pretty JSON, creating missing
/// parent directories.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| IdaLinkError::io_with_path(e, dir))?;

    let mut rendered = serde_json::to_vec_pretty(data)?;
    rendered.push(b'\n');

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| IdaLinkError::io_with_path(e, dir))?;
    temp.write_all(&rendered)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| IdaLinkError::io_with_path(e, temp.path()))?;

    // The temp file is removed on drop if persisting fails.
    temp.persist(path)
        .map_err(|e| IdaLinkError::io_with_path(e.error, path))?;

    debug!("Wrote {} ({} bytes)", path.display(), rendered.len());
    Ok(())
}

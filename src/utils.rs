use crate::errors::{GraftError, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Progress spinner for network waits
pub mod spinner;

/// Atomic file operations to prevent corruption during writes
pub mod atomic_file {
    use super::*;

    /// Write JSON data to a file atomically using a temporary file + rename
    pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| GraftError::config(format!("Failed to serialize data: {e}")))?;
        write_string(path, &content)
    }

    /// Write string content to a file atomically
    pub fn write_string(path: &Path, content: &str) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content)
            .map_err(|e| GraftError::config(format!("Failed to write temporary file: {e}")))?;

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(GraftError::config(format!(
                "Failed to finalize write of {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }
}

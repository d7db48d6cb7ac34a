//! Durable key -> JSON document store on the local filesystem.
//!
//! Each checkpoint name maps to `<dir>/<name>.json`. Names may contain `/`
//! to address sub-directories (e.g. `records/printful`). Saves go through a
//! temp file in the target directory that is fsynced and atomically renamed
//! over the target, so a reader never observes a half-written document.
//!
//! The store assumes a single writer per checkpoint name; concurrent runs
//! against the same directory are unsupported.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Discovery result: ordered entity list.
pub const ENTITIES: &str = "entities";
/// Written after [`ENTITIES`] once discovery finishes.
pub const DISCOVERY_COMPLETE: &str = "discovery_complete";
/// Page cursor and accumulator of an unfinished discovery.
pub const DISCOVERY_PROGRESS: &str = "discovery_progress";
/// Slugs whose collection is complete.
pub const SCRAPED_SLUGS: &str = "scraped_slugs";
/// Flattened records of every collected entity.
pub const RECORDS_COMBINED: &str = "records_combined";

/// Checkpoint name of the per-entity record file for `slug`.
///
/// The slug is percent-encoded, so distinct slugs never share a file and
/// none can escape the `records` directory.
pub fn entity_key(slug: &str) -> String {
    if slug.is_empty() {
        return "records/%".to_string();
    }
    let encoded: String = url::form_urlencoded::byte_serialize(slug.as_bytes()).collect();
    format!("records/{}", encoded.replace('*', "%2A"))
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Load a checkpoint, falling back to `default` when it is absent or unreadable.
    pub fn load<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        self.try_load(name).unwrap_or(default)
    }

    /// Load a checkpoint, `None` when it is absent or unreadable.
    ///
    /// A missing file is the normal first-run path and is not logged above
    /// `debug`. A file that exists but cannot be read or parsed is logged
    /// at `warn` and treated the same as a missing one.
    pub fn try_load<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let path = self.path_for(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No checkpoint found");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read checkpoint");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => {
                tracing::debug!(path = %path.display(), "Loaded checkpoint");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Checkpoint is not valid JSON, ignoring it"
                );
                None
            }
        }
    }

    /// Serialize `value` and durably replace the checkpoint `name`.
    pub fn save<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), AppError> {
        let path = self.path_for(name);
        let parent = path.parent().unwrap_or_else(|| Path::new("."));

        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Checkpoint(format!("Failed to create {}: {e}", parent.display()))
        })?;

        let json = serde_json::to_vec_pretty(value)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| AppError::Checkpoint(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(&json)
            .map_err(|e| AppError::Checkpoint(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| AppError::Checkpoint(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| AppError::Checkpoint(format!("Failed to sync temp file: {e}")))?;
        temp_file.persist(&path).map_err(|e| {
            AppError::Checkpoint(format!("Failed to persist {}: {e}", path.display()))
        })?;

        // Make the rename itself durable.
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }

        tracing::debug!(path = %path.display(), bytes = json.len(), "Saved checkpoint");
        Ok(())
    }

    /// Delete a checkpoint. Removing one that does not exist is not an error.
    pub fn remove(&self, name: &str) -> Result<(), AppError> {
        let path = self.path_for(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Checkpoint(format!(
                "Failed to remove {}: {e}",
                path.display()
            ))),
        }
    }
}

//! Persistence of recordings.
//!
//! Stores address recordings by a `/`-separated path relative to their root.
//! The file store backs a recording directory; the in-memory store keeps the
//! encoded text and is used by tests and by deployments that never persist.

use super::filename::EXTENSION;
use super::format::{decode, encode, FormatError};
use super::types::Recording;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on recording '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("recording '{path}' is malformed: {source}")]
    Format {
        path: String,
        #[source]
        source: FormatError,
    },

    #[error("recording has no filename")]
    NoFilename,

    #[error("recording path '{0}' escapes the recording directory")]
    InvalidPath(String),
}

/// Where recordings are read from and written to.
pub trait RecordingStore: Send + Sync {
    /// Load one recording. `Ok(None)` when nothing is stored at `path`.
    fn load(&self, path: &str) -> Result<Option<Recording>, StoreError>;

    /// Write a recording under its filename, replacing what was there.
    fn save(&self, recording: &Recording) -> Result<(), StoreError>;

    /// Every recording path at or below `dir` (`""` for all of them).
    fn list(&self, dir: &str) -> Result<BTreeSet<String>, StoreError>;

    fn exists(&self, path: &str) -> bool;
}

/// Load everything a store holds. Unreadable recordings are logged and
/// skipped.
pub fn load_all(store: &dyn RecordingStore) -> Result<Vec<Recording>, StoreError> {
    let paths = store.list("")?;
    let mut recordings = Vec::with_capacity(paths.len());
    for path in paths {
        match store.load(&path) {
            Ok(Some(recording)) => recordings.push(recording),
            Ok(None) => debug!("Recording {} vanished before it could be loaded", path),
            Err(e) => warn!("Skipping recording {}: {}", path, e),
        }
    }
    info!("Loaded {} recordings", recordings.len());
    Ok(recordings)
}

fn is_recording_path(path: &str) -> bool {
    path.rsplit_once('.')
        .is_some_and(|(_, extension)| extension == EXTENSION)
}

/// Recordings as `.recording` files below a root directory.
#[derive(Debug, Clone)]
pub struct FileRecordingStore {
    root: PathBuf,
}

impl FileRecordingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn collect(&self, dir: &Path, found: &mut BTreeSet<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.collect(&path, found)?;
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if is_recording_path(&name) {
                found.insert(name);
            }
        }
        Ok(())
    }
}

impl RecordingStore for FileRecordingStore {
    fn load(&self, path: &str) -> Result<Option<Recording>, StoreError> {
        let full = self.resolve(path)?;
        let text = match fs::read_to_string(&full) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_string(),
                    source,
                })
            }
        };
        let recording = decode(&text).map_err(|source| StoreError::Format {
            path: path.to_string(),
            source,
        })?;
        Ok(Some(recording.with_filename(path)))
    }

    fn save(&self, recording: &Recording) -> Result<(), StoreError> {
        let path = recording.filename.as_deref().ok_or(StoreError::NoFilename)?;
        let full = self.resolve(path)?;
        let io_error = |source| StoreError::Io {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(&full, encode(recording)).map_err(io_error)?;
        debug!("Saved recording {:?}", full);
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<BTreeSet<String>, StoreError> {
        let start = self.resolve(dir)?;
        let mut found = BTreeSet::new();
        match self.collect(&start, &mut found) {
            Ok(()) => Ok(found),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Recording directory {:?} does not exist, starting fresh", start);
                Ok(found)
            }
            Err(source) => Err(StoreError::Io {
                path: dir.to_string(),
                source,
            }),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|full| full.exists()).unwrap_or(false)
    }
}

/// Encoded recordings held in memory, keyed by path.
#[derive(Debug, Default)]
pub struct InMemoryRecordingStore {
    files: RwLock<BTreeMap<String, String>>,
}

impl InMemoryRecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw recording text, as if a file had been written by hand.
    pub fn put(&self, path: impl Into<String>, text: impl Into<String>) {
        self.files.write().insert(path.into(), text.into());
    }

    /// The encoded text stored at `path`.
    pub fn text(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl RecordingStore for InMemoryRecordingStore {
    fn load(&self, path: &str) -> Result<Option<Recording>, StoreError> {
        let Some(text) = self.text(path) else {
            return Ok(None);
        };
        let recording = decode(&text).map_err(|source| StoreError::Format {
            path: path.to_string(),
            source,
        })?;
        Ok(Some(recording.with_filename(path)))
    }

    fn save(&self, recording: &Recording) -> Result<(), StoreError> {
        let path = recording.filename.clone().ok_or(StoreError::NoFilename)?;
        self.files.write().insert(path, encode(recording));
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<BTreeSet<String>, StoreError> {
        let prefix = dir.trim_end_matches('/');
        Ok(self
            .files
            .read()
            .keys()
            .filter(|path| {
                prefix.is_empty()
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .filter(|path| is_recording_path(path))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.read().contains_key(path)
    }
}

//! Resolution of source identifiers to program text.

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Turns the source identifier passed to `submit` into kernel source text.
pub trait SourceLoader: Send + Sync {
    fn load(&self, source_id: &str) -> Result<String>;
}

impl<F> SourceLoader for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn load(&self, source_id: &str) -> Result<String> {
        self(source_id)
    }
}

/// Reads source files from disk. Identifiers are paths, resolved against
/// `root` when one is set.
#[derive(Debug, Clone, Default)]
pub struct FsSourceLoader {
    root: Option<PathBuf>,
}

impl FsSourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, source_id: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(source_id),
            None => PathBuf::from(source_id),
        }
    }
}

impl SourceLoader for FsSourceLoader {
    fn load(&self, source_id: &str) -> Result<String> {
        let path = self.resolve(source_id);
        std::fs::read_to_string(&path).map_err(|source| Error::Source {
            path: path.display().to_string(),
            source,
        })
    }
}

/// In-memory sources keyed by identifier. Clones share the same table.
#[derive(Clone, Default)]
pub struct MemorySource {
    sources: Arc<RwLock<HashMap<String, String>>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(source_id, text);
        self
    }

    /// Add or replace a source. Programs already built from the old text
    /// stay cached until invalidated.
    pub fn insert(&self, source_id: impl Into<String>, text: impl Into<String>) {
        self.sources.write().insert(source_id.into(), text.into());
    }

    pub fn remove(&self, source_id: &str) -> Option<String> {
        self.sources.write().remove(source_id)
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.read().contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}

impl SourceLoader for MemorySource {
    fn load(&self, source_id: &str) -> Result<String> {
        self.sources.read().get(source_id).cloned().ok_or_else(|| Error::Source {
            path: source_id.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such in-memory source"),
        })
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sources = self.sources.read();
        let mut ids: Vec<&String> = sources.keys().collect();
        ids.sort();
        f.debug_struct("MemorySource").field("sources", &ids).finish()
    }
}

//! Per-build cache of file contents keyed by module id.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;

use crate::paths::split_query;
use crate::runtime::{Runtime, RuntimeError};

/// Caches the bytes of assets and sources read during a build.
///
/// Missing files are reported and yield `None`; they are not cached, so a file
/// created later in the same build is picked up.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: RwLock<FxHashMap<String, Arc<[u8]>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &str, runtime: &dyn Runtime) -> Option<Arc<[u8]>> {
        if let Some(content) = self.entries.read().get(id) {
            return Some(content.clone());
        }

        let (path, _) = split_query(id);
        match runtime.read_file(Path::new(path)).await {
            Ok(bytes) => {
                let content: Arc<[u8]> = bytes.into();
                // Concurrent readers of the same id keep whichever insert landed first.
                let mut entries = self.entries.write();
                Some(entries.entry(id.to_string()).or_insert(content).clone())
            }
            Err(RuntimeError::FileNotFound(_)) => {
                tracing::warn!(id = %id, "File not found");
                None
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Failed to read file");
                None
            }
        }
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

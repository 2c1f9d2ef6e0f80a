//! Host bundler surface consumed by the pipeline.
//!
//! The host owns the module graph and the output bundle. The plugin only needs
//! to ask it to resolve a specifier, to register an emitted file, and to see
//! the bundle map once it has been written.

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::emit::EmittedAsset;

/// Options forwarded with a resolve request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Skip this plugin's own `resolve_id` for the request.
    pub skip_self: bool,
}

impl ResolveOptions {
    pub fn skip_self() -> Self {
        Self { skip_self: true }
    }
}

/// Capabilities the host bundler exposes to the plugin while a build runs.
#[async_trait]
pub trait HostContext: Send + Sync {
    /// Resolve `specifier` relative to `importer`, returning an absolute id.
    async fn resolve(
        &self,
        specifier: &str,
        importer: &str,
        options: ResolveOptions,
    ) -> Option<String>;

    /// Register an emitted asset with the bundle.
    fn emit_file(&self, asset: &EmittedAsset);
}

/// One entry of the written bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleEntry {
    /// A script chunk.
    Chunk { code: String },
    /// Any other emitted file.
    Asset { source: Vec<u8> },
}

impl BundleEntry {
    pub fn is_chunk(&self) -> bool {
        matches!(self, BundleEntry::Chunk { .. })
    }
}

/// The bundle map handed to `write_bundle`, keyed by output file name.
#[derive(Debug, Clone, Default)]
pub struct OutputBundle {
    entries: IndexMap<String, BundleEntry>,
}

impl OutputBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: BundleEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&BundleEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut BundleEntry> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Output names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_preserves_order() {
        let mut bundle = OutputBundle::new();
        bundle.insert("index.js", BundleEntry::Chunk { code: String::new() });
        bundle.insert("style.css", BundleEntry::Asset { source: vec![] });
        bundle.insert("assets/a.png", BundleEntry::Asset { source: vec![1] });

        let names: Vec<_> = bundle.names().collect();
        assert_eq!(names, ["index.js", "style.css", "assets/a.png"]);
        assert!(bundle.get("index.js").unwrap().is_chunk());
        assert!(!bundle.contains("missing.js"));
    }
}

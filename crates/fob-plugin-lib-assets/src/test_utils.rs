//! In-memory host for driving the plugin in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::Path;

use crate::emit::EmittedAsset;
use crate::host::{BundleEntry, HostContext, OutputBundle, ResolveOptions};

/// Host double that resolves from a fixed table and records emissions.
#[derive(Debug, Default)]
pub struct MemoryHost {
    resolutions: FxHashMap<String, String>,
    requests: Mutex<Vec<(String, String, ResolveOptions)>>,
    emitted: Mutex<Vec<EmittedAsset>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `specifier` to `id` regardless of the importer.
    pub fn with_resolution(mut self, specifier: impl Into<String>, id: impl Into<String>) -> Self {
        self.resolutions.insert(specifier.into(), id.into());
        self
    }

    /// Every resolve request as `(specifier, importer, options)`.
    pub fn resolve_requests(&self) -> Vec<(String, String, ResolveOptions)> {
        self.requests.lock().clone()
    }

    /// Assets emitted so far, in emission order.
    pub fn emitted(&self) -> Vec<EmittedAsset> {
        self.emitted.lock().clone()
    }

    pub fn emitted_names(&self) -> Vec<String> {
        self.emitted.lock().iter().map(|a| a.file_name.clone()).collect()
    }

    /// Write what a bundler would have written: the given chunks plus every
    /// emitted asset, returning the bundle map.
    pub fn materialize(&self, out_dir: &Path, chunks: &[(&str, &str)]) -> std::io::Result<OutputBundle> {
        let mut bundle = OutputBundle::new();

        for (name, code) in chunks {
            let path = out_dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, code)?;
            let entry = if name.ends_with(".js") || name.ends_with(".mjs") || name.ends_with(".cjs") {
                BundleEntry::Chunk {
                    code: code.to_string(),
                }
            } else {
                BundleEntry::Asset {
                    source: code.as_bytes().to_vec(),
                }
            };
            bundle.insert(*name, entry);
        }

        for asset in self.emitted.lock().iter() {
            if bundle.contains(&asset.file_name) {
                continue;
            }
            if let Some(parent) = asset.full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&asset.full_path, &asset.source)?;
            bundle.insert(
                asset.file_name.clone(),
                BundleEntry::Asset {
                    source: asset.source.to_vec(),
                },
            );
        }

        Ok(bundle)
    }
}

#[async_trait]
impl HostContext for MemoryHost {
    async fn resolve(
        &self,
        specifier: &str,
        importer: &str,
        options: ResolveOptions,
    ) -> Option<String> {
        self.requests
            .lock()
            .push((specifier.to_string(), importer.to_string(), options));
        self.resolutions.get(specifier).cloned()
    }

    fn emit_file(&self, asset: &EmittedAsset) {
        self.emitted.lock().push(asset.clone());
    }
}

//! Stylesheet preprocessing.
//!
//! The host normally owns CSS preprocessing. [`InlineImportPreprocessor`] is
//! the built-in fallback: it flattens relative `@import` rules into a single
//! stylesheet and reports every file it read in the source map.

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::sync::{Arc, LazyLock};

use super::source_map::RawSourceMap;
use crate::extract::is_concerned;
use crate::paths::{importer_dir, resolve_from};
use crate::runtime::{NativeRuntime, Runtime, RuntimeError};

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"@import\s+(?:url\(\s*['"]?([^'")]+?)['"]?\s*\)|'([^']+)'|"([^"]+)")\s*([^;]*);"#,
    )
    .expect("static pattern is valid")
});

/// How the preprocessor should report its source map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceMapMode {
    #[default]
    None,
    /// Return the map next to the code.
    Separate,
    /// Append the map as a `sourceMappingURL` data URI comment.
    Inline,
}

/// Options for one preprocessing call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessOptions {
    pub source_map: SourceMapMode,
}

/// Result of preprocessing a stylesheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedStyle {
    pub code: String,
    /// Source map JSON, when returned separately.
    pub map: Option<String>,
}

/// Errors reported by a style preprocessor.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Failed to read stylesheet: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Preprocessing failed for {id}: {message}")]
    Failed { id: String, message: String },
}

/// Turns raw style text into plain CSS.
#[async_trait]
pub trait StylePreprocessor: Send + Sync + std::fmt::Debug {
    async fn preprocess(
        &self,
        code: &str,
        id: &str,
        options: PreprocessOptions,
    ) -> Result<PreprocessedStyle, PreprocessError>;
}

/// Inlines relative `@import` rules through the [`Runtime`].
///
/// Imports carrying media queries or layers, remote imports, and files that
/// cannot be read are left as written. Each file is inlined at most once.
#[derive(Debug, Clone)]
pub struct InlineImportPreprocessor {
    runtime: Arc<dyn Runtime>,
}

impl Default for InlineImportPreprocessor {
    fn default() -> Self {
        Self::new(Arc::new(NativeRuntime))
    }
}

struct Flattening {
    visited: FxHashSet<String>,
    /// `(id, content)` in post-order: imported files precede their importer.
    sources: Vec<(String, String)>,
}

impl InlineImportPreprocessor {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }

    fn flatten<'a>(
        &'a self,
        id: String,
        code: String,
        state: &'a mut Flattening,
    ) -> BoxFuture<'a, String> {
        async move {
            state.visited.insert(id.clone());
            let dir = importer_dir(&id);
            let mut out = String::with_capacity(code.len());
            let mut last = 0;

            let imports: Vec<(usize, usize, String)> = IMPORT_RE
                .captures_iter(&code)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let target = caps.get(1).or(caps.get(2)).or(caps.get(3))?;
                    let conditions = caps.get(4).map_or("", |m| m.as_str()).trim();
                    (conditions.is_empty() && is_concerned(target.as_str())).then(|| {
                        (whole.start(), whole.end(), resolve_from(&dir, target.as_str()))
                    })
                })
                .collect();

            for (start, end, import_id) in imports {
                out.push_str(&code[last..start]);
                last = end;

                if state.visited.contains(&import_id) {
                    continue;
                }

                match self.runtime.read_file(std::path::Path::new(&import_id)).await {
                    Ok(bytes) => {
                        let imported = String::from_utf8_lossy(&bytes).into_owned();
                        let inlined = self.flatten(import_id, imported, state).await;
                        out.push_str(&inlined);
                    }
                    Err(e) => {
                        tracing::warn!(file = %import_id, importer = %id, error = %e, "Failed to inline @import");
                        out.push_str(&code[start..end]);
                    }
                }
            }

            out.push_str(&code[last..]);
            state.sources.push((id, code));
            out
        }
        .boxed()
    }
}

#[async_trait]
impl StylePreprocessor for InlineImportPreprocessor {
    async fn preprocess(
        &self,
        code: &str,
        id: &str,
        options: PreprocessOptions,
    ) -> Result<PreprocessedStyle, PreprocessError> {
        let mut state = Flattening {
            visited: FxHashSet::default(),
            sources: Vec::new(),
        };
        let flattened = self
            .flatten(id.to_string(), code.to_string(), &mut state)
            .await;

        let (sources, contents): (Vec<_>, Vec<_>) = state
            .sources
            .into_iter()
            .map(|(source, content)| (source, Some(content)))
            .unzip();
        let map = RawSourceMap {
            sources,
            sources_content: contents,
            ..RawSourceMap::default()
        };

        Ok(match options.source_map {
            SourceMapMode::None => PreprocessedStyle {
                code: flattened,
                map: None,
            },
            SourceMapMode::Separate => PreprocessedStyle {
                code: flattened,
                map: Some(map.to_json()),
            },
            SourceMapMode::Inline => PreprocessedStyle {
                code: format!("{}\n{}", flattened, map.to_inline_comment()),
                map: None,
            },
        })
    }
}

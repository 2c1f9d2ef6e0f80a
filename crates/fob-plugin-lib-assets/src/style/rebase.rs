//! Source-map driven URL rebasing for flattened stylesheets.
//!
//! After `@import` rules are inlined, a `url(./icon.png)` that was written in
//! `styles/icons.css` sits inside the entry stylesheet's text but still means
//! `styles/icon.png`. The preprocessor's source map lists every file that went
//! into the flattened text; each reference found in an imported file is
//! rewritten relative to the entry's directory.

use std::path::Path;

use super::source_map::RawSourceMap;
use crate::alias::Alias;
use crate::extract::style_occurrences;
use crate::paths::{dirname_posix, relative_posix, resolve_from, split_query, to_slash};
use crate::replace::find_reference;
use crate::runtime::Runtime;

/// A single reference rewrite, applied in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub literal: String,
    pub replacement: String,
}

/// Absolute path of a map source.
///
/// Some preprocessors drop the leading slash from absolute sources
/// (`home/me/app/src/a.css` under root `/home/me/app`).
pub fn normalize_source(source: &str, module_dir: &str, root: &str) -> String {
    let root_tail = root.trim_start_matches('/');
    if !source.starts_with('/') && !root_tail.is_empty() && source.starts_with(root_tail) {
        return format!("/{}", source);
    }
    resolve_from(Path::new(module_dir), source)
}

fn is_entry(module_id: &str, source: &str) -> bool {
    let (module_path, _) = split_query(module_id);
    module_path.ends_with(source)
}

/// Compute the rewrites for every imported source that has content.
///
/// Root-absolute and aliased references are left alone: they do not depend on
/// the directory of the file they were written in.
pub fn compute_replacements(
    map: &RawSourceMap,
    module_id: &str,
    root: &str,
    aliases: &[Alias],
) -> Vec<Replacement> {
    let module_dir = dirname_posix(split_query(module_id).0);
    let mut replacements = Vec::new();

    for (index, source) in map.sources.iter().enumerate() {
        if is_entry(module_id, source) {
            continue;
        }
        let Some(content) = map.content(index) else {
            continue;
        };

        let file_path = normalize_source(source, module_dir, root);
        let file_dir = dirname_posix(&file_path);

        for candidate in style_occurrences(content, &file_path) {
            let literal = candidate.literal;
            if literal.starts_with('/') || aliases.iter().any(|a| a.matches(literal)) {
                continue;
            }
            let asset_path = resolve_from(Path::new(file_dir), literal);
            let (asset_file, query) = split_query(&asset_path);
            replacements.push(Replacement {
                literal: literal.to_string(),
                replacement: relative_posix(module_dir, asset_file) + query,
            });
        }
    }

    replacements
}

/// Apply rewrites left to right with a moving cursor.
///
/// Each replacement consumes the next bounded occurrence of its literal after
/// the previous one, so repeated literals are rewritten once per occurrence.
/// A literal that cannot be found leaves the cursor in place.
pub fn apply_replacements(code: &str, replacements: &[Replacement]) -> String {
    let mut source = code.to_string();
    let mut cursor = 0;

    for Replacement {
        literal,
        replacement,
    } in replacements
    {
        let Some(index) = find_reference(&source, literal, cursor) else {
            tracing::debug!(asset = %literal, "Rebased reference not found in flattened style");
            continue;
        };
        source.replace_range(index..index + literal.len(), replacement);
        cursor = index + replacement.len();
    }

    source
}

/// Rebase asset references in `code` using `map`.
///
/// Maps with fewer than two sources mean nothing was imported and the code is
/// returned unchanged.
pub fn rebase_style_urls(
    code: &str,
    map: &RawSourceMap,
    module_id: &str,
    root: &str,
    aliases: &[Alias],
) -> String {
    if map.sources.len() < 2 {
        return code.to_string();
    }
    let replacements = compute_replacements(map, module_id, root, aliases);
    apply_replacements(code, &replacements)
}

/// Fill missing `sourcesContent` entries from disk.
///
/// Sources that cannot be read are reported and stay empty.
pub async fn load_missing_sources(
    map: &mut RawSourceMap,
    module_id: &str,
    root: &Path,
    runtime: &dyn Runtime,
) {
    let root = to_slash(root);
    let module_dir = dirname_posix(split_query(module_id).0).to_string();
    map.sources_content.resize(map.sources.len(), None);

    for index in 0..map.sources.len() {
        if map.sources_content[index].is_some() || is_entry(module_id, &map.sources[index]) {
            continue;
        }
        let path = normalize_source(&map.sources[index], &module_dir, &root);
        match runtime.read_file(Path::new(&path)).await {
            Ok(bytes) => {
                map.sources_content[index] = Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Err(e) => {
                tracing::warn!(
                    file = %path,
                    importer = %module_id,
                    error = %e,
                    "Failed to read imported stylesheet; assets referenced from it may resolve incorrectly"
                );
            }
        }
    }
}

//! Stylesheet handling: preprocessing, source maps and URL rebasing.

pub mod preprocess;
pub mod rebase;
pub mod source_map;

pub use preprocess::{
    InlineImportPreprocessor, PreprocessError, PreprocessOptions, PreprocessedStyle,
    SourceMapMode, StylePreprocessor,
};

use std::path::Path;

use crate::alias::Alias;
use crate::paths::to_slash;
use crate::runtime::Runtime;

/// Collaborators and settings needed to normalize one stylesheet.
pub struct StyleContext<'a> {
    pub preprocessor: &'a dyn StylePreprocessor,
    pub runtime: &'a dyn Runtime,
    pub root: &'a Path,
    pub aliases: &'a [Alias],
}

/// Preprocess `code` and, when it uses `@import`, rebase references that came
/// from imported files onto `module_id`'s directory.
///
/// A missing source map is reported and the flattened code is returned without
/// rebasing.
pub async fn process_style(
    ctx: &StyleContext<'_>,
    module_id: &str,
    code: &str,
) -> Result<String, PreprocessError> {
    let needs_rebase = code.contains("@import");
    let options = PreprocessOptions {
        source_map: if needs_rebase {
            SourceMapMode::Inline
        } else {
            SourceMapMode::None
        },
    };

    let result = ctx.preprocessor.preprocess(code, module_id, options).await?;
    if !needs_rebase {
        return Ok(result.code);
    }

    let Some(mut map) = source_map::from_style(&result) else {
        tracing::warn!(
            id = %module_id,
            "Failed to obtain the source map of a stylesheet; assets referenced from @import files may be resolved incorrectly"
        );
        return Ok(source_map::strip_inline_map(&result.code).into_owned());
    };

    let code = if map.sources.len() < 2 {
        result.code
    } else {
        rebase::load_missing_sources(&mut map, module_id, ctx.root, ctx.runtime).await;
        rebase::rebase_style_urls(&result.code, &map, module_id, &to_slash(ctx.root), ctx.aliases)
    };

    Ok(source_map::strip_inline_map(&code).into_owned())
}

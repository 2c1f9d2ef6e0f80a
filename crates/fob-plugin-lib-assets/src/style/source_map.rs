//! Source maps returned by the style preprocessor.
//!
//! Only `sources` and `sourcesContent` are consumed; `mappings` is carried
//! through untouched.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::LazyLock;

use super::PreprocessedStyle;

static INLINE_MAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)/\*# sourceMappingURL=data:application/json;base64,([^*]+)\*/")
        .expect("static pattern is valid")
});

/// Version 3 source map, reduced to the fields the rebaser reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSourceMap {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub mappings: String,
}

fn default_version() -> u32 {
    3
}

impl RawSourceMap {
    /// Content recorded for `sources[index]`, if any.
    pub fn content(&self, index: usize) -> Option<&str> {
        self.sources_content.get(index).and_then(|c| c.as_deref())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `/*# sourceMappingURL=data:... */` comment carrying this map.
    pub fn to_inline_comment(&self) -> String {
        format!(
            "/*# sourceMappingURL=data:application/json;base64,{} */",
            STANDARD.encode(self.to_json())
        )
    }
}

/// The source map of a preprocessed stylesheet.
///
/// A map returned alongside the code wins; otherwise the inline
/// `sourceMappingURL` comment is decoded. Malformed maps yield `None`.
pub fn from_style(style: &PreprocessedStyle) -> Option<RawSourceMap> {
    if let Some(map) = &style.map {
        return serde_json::from_str(map).ok();
    }

    let caps = INLINE_MAP_RE.captures(&style.code)?;
    let decoded = STANDARD.decode(caps.get(1)?.as_str().trim()).ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// Remove the inline source map comment.
pub fn strip_inline_map(code: &str) -> Cow<'_, str> {
    INLINE_MAP_RE.replace(code, "")
}

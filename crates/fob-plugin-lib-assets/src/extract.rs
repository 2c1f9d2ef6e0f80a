//! Asset reference extraction.
//!
//! Two pattern families pull literal asset paths out of source text without
//! parsing it:
//!
//! - **script**: `new URL('./logo.svg', import.meta.url)`
//! - **style**: `url(./bg.png)` and `image-set("a.png" 1x, "b.png" 2x)`
//!
//! Unterminated or computed constructs simply do not match. Template literals
//! with `${...}` interpolation are skipped because the path only exists at
//! runtime.

use regex::Regex;
use rustc_hash::FxHashSet;
use std::sync::LazyLock;

static ASSET_IMPORT_META_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\bnew\s+URL\s*\(\s*('[^']+'|"[^"]+"|`[^`]+`)\s*,\s*import\.meta\.url\s*(?:,\s*)?\)"#,
    )
    .expect("static pattern is valid")
});

static CSS_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:^|[^\w\-\x{80}-\x{FFFF}])url\(\s*('[^']+'|"[^"]+"|[^'")]+?)\s*\)"#)
        .expect("static pattern is valid")
});

static CSS_IMAGE_SET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"image-set\(((?:[\w\-]{1,256}\([^)]*\)|[^)])*)\)").expect("static pattern is valid")
});

static NETWORK_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?:)?//").expect("static pattern is valid"));

/// A literal asset path found in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetCandidate<'a> {
    /// The path as written, quotes stripped.
    pub literal: &'a str,
    /// Id of the file the literal was found in.
    pub importer: &'a str,
    /// Byte offset of the literal inside the scanned text.
    pub offset: usize,
}

/// Scan `input` with `re` repeatedly across the unmatched tail, collecting
/// capture group 1 with its byte offset.
///
/// Each scan restarts on the remaining slice, so `^` anchors match at the
/// start of the tail.
pub fn captured<'t>(input: &'t str, re: &Regex) -> Vec<(usize, &'t str)> {
    let mut captures = Vec::new();
    let mut position = 0;

    while position <= input.len() {
        let Some(caps) = re.captures(&input[position..]) else {
            break;
        };
        let Some(whole) = caps.get(0) else { break };

        if let Some(group) = caps.get(1) {
            captures.push((position + group.start(), group.as_str()));
        }

        // Empty matches would never advance.
        position += whole.end().max(1);
        while position < input.len() && !input.is_char_boundary(position) {
            position += 1;
        }
    }

    captures
}

/// Data URIs and network URLs are left untouched.
pub fn is_concerned(literal: &str) -> bool {
    !literal.is_empty() && !literal.starts_with("data:") && !NETWORK_URL_RE.is_match(literal)
}

/// Cheap test used to skip script blocks that cannot contain references.
pub fn has_url_construction(code: &str) -> bool {
    code.contains("new URL") && code.contains("import.meta.url")
}

/// Strip one pair of matching quotes; anything else is returned as is.
fn strip_quotes(quoted: &str) -> &str {
    ['\'', '"', '`']
        .into_iter()
        .find_map(|quote| {
            quoted
                .strip_prefix(quote)
                .and_then(|rest| rest.strip_suffix(quote))
        })
        .unwrap_or(quoted)
}

/// Literal paths from `new URL(<literal>, import.meta.url)` expressions.
pub fn extract_script_assets<'a>(code: &'a str, importer: &'a str) -> Vec<AssetCandidate<'a>> {
    let candidates = captured(code, &ASSET_IMPORT_META_URL_RE)
        .into_iter()
        .filter(|(_, quoted)| !(quoted.starts_with('`') && quoted.contains("${")))
        .map(|(offset, quoted)| AssetCandidate {
            literal: strip_quotes(quoted),
            importer,
            offset: offset + 1,
        })
        .filter(|c| is_concerned(c.literal));

    dedup(candidates)
}

/// Literal paths from `url(...)` and `image-set(...)`, in source order.
///
/// Unlike [`extract_style_assets`] repeated literals are kept, each with its
/// own offset.
pub fn style_occurrences<'a>(code: &'a str, importer: &'a str) -> Vec<AssetCandidate<'a>> {
    let mut found: Vec<AssetCandidate<'a>> = captured(code, &CSS_URL_RE)
        .into_iter()
        .map(|(offset, raw)| {
            let literal = strip_quotes(raw);
            let shift = if literal.len() == raw.len() { 0 } else { 1 };
            AssetCandidate {
                literal,
                importer,
                offset: offset + shift,
            }
        })
        .collect();

    for (offset, list) in captured(code, &CSS_IMAGE_SET_RE) {
        found.extend(image_set_entries(list).into_iter().map(|(at, literal)| AssetCandidate {
            literal,
            importer,
            offset: offset + at,
        }));
    }

    found.retain(|c| is_concerned(c.literal));
    found.sort_by_key(|c| c.offset);
    found
}

/// Unique literal paths from style text.
pub fn extract_style_assets<'a>(code: &'a str, importer: &'a str) -> Vec<AssetCandidate<'a>> {
    dedup(style_occurrences(code, importer))
}

/// Split an `image-set()` argument list into the image paths it names.
///
/// `url(...)` entries are skipped here since the url family already reports
/// them; gradients and other functions are not paths.
fn image_set_entries(list: &str) -> Vec<(usize, &str)> {
    let mut entries = Vec::new();
    for (start, end) in split_top_level(list) {
        let raw = &list[start..end];
        let trimmed = raw.trim_start();
        let at = start + (raw.len() - trimmed.len());

        match trimmed.as_bytes().first() {
            Some(quote @ (b'\'' | b'"')) => {
                if let Some(close) = trimmed[1..].find(*quote as char) {
                    entries.push((at + 1, &trimmed[1..1 + close]));
                }
            }
            Some(_) => {
                let token = trimmed.split_whitespace().next().unwrap_or_default();
                if !token.contains('(') {
                    entries.push((at, token));
                }
            }
            None => {}
        }
    }
    entries
}

/// Byte ranges of comma separated items, ignoring commas nested in parens or quotes.
fn split_top_level(list: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut start = 0;

    for (i, byte) in list.bytes().enumerate() {
        match (quote, byte) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'\'' | b'"') => quote = Some(byte),
            (None, b'(') => depth += 1,
            (None, b')') => depth = depth.saturating_sub(1),
            (None, b',') if depth == 0 => {
                ranges.push((start, i));
                start = i + 1;
            }
            _ => {}
        }
    }
    ranges.push((start, list.len()));
    ranges
}

fn dedup<'a>(candidates: impl IntoIterator<Item = AssetCandidate<'a>>) -> Vec<AssetCandidate<'a>> {
    let mut seen = FxHashSet::default();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.literal))
        .collect()
}

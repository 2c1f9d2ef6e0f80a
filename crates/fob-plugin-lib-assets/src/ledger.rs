//! Placeholder ledger.
//!
//! In library builds the host inlines the assets it meets as data URIs. The
//! ledger remembers, for every emitted asset, the data URI the host would have
//! produced and the output path that should replace it once the bundle is
//! written.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use indexmap::IndexMap;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::LazyLock;

use crate::config::SvgInline;
use crate::paths::{clean_url, extension};
use crate::replace::replace_delimited;

static TAG_GAP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("static pattern is valid"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static pattern is valid"));

/// Maps inlined data URIs back to emitted output paths.
#[derive(Debug, Default)]
pub struct PlaceholderLedger {
    /// Public URL with trailing slash; `None` renders `./<asset>`.
    public_dir: Option<String>,
    entries: RwLock<IndexMap<String, String>>,
}

impl PlaceholderLedger {
    pub fn new(public_dir: Option<String>) -> Self {
        Self {
            public_dir,
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Record that `data_uri` stands for the asset emitted at `asset_path`.
    ///
    /// Recording the same data URI again updates its path; the newest emission
    /// wins.
    pub fn record(&self, data_uri: String, asset_path: &str) {
        let target = match &self.public_dir {
            Some(public_dir) => format!("{}{}", public_dir, asset_path),
            None => format!("./{}", asset_path),
        };
        self.entries.write().insert(data_uri, target);
    }

    /// Output reference recorded for `data_uri`.
    pub fn get(&self, data_uri: &str) -> Option<String> {
        self.entries.read().get(data_uri).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Replace every recorded data URI in `text`.
    ///
    /// Longer data URIs are substituted first, and only where the URI is
    /// wrapped in quotes or parentheses, so one entry can never rewrite part of
    /// another. Returns the new text and the number of substitutions.
    pub fn resolve_all(&self, text: &str) -> (String, usize) {
        let entries = self.entries.read();
        let mut ordered: Vec<(&String, &String)> = entries.iter().collect();
        ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        let mut current = text.to_string();
        let mut total = 0;
        for (data_uri, target) in ordered {
            if !current.contains(data_uri.as_str()) {
                continue;
            }
            let (updated, count) = replace_delimited(&current, data_uri, target);
            current = updated;
            total += count;
        }
        (current, total)
    }
}

/// Data URI the host produces when it inlines `file`.
pub fn file_data_uri(file: &str, content: &[u8], svg_inline: SvgInline) -> String {
    let file = clean_url(file);
    if svg_inline == SvgInline::Encoded && file.ends_with(".svg") {
        return svg_to_data_url(content);
    }
    format!("data:{};base64,{}", mime_type(file), STANDARD.encode(content))
}

/// URL-encoded SVG data URI.
///
/// SVGs containing text or embedded HTML fall back to base64, since rewriting
/// their quotes and whitespace is unsafe.
pub fn svg_to_data_url(content: &[u8]) -> String {
    let markup = String::from_utf8_lossy(content);
    if markup.contains("<text") || markup.contains("<foreignObject") {
        return format!("data:image/svg+xml;base64,{}", STANDARD.encode(content));
    }

    let compact = TAG_GAP_RE.replace_all(markup.trim(), "><");
    let escaped = compact
        .replace('"', "'")
        .replace('%', "%25")
        .replace('#', "%23")
        .replace('<', "%3c")
        .replace('>', "%3e");
    format!("data:image/svg+xml,{}", WHITESPACE_RE.replace_all(&escaped, "%20"))
}

/// MIME type by file extension, `application/octet-stream` when unknown.
///
/// A few extensions are pinned to the types browsers expect rather than the
/// registered ones.
pub fn mime_type(file: &str) -> &'static str {
    let Some(ext) = extension(file) else {
        return "application/octet-stream";
    };
    let ext = ext.to_ascii_lowercase();
    match ext.as_str() {
        "ico" | "cur" => "image/x-icon",
        "flac" => "audio/flac",
        "eot" => "application/vnd.ms-fontobject",
        "jxl" => "image/jxl",
        _ => mime_guess::from_ext(&ext)
            .first_raw()
            .unwrap_or("application/octet-stream"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_data_uri_rendering() {
        assert_eq!(
            file_data_uri("/a/b.png?x", &[1, 2, 3], SvgInline::Encoded),
            "data:image/png;base64,AQID"
        );
        assert_eq!(
            file_data_uri("/a/b.ico", b"i", SvgInline::Encoded),
            "data:image/x-icon;base64,aQ=="
        );
        assert_eq!(mime_type("/a/b.unknown"), "application/octet-stream");
    }

    #[test]
    fn test_mime_overrides_and_lookup() {
        assert_eq!(mime_type("/a/b.cur"), "image/x-icon");
        assert_eq!(mime_type("/a/b.ICO"), "image/x-icon");
        assert_eq!(mime_type("/a/b.flac"), "audio/flac");
        assert_eq!(mime_type("/a/b.eot"), "application/vnd.ms-fontobject");
        assert_eq!(mime_type("/a/b.jxl"), "image/jxl");
        assert_eq!(mime_type("/a/b.png"), "image/png");
        assert_eq!(mime_type("/a/b.jpeg?v=1"), "image/jpeg");
        assert_eq!(mime_type("/a/noext"), "application/octet-stream");
    }

    #[test]
    fn test_svg_encoding() {
        let svg = b"<svg xmlns=\"http://www.w3.org/2000/svg\">\n  <path fill=\"#fff\" d=\"M0 0\"/>\n</svg>\n";
        assert_eq!(
            svg_to_data_url(svg),
            "data:image/svg+xml,%3csvg%20xmlns='http://www.w3.org/2000/svg'%3e%3cpath%20fill='%23fff'%20d='M0%200'/%3e%3c/svg%3e"
        );

        let with_text = b"<svg><text>hi</text></svg>";
        assert!(svg_to_data_url(with_text).starts_with("data:image/svg+xml;base64,"));
        assert!(file_data_uri("/a.svg", svg, SvgInline::Base64).starts_with("data:image/svg+xml;base64,"));
    }

    #[test]
    fn test_resolve_all_prefixes() {
        let ledger = PlaceholderLedger::new(None);
        ledger.record("data:image/png;base64,AAAA".to_string(), "assets/a.png");
        let (out, count) = ledger.resolve_all(r#"const a = "data:image/png;base64,AAAA"; url(data:image/png;base64,AAAA)"#);
        assert_eq!(count, 2);
        assert_eq!(out, r#"const a = "./assets/a.png"; url(./assets/a.png)"#);

        let ledger = PlaceholderLedger::new(Some("https://cdn.example.com/".to_string()));
        ledger.record("data:image/png;base64,AAAA".to_string(), "assets/a.png");
        let (out, _) = ledger.resolve_all("url('data:image/png;base64,AAAA')");
        assert_eq!(out, "url('https://cdn.example.com/assets/a.png')");
    }

    #[test]
    fn test_record_is_idempotent() {
        let ledger = PlaceholderLedger::new(None);
        ledger.record("data:a".to_string(), "assets/a.png");
        ledger.record("data:a".to_string(), "assets/a.png");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get("data:a").as_deref(), Some("./assets/a.png"));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_prefix_placeholders_resolve_independently(
            payload in "[A-Za-z0-9+/]{4,40}",
            extra in "[A-Za-z0-9+/]{1,8}",
        ) {
            let short = format!("data:image/png;base64,{}", payload);
            let long = format!("{}{}", short, extra);

            let ledger = PlaceholderLedger::new(None);
            ledger.record(short.clone(), "assets/short.png");
            ledger.record(long.clone(), "assets/long.png");

            let text = format!("a(\"{}\") b(url({})) c('{}')", short, long, short);
            let (once, _) = ledger.resolve_all(&text);
            prop_assert_eq!(
                once.as_str(),
                "a(\"./assets/short.png\") b(url(./assets/long.png)) c('./assets/short.png')"
            );
            prop_assert!(!once.contains("base64"));

            let (twice, count) = ledger.resolve_all(&once);
            prop_assert_eq!(count, 0);
            prop_assert_eq!(twice, once);
        }
    }
}

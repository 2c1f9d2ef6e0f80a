//! Delimited text replacement.
//!
//! Bundle text is rewritten with plain string search, so a reference must be
//! matched together with the characters around it. `font.woff` inside
//! `'font.woff2'` is not a match: the byte after it is `2`, not a quote.

use memchr::memmem;

/// Opening/closing pairs accepted around a replaced reference.
const DELIMITERS: &[(u8, u8)] = &[(b'\'', b'\''), (b'"', b'"'), (b'`', b'`'), (b'(', b')')];

/// Replace every occurrence of `from` that is wrapped in a matching quote pair
/// or parentheses. Delimiters are kept.
///
/// Returns the new text and the number of replacements.
pub fn replace_delimited(source: &str, from: &str, to: &str) -> (String, usize) {
    if from.is_empty() {
        return (source.to_string(), 0);
    }

    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    let mut count = 0;

    for start in memmem::find_iter(bytes, from.as_bytes()) {
        if start < last {
            continue;
        }
        let end = start + from.len();
        let open = start.checked_sub(1).map(|i| bytes[i]);
        let close = bytes.get(end).copied();

        let delimited = matches!((open, close), (Some(o), Some(c)) if DELIMITERS.contains(&(o, c)));
        if !delimited {
            continue;
        }

        out.push_str(&source[last..start]);
        out.push_str(to);
        last = end;
        count += 1;
    }

    if count == 0 {
        return (source.to_string(), 0);
    }
    out.push_str(&source[last..]);
    (out, count)
}

/// Replace several references in one pass over `source`.
///
/// Every match is found in the original text, so a replacement is never
/// matched again by a later pair. At one position the longest `from` wins.
///
/// Returns the new text and the number of replacements.
pub fn replace_delimited_many<F, T>(source: &str, pairs: &[(F, T)]) -> (String, usize)
where
    F: AsRef<str>,
    T: AsRef<str>,
{
    let bytes = source.as_bytes();
    let mut hits: Vec<(usize, usize, &str)> = Vec::new();

    for (from, to) in pairs {
        let from = from.as_ref();
        if from.is_empty() {
            continue;
        }
        for start in memmem::find_iter(bytes, from.as_bytes()) {
            let end = start + from.len();
            let open = start.checked_sub(1).map(|i| bytes[i]);
            let close = bytes.get(end).copied();
            if matches!((open, close), (Some(o), Some(c)) if DELIMITERS.contains(&(o, c))) {
                hits.push((start, end, to.as_ref()));
            }
        }
    }

    if hits.is_empty() {
        return (source.to_string(), 0);
    }
    hits.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    let mut count = 0;
    for (start, end, to) in hits {
        if start < last {
            continue;
        }
        out.push_str(&source[last..start]);
        out.push_str(to);
        last = end;
        count += 1;
    }
    out.push_str(&source[last..]);
    (out, count)
}

fn is_reference_boundary(byte: Option<u8>) -> bool {
    matches!(
        byte,
        None | Some(b'\'' | b'"' | b'(' | b')' | b',' | b' ' | b'\t' | b'\n' | b'\r')
    )
}

/// Find `needle` at or after `from`, bounded by quotes, parentheses, commas or
/// whitespace on both sides.
///
/// This is the looser boundary used inside flattened stylesheets, where bare
/// `url(a.png)` and `image-set("a.png" 1x)` forms both occur.
pub fn find_reference(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    let bytes = haystack.as_bytes();

    memmem::find_iter(&bytes[from..], needle.as_bytes())
        .map(|offset| from + offset)
        .find(|&start| {
            let before = start.checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(start + needle.len()).copied();
            is_reference_boundary(before) && is_reference_boundary(after)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_delimiters() {
        let source = r#"a('./x.png') b("./x.png") c(`./x.png`) url(./x.png)"#;
        let (out, count) = replace_delimited(source, "./x.png", "../x.png");
        assert_eq!(count, 4);
        assert_eq!(
            out,
            r#"a('../x.png') b("../x.png") c(`../x.png`) url(../x.png)"#
        );
    }

    #[test]
    fn test_mismatched_delimiters_untouched() {
        let source = r#"'./x.png" (./x.png' ./x.png"#;
        let (out, count) = replace_delimited(source, "./x.png", "y");
        assert_eq!(count, 0);
        assert_eq!(out, source);
    }

    #[test]
    fn test_woff_vs_woff2() {
        let source = r#"src: url(./assets/a.woff2) format("woff2"), url(./assets/a.woff) format("woff");"#;
        let (out, count) = replace_delimited(source, "./assets/a.woff", "../assets/a.woff");
        assert_eq!(count, 1);
        assert!(out.contains("url(./assets/a.woff2)"));
        assert!(out.contains("url(../assets/a.woff)"));
    }

    #[test]
    fn test_many_matches_original_text_only() {
        let source = ".x{background:url(./assets/a.png)} .y{background:url(./b.png)}";
        let pairs = [("./assets/a.png", "./a.png"), ("./a.png", "../a.png"), ("./b.png", "../b.png")];
        let (out, count) = replace_delimited_many(source, &pairs);
        assert_eq!(count, 2);
        assert_eq!(out, ".x{background:url(./a.png)} .y{background:url(../b.png)}");
    }

    #[test]
    fn test_many_prefers_longest_at_same_position() {
        let source = r#"["./f.woff2", "./f.woff"]"#;
        let pairs = [("./f.woff", "../f.woff"), ("./f.woff2", "../f.woff2")];
        let (out, count) = replace_delimited_many(source, &pairs);
        assert_eq!(count, 2);
        assert_eq!(out, r#"["../f.woff2", "../f.woff"]"#);
    }

    #[test]
    fn test_find_reference_boundaries() {
        let css = "a{b:url(ba.png)} c{d:url(a.png)} e{f:image-set(\"a.png\" 1x)}";
        let first = find_reference(css, "a.png", 0).unwrap();
        assert_eq!(&css[first - 1..first], "(");
        assert_eq!(&css[first..first + 5], "a.png");

        let second = find_reference(css, "a.png", first + 5).unwrap();
        assert_eq!(&css[second - 1..second], "\"");
        assert_eq!(find_reference(css, "a.png", second + 5), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_prefix_reference_never_corrupts_longer(
            stem in "[a-z]{1,10}",
            dir in "[a-z]{1,6}",
            quote in prop::sample::select(vec!['\'', '"', '`']),
        ) {
            let short = format!("./{}/{}.woff", dir, stem);
            let long = format!("{}2", short);
            let source = format!(
                "a({q}{long}{q}); b(url({short})); c({q}{short}{q}); d(url({long}))",
                q = quote, long = long, short = short
            );

            let replacement = format!("../{}/{}.woff", dir, stem);
            let (out, count) = replace_delimited(&source, &short, &replacement);

            prop_assert_eq!(count, 2);
            prop_assert_eq!(out.matches(long.as_str()).count(), 2);
            let moved_long = format!("../{}/{}.woff2", dir, stem);
            prop_assert!(!out.contains(&moved_long));
        }

        #[test]
        fn prop_relative_rewrite_is_idempotent(
            name in "[a-z]{1,10}\\.(png|svg|woff|woff2)",
            depth in 1usize..4,
        ) {
            let original = format!("./assets/{}", name);
            let relative = format!("{}assets/{}", "../".repeat(depth), name);
            let source = format!("import a from '{o}'; const b = \"{o}\"; url({o})", o = original);

            let (once, first) = replace_delimited(&source, &original, &relative);
            let (twice, second) = replace_delimited(&once, &original, &relative);

            prop_assert_eq!(first, 3);
            prop_assert_eq!(second, 0);
            prop_assert_eq!(once, twice);
        }
    }
}

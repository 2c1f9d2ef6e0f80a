//! Path and id helpers.
//!
//! Module ids are strings made of an absolute path plus an optional `?query`
//! suffix. Output names inside the bundle always use forward slashes.

use path_clean::PathClean;
use std::path::{Path, PathBuf};

/// Split an id into its path and query (`?` included) parts.
pub fn split_query(id: &str) -> (&str, &str) {
    match id.find('?') {
        Some(index) => (&id[..index], &id[index..]),
        None => (id, ""),
    }
}

/// Strip `?query` and `#hash` suffixes from an id.
pub fn clean_url(id: &str) -> &str {
    match id.find(['?', '#']) {
        Some(index) => &id[..index],
        None => id,
    }
}

/// Extension of an id without the leading dot, ignoring any query.
pub fn extension(id: &str) -> Option<&str> {
    let file = clean_url(id).rsplit('/').next()?;
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() { None } else { Some(ext) }
}

/// Directory portion of an importer id.
pub fn importer_dir(importer: &str) -> PathBuf {
    Path::new(clean_url(importer))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

/// Resolve `specifier` against `dir`, keeping any query suffix intact.
///
/// Absolute specifiers are only cleaned.
pub fn resolve_from(dir: &Path, specifier: &str) -> String {
    let (path, query) = split_query(specifier);
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        dir.join(path)
    };
    format!("{}{}", to_slash(&joined.clean()), query)
}

/// Relative path from `from_dir` to `to`, both given in posix form.
///
/// Mirrors `path.posix.relative`: the result carries no `./` prefix and is
/// empty when both sides point to the same place.
pub fn relative_posix(from_dir: &str, to: &str) -> String {
    let from = normalize_posix(from_dir);
    let to = normalize_posix(to);
    let from_parts: Vec<&str> = from.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let to_parts: Vec<&str> = to.split('/').filter(|p| !p.is_empty() && *p != ".").collect();

    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::with_capacity(from_parts.len() + to_parts.len());
    parts.extend(std::iter::repeat_n("..", from_parts.len() - common));
    parts.extend(&to_parts[common..]);
    parts.join("/")
}

/// Join posix segments and normalize the result.
pub fn join_posix(base: &str, path: &str) -> String {
    if base.is_empty() || base == "." {
        return normalize_posix(path);
    }
    normalize_posix(&format!("{}/{}", base.trim_end_matches('/'), path))
}

/// Collapse `.` and `..` segments in a posix path.
pub fn normalize_posix(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Posix directory name of an output path, `"."` for top-level entries.
pub fn dirname_posix(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => ".",
    }
}

/// Render a path with forward slashes.
pub fn to_slash(path: &Path) -> String {
    let rendered = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        rendered.into_owned()
    } else {
        rendered.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

/// Append `kv` to the query string of `url`.
pub fn append_url_query(url: &str, kv: &str) -> String {
    if url.contains('?') {
        format!("{}&{}", url, kv)
    } else {
        format!("{}?{}", url, kv)
    }
}

/// Remove `kv` from the query string of `url`, dropping `?` when nothing is left.
pub fn remove_url_query(url: &str, kv: &str) -> String {
    let (path, query) = split_query(url);
    let remaining: Vec<&str> = query
        .trim_start_matches('?')
        .split('&')
        .filter(|param| !param.is_empty() && *param != kv)
        .collect();

    if remaining.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, remaining.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_clean() {
        assert_eq!(split_query("/a/b.png?inline"), ("/a/b.png", "?inline"));
        assert_eq!(split_query("/a/b.png"), ("/a/b.png", ""));
        assert_eq!(clean_url("/a/b.svg#icon"), "/a/b.svg");
        assert_eq!(extension("/a/b.min.js?x"), Some("js"));
        assert_eq!(extension("/a/.hidden"), None);
    }

    #[test]
    fn test_resolve_from_keeps_query() {
        let resolved = resolve_from(Path::new("/src/styles"), "../img/a.png?w=10");
        assert_eq!(resolved, "/src/img/a.png?w=10");
        assert_eq!(resolve_from(Path::new("/src"), "/abs/x.png"), "/abs/x.png");
    }

    #[test]
    fn test_relative_posix() {
        assert_eq!(relative_posix(".", "assets/a.png"), "assets/a.png");
        assert_eq!(relative_posix("chunks", "assets/a.png"), "../assets/a.png");
        assert_eq!(relative_posix("a/b", "a/b/c.png"), "c.png");
        assert_eq!(relative_posix("/src/styles", "/src/img/a.png"), "../img/a.png");
    }

    #[test]
    fn test_normalize_and_join() {
        assert_eq!(join_posix("assets", "./a.png"), "assets/a.png");
        assert_eq!(join_posix("", "a.png"), "a.png");
        assert_eq!(normalize_posix("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_posix("../a"), "../a");
        assert_eq!(dirname_posix("assets/a.png"), "assets");
        assert_eq!(dirname_posix("index.js"), ".");
    }

    #[test]
    fn test_url_query_helpers() {
        assert_eq!(append_url_query("./data.json", "url"), "./data.json?url");
        assert_eq!(append_url_query("./data.json?raw", "url"), "./data.json?raw&url");
        assert_eq!(remove_url_query("/p/data.json?url", "url"), "/p/data.json");
        assert_eq!(remove_url_query("/p/data.json?raw&url", "url"), "/p/data.json?raw");
    }
}

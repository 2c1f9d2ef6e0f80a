//! Post-write bundle rewriting.
//!
//! Runs after the host has written the bundle. Two passes correct references
//! that could not be known while modules were resolved:
//!
//! 1. data URIs recorded in the [`PlaceholderLedger`] become output paths
//! 2. `./assets/x.png` style references are made relative to the directory
//!    the referencing chunk or stylesheet actually landed in
//!
//! Only files whose text changed are written back.

use indexmap::IndexMap;
use std::path::Path;

use crate::config::{ASSETS_IMPORTER_RE, AssetFilter};
use crate::emit::EmittedAsset;
use crate::host::{BundleEntry, OutputBundle};
use crate::ledger::PlaceholderLedger;
use crate::paths::{dirname_posix, relative_posix};
use crate::replace::replace_delimited_many;
use crate::runtime::{Runtime, RuntimeError};
use crate::{Error, Result};

/// Report of a rewrite run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Bundle files written back with new content.
    pub rewritten: Vec<String>,
    /// Cached watch-mode assets written because the host skipped them.
    pub restored: Vec<String>,
    /// Data URIs replaced with output paths.
    pub placeholders: usize,
    /// Relative references corrected.
    pub relinked: usize,
}

/// Inputs of [`rewrite_bundle`].
pub struct RewriteContext<'a> {
    pub runtime: &'a dyn Runtime,
    /// Absolute output directory.
    pub out_dir: &'a Path,
    pub ledger: &'a PlaceholderLedger,
    pub filter: &'a AssetFilter,
    /// Watch-mode cache; empty outside watch mode.
    pub cached: &'a [EmittedAsset],
}

/// Make `./<asset>` references in `text` relative to `importer`'s directory.
///
/// References are only replaced when wrapped in quotes or parentheses, so
/// `./a.woff` never matches inside `./a.woff2`. All references are matched
/// against `text` as given; a corrected reference is never corrected again.
pub fn relink_importer<'n>(
    text: &str,
    importer: &str,
    assets: impl IntoIterator<Item = &'n str>,
) -> (String, usize) {
    let importer_dir = dirname_posix(importer);

    let pairs: Vec<(String, String)> = assets
        .into_iter()
        .filter_map(|asset| {
            let relative = relative_posix(importer_dir, asset);
            let relative_asset = if relative.starts_with('.') {
                relative
            } else {
                format!("./{}", relative)
            };
            let original = format!("./{}", asset);
            (original != relative_asset && text.contains(original.as_str()))
                .then_some((original, relative_asset))
        })
        .collect();

    if pairs.is_empty() {
        return (text.to_string(), 0);
    }
    replace_delimited_many(text, &pairs)
}

/// Rewrite the written bundle in place.
pub async fn rewrite_bundle(
    ctx: &RewriteContext<'_>,
    bundle: &mut OutputBundle,
) -> Result<RewriteReport> {
    let mut report = RewriteReport::default();

    // Original text of every UTF-8 bundle file; others are opaque.
    let mut originals: IndexMap<String, String> = IndexMap::new();
    for name in bundle.names() {
        let path = ctx.out_dir.join(name);
        match ctx.runtime.read_file(&path).await {
            Ok(bytes) => {
                if let Ok(text) = String::from_utf8(bytes) {
                    originals.insert(name.to_string(), text);
                }
            }
            Err(RuntimeError::FileNotFound(_)) => {
                tracing::warn!(file = %name, "Bundle file missing from the output directory");
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Failed to read bundle file; skipping it");
            }
        }
    }

    let restored: Vec<&EmittedAsset> = ctx
        .cached
        .iter()
        .filter(|asset| !bundle.contains(&asset.file_name))
        .collect();

    let asset_names: Vec<&str> = bundle
        .names()
        .chain(restored.iter().map(|asset| asset.file_name.as_str()))
        .filter(|name| ctx.filter.matches(name))
        .collect();

    let mut updates: Vec<(String, String)> = Vec::new();
    for (name, original) in &originals {
        let (text, placeholders) = if ctx.ledger.is_empty() {
            (original.clone(), 0)
        } else {
            ctx.ledger.resolve_all(original)
        };
        report.placeholders += placeholders;

        let text = if ASSETS_IMPORTER_RE.is_match(name) {
            let (text, relinked) = relink_importer(&text, name, asset_names.iter().copied());
            report.relinked += relinked;
            text
        } else {
            text
        };

        if &text != original {
            updates.push((name.clone(), text));
        }
    }

    for (name, text) in updates {
        let path = ctx.out_dir.join(&name);
        ctx.runtime
            .write_file(&path, text.as_bytes())
            .await
            .map_err(|e| Error::WriteFailure(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(file = %name, "Rewrote bundle file");

        match bundle.get_mut(&name) {
            Some(BundleEntry::Chunk { code }) => *code = text,
            Some(BundleEntry::Asset { source }) if name.ends_with(".css") => {
                *source = text.into_bytes();
            }
            _ => {}
        }
        report.rewritten.push(name);
    }

    for asset in restored {
        if let Some(parent) = asset.full_path.parent() {
            ctx.runtime.create_dir(parent, true).await?;
        }
        ctx.runtime
            .write_file(&asset.full_path, &asset.source)
            .await
            .map_err(|e| Error::WriteFailure(format!("{}: {}", asset.full_path.display(), e)))?;
        tracing::debug!(asset = %asset.file_name, "Restored cached asset");
        report.restored.push(asset.file_name.clone());
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibAssetsOptions;
    use crate::runtime::NativeRuntime;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_relink_importer() {
        let text = r#"import a from "./assets/a.png"; const f = ["./assets/f.woff2", "./assets/f.woff"];"#;
        let (out, count) = relink_importer(
            text,
            "chunks/index.js",
            ["assets/a.png", "assets/f.woff", "assets/f.woff2"],
        );
        assert_eq!(count, 3);
        assert_eq!(
            out,
            r#"import a from "../assets/a.png"; const f = ["../assets/f.woff2", "../assets/f.woff"];"#
        );

        let (same, count) = relink_importer(text, "index.js", ["assets/a.png"]);
        assert_eq!(count, 0);
        assert_eq!(same, text);
    }

    #[test]
    fn test_relink_colliding_asset_names() {
        let text = ".x{background:url(./assets/a.png)}";
        let (out, count) = relink_importer(text, "assets/style.css", ["assets/a.png", "a.png"]);
        assert_eq!(count, 1);
        assert_eq!(out, ".x{background:url(./a.png)}");

        // The same set in the other order gives the same text.
        let (reversed, _) = relink_importer(text, "assets/style.css", ["a.png", "assets/a.png"]);
        assert_eq!(reversed, out);
    }

    fn write(dir: &Path, name: &str, content: &[u8]) {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_rewrite_bundle_passes() {
        let temp = TempDir::new().unwrap();
        let out = temp.path();
        write(out, "index.js", b"export const logo = \"data:image/png;base64,AAAA\";");
        write(out, "css/style.css", b".a{background:url(./assets/bg.png)}");
        write(out, "assets/bg.png", &[0x89, 0x50, 0xff, 0xfe]);
        write(out, "assets/logo.png", &[0xff, 0x00]);

        let mut bundle = OutputBundle::new();
        bundle.insert("index.js", BundleEntry::Chunk { code: String::new() });
        bundle.insert("css/style.css", BundleEntry::Asset { source: vec![] });
        bundle.insert("assets/bg.png", BundleEntry::Asset { source: vec![] });
        bundle.insert("assets/logo.png", BundleEntry::Asset { source: vec![] });

        let ledger = PlaceholderLedger::new(None);
        ledger.record("data:image/png;base64,AAAA".to_string(), "assets/logo.png");
        let filter = LibAssetsOptions::new().filter();
        let ctx = RewriteContext {
            runtime: &NativeRuntime,
            out_dir: out,
            ledger: &ledger,
            filter: &filter,
            cached: &[],
        };

        let report = rewrite_bundle(&ctx, &mut bundle).await.unwrap();
        assert_eq!(report.rewritten, ["index.js", "css/style.css"]);
        assert_eq!(report.placeholders, 1);
        assert_eq!(report.relinked, 1);

        let js = std::fs::read_to_string(out.join("index.js")).unwrap();
        assert_eq!(js, "export const logo = \"./assets/logo.png\";");
        let css = std::fs::read_to_string(out.join("css/style.css")).unwrap();
        assert_eq!(css, ".a{background:url(../assets/bg.png)}");
        assert_eq!(bundle.get("index.js"), Some(&BundleEntry::Chunk { code: js }));
        assert_eq!(
            bundle.get("css/style.css"),
            Some(&BundleEntry::Asset { source: css.into_bytes() })
        );

        let again = rewrite_bundle(&ctx, &mut bundle).await.unwrap();
        assert!(again.rewritten.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_bundle_file_is_skipped() {
        let temp = TempDir::new().unwrap();
        let out = temp.path();
        write(out, "lib/index.js", b"export default new URL('./assets/a.png', import.meta.url);");
        write(out, "assets/a.png", &[0xff]);
        // A directory where a chunk is expected cannot be read as a file.
        std::fs::create_dir_all(out.join("lib/broken.js")).unwrap();

        let mut bundle = OutputBundle::new();
        bundle.insert("lib/broken.js", BundleEntry::Chunk { code: String::new() });
        bundle.insert("lib/index.js", BundleEntry::Chunk { code: String::new() });
        bundle.insert("assets/a.png", BundleEntry::Asset { source: vec![] });

        let ledger = PlaceholderLedger::new(None);
        let filter = LibAssetsOptions::new().filter();
        let ctx = RewriteContext {
            runtime: &NativeRuntime,
            out_dir: out,
            ledger: &ledger,
            filter: &filter,
            cached: &[],
        };

        let report = rewrite_bundle(&ctx, &mut bundle).await.unwrap();
        assert_eq!(report.rewritten, ["lib/index.js"]);
        assert_eq!(
            std::fs::read_to_string(out.join("lib/index.js")).unwrap(),
            "export default new URL('../assets/a.png', import.meta.url);"
        );
        assert!(out.join("lib/broken.js").is_dir());
    }

    #[tokio::test]
    async fn test_restores_cached_assets() {
        let temp = TempDir::new().unwrap();
        let out = temp.path();
        write(out, "lib/index.js", b"const u = new URL(\"./assets/a.png\", import.meta.url);");

        let mut bundle = OutputBundle::new();
        bundle.insert("lib/index.js", BundleEntry::Chunk { code: String::new() });

        let cached = vec![EmittedAsset {
            source_id: "/p/src/a.png".to_string(),
            file_name: "assets/a.png".to_string(),
            full_path: out.join("assets/a.png"),
            source: Arc::from(&[0xffu8, 0xd8][..]),
        }];
        let ledger = PlaceholderLedger::new(None);
        let filter = LibAssetsOptions::new().filter();
        let ctx = RewriteContext {
            runtime: &NativeRuntime,
            out_dir: out,
            ledger: &ledger,
            filter: &filter,
            cached: &cached,
        };

        let report = rewrite_bundle(&ctx, &mut bundle).await.unwrap();
        assert_eq!(report.restored, ["assets/a.png"]);
        assert_eq!(std::fs::read(out.join("assets/a.png")).unwrap(), [0xff, 0xd8]);
        assert_eq!(
            std::fs::read_to_string(out.join("lib/index.js")).unwrap(),
            "const u = new URL(\"../assets/a.png\", import.meta.url);"
        );
    }
}

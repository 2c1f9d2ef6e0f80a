//! Single-file component support.
//!
//! Component files are split into their `<script>` and `<style>` blocks, and
//! each block is scanned on its own. Parsing goes through the
//! [`ComponentCompiler`] trait; [`SfcCompiler`] is the built-in block splitter.
//! Parsed descriptors are cached per file and modification time.

use memchr::memmem;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

use crate::extract::has_url_construction;
use crate::paths::{normalize_posix, relative_posix, to_slash};
use crate::runtime::Runtime;
use crate::{Error, Result};

/// Maximum component size accepted by [`SfcCompiler`] (10 MB).
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// One `<script>` or `<style>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfcBlock {
    pub content: String,
    /// Byte offset of `content` in the component source.
    pub offset: usize,
    pub lang: Option<String>,
    pub setup: bool,
    pub scoped: bool,
}

/// Parsed component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentDescriptor {
    /// Eight hex digits derived from the root-relative path.
    pub id: String,
    pub filename: String,
    pub script: Option<SfcBlock>,
    pub script_setup: Option<SfcBlock>,
    pub styles: Vec<SfcBlock>,
}

impl ComponentDescriptor {
    /// Script blocks that may hold `new URL(..., import.meta.url)`, setup first.
    pub fn url_scripts(&self) -> impl Iterator<Item = &SfcBlock> {
        [self.script_setup.as_ref(), self.script.as_ref()]
            .into_iter()
            .flatten()
            .filter(|block| has_url_construction(&block.content))
    }
}

/// Blocks of a component handed to the extractor.
#[derive(Debug, Default)]
pub struct SplitBlocks<'a> {
    pub styles: Vec<&'a SfcBlock>,
    pub scripts: Vec<&'a SfcBlock>,
}

/// Split a descriptor into the blocks worth scanning.
pub fn split_blocks(descriptor: &ComponentDescriptor) -> SplitBlocks<'_> {
    SplitBlocks {
        styles: descriptor.styles.iter().collect(),
        scripts: descriptor.url_scripts().collect(),
    }
}

/// Parses component files into blocks.
pub trait ComponentCompiler: Send + Sync + std::fmt::Debug {
    /// Extensions (without dot) of the component files this compiler handles.
    fn extensions(&self) -> &[&str] {
        &["vue"]
    }

    /// Parse `source`. The returned descriptor's `id` is filled in by the cache.
    fn parse(&self, filename: &str, source: &str) -> std::result::Result<ComponentDescriptor, String>;
}

/// Block splitter for `.vue` style single-file components.
///
/// Top-level `<template>` blocks are skipped as a whole, so markup inside them
/// is never mistaken for a script or style block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SfcCompiler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Template,
    Script,
    Style,
}

impl BlockKind {
    fn tag(self) -> &'static [u8] {
        match self {
            BlockKind::Template => b"template",
            BlockKind::Script => b"script",
            BlockKind::Style => b"style",
        }
    }
}

impl ComponentCompiler for SfcCompiler {
    fn parse(&self, filename: &str, source: &str) -> std::result::Result<ComponentDescriptor, String> {
        if source.len() > MAX_FILE_SIZE {
            return Err(format!(
                "file too large: {} bytes (max: {} bytes)",
                source.len(),
                MAX_FILE_SIZE
            ));
        }

        let bytes = source.as_bytes();
        let mut descriptor = ComponentDescriptor {
            filename: filename.to_string(),
            ..ComponentDescriptor::default()
        };
        let mut pointer = 0;

        while let Some((kind, start)) = find_next_block(bytes, pointer) {
            let attrs_start = start + 1 + kind.tag().len();
            let tag_end = find_closing_angle(bytes, attrs_start)
                .ok_or_else(|| format!("unclosed <{}> tag at byte {}", tag_name(kind), start))?;

            if kind == BlockKind::Template {
                pointer = find_template_end(bytes, tag_end + 1)
                    .ok_or_else(|| format!("element <template> at byte {} is missing end tag", start))?;
                continue;
            }

            let attrs = &source[attrs_start..tag_end];
            let content_start = tag_end + 1;
            let (content_end, next) = if bytes[tag_end - 1] == b'/' {
                (content_start, content_start)
            } else {
                let close = format!("</{}>", tag_name(kind));
                let end = memmem::find(&bytes[content_start..], close.as_bytes())
                    .map(|pos| content_start + pos)
                    .ok_or_else(|| {
                        format!("element <{}> at byte {} is missing end tag", tag_name(kind), start)
                    })?;
                (end, end + close.len())
            };
            pointer = next;

            let block = SfcBlock {
                content: source[content_start..content_end].to_string(),
                offset: content_start,
                lang: attribute_value(attrs, "lang").map(str::to_string),
                setup: has_attribute(attrs, "setup"),
                scoped: has_attribute(attrs, "scoped"),
            };

            match kind {
                BlockKind::Style => descriptor.styles.push(block),
                BlockKind::Script if block.setup => {
                    if descriptor.script_setup.is_some() {
                        return Err("single file component can contain only one <script setup> element".to_string());
                    }
                    descriptor.script_setup = Some(block);
                }
                BlockKind::Script => {
                    if descriptor.script.is_some() {
                        return Err("single file component can contain only one <script> element".to_string());
                    }
                    descriptor.script = Some(block);
                }
                BlockKind::Template => {}
            }
        }

        Ok(descriptor)
    }
}

fn tag_name(kind: BlockKind) -> &'static str {
    match kind {
        BlockKind::Template => "template",
        BlockKind::Script => "script",
        BlockKind::Style => "style",
    }
}

/// Earliest `<template`, `<script` or `<style` tag at or after `start`.
fn find_next_block(bytes: &[u8], start: usize) -> Option<(BlockKind, usize)> {
    let mut from = start;
    loop {
        let found = [BlockKind::Template, BlockKind::Script, BlockKind::Style]
            .into_iter()
            .filter_map(|kind| find_open_tag(bytes, from, kind.tag()).map(|pos| (kind, pos)))
            .min_by_key(|(_, pos)| *pos)?;

        // `<scripts>` or `<styled>` are not block tags.
        let after = found.1 + 1 + found.0.tag().len();
        match bytes.get(after) {
            Some(b' ' | b'\t' | b'\n' | b'\r' | b'>' | b'/') => return Some(found),
            Some(_) => from = after,
            None => return None,
        }
    }
}

fn find_open_tag(bytes: &[u8], start: usize, tag: &[u8]) -> Option<usize> {
    let mut needle = Vec::with_capacity(tag.len() + 1);
    needle.push(b'<');
    needle.extend_from_slice(tag);
    memmem::find(&bytes[start..], &needle).map(|pos| start + pos)
}

/// Finds the closing `>` of a tag, handling quoted attributes.
fn find_closing_angle(bytes: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &byte) in bytes[start..].iter().enumerate() {
        match (quote, byte) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(byte),
            (None, b'>') => return Some(start + i),
            _ => {}
        }
    }
    None
}

/// Position right after the `</template>` matching an already opened template.
fn find_template_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 1usize;
    let mut pointer = start;
    while depth > 0 {
        let close = memmem::find(&bytes[pointer..], b"</template>").map(|p| pointer + p)?;
        let open = find_open_tag(bytes, pointer, b"template").filter(|&p| p < close);
        match open {
            Some(p) => {
                depth += 1;
                pointer = p + "<template".len();
            }
            None => {
                depth -= 1;
                pointer = close + "</template>".len();
            }
        }
    }
    Some(pointer)
}

fn attribute_value<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let pattern = format!("{}=", name);
    let pos = attrs.find(&pattern)?;
    let value = attrs[pos + pattern.len()..].trim_start();
    match value.chars().next()? {
        quote @ ('"' | '\'') => {
            let end = value[1..].find(quote)?;
            Some(&value[1..=end])
        }
        _ => {
            let end = value
                .find(|c: char| c.is_whitespace() || c == '/')
                .unwrap_or(value.len());
            Some(&value[..end])
        }
    }
}

fn has_attribute(attrs: &str, name: &str) -> bool {
    attrs
        .split(|c: char| c.is_whitespace() || c == '/')
        .any(|token| token == name || token.starts_with(&format!("{}=", name)))
}

/// Eight hex digits of the sha256 of the root-relative, slash-normalized path.
pub fn descriptor_id(root: &Path, filename: &str) -> String {
    let relative = relative_posix(&to_slash(root), &normalize_posix(&filename.replace('\\', "/")));
    let digest = Sha256::digest(relative.as_bytes());
    format!("{:x}", digest)[..8].to_string()
}

#[derive(Debug)]
struct CachedDescriptor {
    mtime: Option<u64>,
    descriptor: Arc<ComponentDescriptor>,
}

/// Descriptor cache keyed by file path and modification time.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: Mutex<FxHashMap<String, CachedDescriptor>>,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the descriptor for `filename`, parsing it when it is new or its
    /// modification time changed.
    pub async fn get(
        &self,
        filename: &str,
        root: &Path,
        compiler: &dyn ComponentCompiler,
        runtime: &dyn Runtime,
    ) -> Result<Arc<ComponentDescriptor>> {
        let path = Path::new(filename);
        let mtime = runtime.metadata(path).await?.modified;

        let cached = self
            .entries
            .lock()
            .get(filename)
            .filter(|cached| cached.mtime == mtime)
            .map(|cached| cached.descriptor.clone());
        if let Some(descriptor) = cached {
            return Ok(descriptor);
        }

        let bytes = runtime.read_file(path).await?;
        let source = String::from_utf8_lossy(&bytes);
        let mut descriptor =
            compiler
                .parse(filename, &source)
                .map_err(|message| Error::ComponentParse {
                    file: filename.to_string(),
                    message,
                })?;
        descriptor.id = descriptor_id(root, filename);

        let descriptor = Arc::new(descriptor);
        tracing::debug!(file = %filename, id = %descriptor.id, "Parsed component descriptor");
        self.entries.lock().insert(
            filename.to_string(),
            CachedDescriptor {
                mtime,
                descriptor: descriptor.clone(),
            },
        );
        Ok(descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::NativeRuntime;
    use tempfile::TempDir;

    const COMPONENT: &str = r#"<template>
  <div class="logo"><template v-if="x"><style-guide /></template></div>
</template>

<script setup lang="ts">
const logo = new URL('./logo.svg', import.meta.url).href
</script>

<script>
export default { name: 'Logo' }
</script>

<style scoped lang="scss">
.logo { background: url('./bg.png'); }
</style>
<style>
.x { mask: url(./mask.svg) }
</style>
"#;

    #[test]
    fn test_sfc_blocks() {
        let descriptor = SfcCompiler.parse("/p/src/Logo.vue", COMPONENT).unwrap();

        let setup = descriptor.script_setup.as_ref().unwrap();
        assert_eq!(setup.lang.as_deref(), Some("ts"));
        assert!(setup.content.contains("./logo.svg"));
        assert_eq!(&COMPONENT[setup.offset..setup.offset + 6], "\nconst");

        assert!(descriptor.script.is_some());
        assert_eq!(descriptor.styles.len(), 2);
        assert!(descriptor.styles[0].scoped);
        assert_eq!(descriptor.styles[0].lang.as_deref(), Some("scss"));

        let split = split_blocks(&descriptor);
        assert_eq!(split.styles.len(), 2);
        assert_eq!(split.scripts.len(), 1);
        assert!(split.scripts[0].setup);
    }

    #[test]
    fn test_sfc_errors() {
        let err = SfcCompiler.parse("/a.vue", "<script>const a = 1").unwrap_err();
        assert!(err.contains("missing end tag"));

        let err = SfcCompiler
            .parse("/a.vue", "<script setup></script><script setup></script>")
            .unwrap_err();
        assert!(err.contains("<script setup>"));
    }

    #[test]
    fn test_descriptor_id() {
        let id = descriptor_id(Path::new("/p"), "/p/src/Logo.vue");
        assert_eq!(id.len(), 8);
        assert_eq!(id, descriptor_id(Path::new("/p/"), "/p/src/./Logo.vue"));
        assert_ne!(id, descriptor_id(Path::new("/p"), "/p/src/Other.vue"));
    }

    #[tokio::test]
    async fn test_cache_invalidates_on_mtime() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("A.vue");
        std::fs::write(&file, "<style>.a{}</style>").unwrap();
        let filename = to_slash(&file);

        let cache = DescriptorCache::new();
        let first = cache.get(&filename, temp.path(), &SfcCompiler, &NativeRuntime).await.unwrap();
        let again = cache.get(&filename, temp.path(), &SfcCompiler, &NativeRuntime).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(cache.len(), 1);

        std::fs::write(&file, "<style>.a{}</style><style>.b{}</style>").unwrap();
        let modified = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(modified)
            .unwrap();

        let updated = cache.get(&filename, temp.path(), &SfcCompiler, &NativeRuntime).await.unwrap();
        assert_eq!(updated.styles.len(), 2);
        assert_eq!(updated.id, first.id);
    }

    #[tokio::test]
    async fn test_parse_error_is_fatal() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("Broken.vue");
        std::fs::write(&file, "<style>.a{}").unwrap();

        let err = DescriptorCache::new()
            .get(&to_slash(&file), temp.path(), &SfcCompiler, &NativeRuntime)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ComponentParse { .. }));
    }
}

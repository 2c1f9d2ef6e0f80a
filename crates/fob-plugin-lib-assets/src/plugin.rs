//! Plugin lifecycle and the lib-assets pipeline driver.
//!
//! ```text
//! config_resolved ─► build_start ─► resolve_id* / load* / transform* ─► generate_bundle ─► write_bundle
//!                         ▲                                                                     │
//!                         └──────────────── watch_change (watch mode) ◄─────────────────────────┘
//! ```
//!
//! The host owns the driver loop and calls one method per phase. All hooks are
//! inert unless the host build is a library build.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::alias::{Alias, resolve_candidates};
use crate::component::{ComponentCompiler, DescriptorCache, SfcCompiler, split_blocks};
use crate::config::{
    AssetFilter, CSS_LANGS_RE, HostBuildConfig, JS_TYPES_RE, LibAssetsOptions, check_formats,
    should_process,
};
use crate::content::ContentCache;
use crate::emit::{EmissionEngine, EmitSettings};
use crate::extract::{extract_script_assets, extract_style_assets};
use crate::host::{HostContext, OutputBundle, ResolveOptions};
use crate::ledger::{PlaceholderLedger, file_data_uri};
use crate::paths::{
    append_url_query, extension, importer_dir, remove_url_query, resolve_from, split_query,
};
use crate::rewrite::{RewriteContext, RewriteReport, rewrite_bundle};
use crate::runtime::{NativeRuntime, Runtime};
use crate::style::{InlineImportPreprocessor, StyleContext, StylePreprocessor, process_style};
use crate::{Error, Result};

/// Name the plugin reports to the host.
pub const PLUGIN_NAME: &str = "fob-lib-assets";

/// Arguments of [`Plugin::resolve_id`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveIdArgs<'a> {
    pub source: &'a str,
    pub importer: Option<&'a str>,
    /// Options the request was issued with. `skip_self` is set on requests
    /// this plugin made itself.
    pub options: ResolveOptions,
}

impl<'a> ResolveIdArgs<'a> {
    pub fn new(source: &'a str, importer: Option<&'a str>) -> Self {
        Self {
            source,
            importer,
            options: ResolveOptions::default(),
        }
    }
}

/// How a resolved asset import is handed back to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveIdOutput {
    /// Keep the module under this id; `load` provides its code.
    Id(String),
    /// Treat the import as external, referenced by this relative path.
    External(String),
}

/// Build lifecycle hooks, one per phase. Every hook defaults to a no-op.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// The host configuration is final.
    fn config_resolved(&self, _config: &HostBuildConfig) -> Result<()> {
        Ok(())
    }

    async fn build_start(&self) -> Result<()> {
        Ok(())
    }

    async fn resolve_id(
        &self,
        _host: &dyn HostContext,
        _args: ResolveIdArgs<'_>,
    ) -> Result<Option<ResolveIdOutput>> {
        Ok(None)
    }

    async fn load(&self, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn transform(&self, _code: &str, _id: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// A watched file changed on disk.
    fn watch_change(&self, _id: &str) {}

    async fn generate_bundle(&self, _host: &dyn HostContext) -> Result<()> {
        Ok(())
    }

    /// The bundle has been written to the output directory.
    async fn write_bundle(&self, _bundle: &mut OutputBundle) -> Result<()> {
        Ok(())
    }
}

/// State of a library build, created at `config_resolved`.
#[derive(Debug)]
struct BuildState {
    root: PathBuf,
    out_dir: PathBuf,
    public_dir: Option<PathBuf>,
    aliases: Vec<Alias>,
    watch: bool,
    engine: EmissionEngine,
    /// Persists across watch rebuilds.
    ledger: PlaceholderLedger,
    contents: ContentCache,
    descriptors: DescriptorCache,
    /// Public file → exists, reset on every build.
    public_files: Mutex<FxHashMap<PathBuf, bool>>,
    /// Module id → asset path, read by `load` when a public URL is set.
    asset_paths: Mutex<FxHashMap<String, String>>,
}

/// Emits assets referenced from library sources and relinks the written bundle.
#[derive(Debug)]
pub struct LibAssetsPlugin {
    options: LibAssetsOptions,
    filter: AssetFilter,
    runtime: Arc<dyn Runtime>,
    preprocessor: Arc<dyn StylePreprocessor>,
    compiler: Option<Arc<dyn ComponentCompiler>>,
    state: RwLock<Option<Arc<BuildState>>>,
}

impl LibAssetsPlugin {
    /// Plugin backed by the local filesystem, the built-in `@import`
    /// preprocessor and the built-in component compiler.
    pub fn new(options: LibAssetsOptions) -> Self {
        let runtime: Arc<dyn Runtime> = Arc::new(NativeRuntime);
        Self {
            filter: options.filter(),
            options,
            preprocessor: Arc::new(InlineImportPreprocessor::new(runtime.clone())),
            runtime,
            compiler: Some(Arc::new(SfcCompiler)),
            state: RwLock::new(None),
        }
    }

    /// Use `runtime` for every filesystem access, including the built-in
    /// preprocessor's.
    pub fn with_runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.preprocessor = Arc::new(InlineImportPreprocessor::new(runtime.clone()));
        self.runtime = runtime;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn StylePreprocessor>) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn ComponentCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Build without a component compiler. Reaching a component file is then
    /// fatal.
    pub fn without_compiler(mut self) -> Self {
        self.compiler = None;
        self
    }

    pub fn options(&self) -> &LibAssetsOptions {
        &self.options
    }

    /// Whether the resolved host config describes a library build.
    pub fn is_active(&self) -> bool {
        self.state.read().is_some()
    }

    fn state(&self) -> Option<Arc<BuildState>> {
        self.state.read().clone()
    }

    fn is_public_asset(&self, state: &BuildState, source: &str) -> bool {
        if !source.starts_with('/') {
            return false;
        }
        let Some(public_dir) = &state.public_dir else {
            return false;
        };

        let file = public_dir.join(source.trim_start_matches('/'));
        if let Some(&exists) = state.public_files.lock().get(&file) {
            return exists;
        }
        let exists = self.runtime.exists(&file);
        state.public_files.lock().insert(file, exists);
        exists
    }

    fn is_component(&self, path: &str) -> bool {
        let Some(ext) = extension(path) else {
            return false;
        };
        match &self.compiler {
            Some(compiler) => compiler.extensions().contains(&ext),
            None => ext == "vue",
        }
    }

    /// Asset literals found in a stylesheet, after preprocessing and rebasing.
    ///
    /// Preprocessing failures fall back to scanning the raw text.
    async fn style_literals(&self, state: &BuildState, file: &str, code: &str) -> Vec<String> {
        let ctx = StyleContext {
            preprocessor: self.preprocessor.as_ref(),
            runtime: self.runtime.as_ref(),
            root: &state.root,
            aliases: &state.aliases,
        };
        let source = match process_style(&ctx, file, code).await {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(id = %file, error = %e, "Failed to preprocess stylesheet");
                code.to_string()
            }
        };

        extract_style_assets(&source, file)
            .into_iter()
            .map(|candidate| candidate.literal.to_string())
            .collect()
    }

    /// Resolved ids of the assets referenced from module `id`.
    async fn extract_from_file(
        &self,
        host: &dyn HostContext,
        state: &BuildState,
        id: &str,
    ) -> Result<Vec<String>> {
        let Some(content) = state.contents.get(id, self.runtime.as_ref()).await else {
            return Ok(Vec::new());
        };
        let (path, query) = split_query(id);

        let literals: Vec<String> = if self.is_component(path) {
            let compiler = self
                .compiler
                .as_deref()
                .ok_or_else(|| Error::CompilerUnavailable {
                    file: path.to_string(),
                })?;
            let descriptor = state
                .descriptors
                .get(path, &state.root, compiler, self.runtime.as_ref())
                .await?;
            let blocks = split_blocks(&descriptor);
            let block_type = component_block_type(query);

            let mut literals = Vec::new();
            if block_type != Some("style") {
                for block in &blocks.scripts {
                    literals.extend(
                        extract_script_assets(&block.content, id)
                            .into_iter()
                            .map(|c| c.literal.to_string()),
                    );
                }
            }
            if block_type != Some("script") {
                let styles = blocks
                    .styles
                    .iter()
                    .map(|block| self.style_literals(state, path, &block.content));
                literals.extend(join_all(styles).await.into_iter().flatten());
            }
            literals
        } else {
            let text = String::from_utf8_lossy(&content);
            if JS_TYPES_RE.is_match(path) {
                extract_script_assets(&text, id)
                    .into_iter()
                    .map(|c| c.literal.to_string())
                    .collect()
            } else {
                self.style_literals(state, path, &text).await
            }
        };

        let mut unique: Vec<&str> = Vec::with_capacity(literals.len());
        for literal in &literals {
            if !unique.contains(&literal.as_str()) {
                unique.push(literal.as_str());
            }
        }

        Ok(resolve_candidates(host, &state.aliases, &unique, id).await)
    }

    /// Emit every asset referenced from `id` and record its placeholder.
    async fn emit_referenced(
        &self,
        host: &dyn HostContext,
        state: &BuildState,
        id: &str,
    ) -> Result<()> {
        let dir = importer_dir(id);
        for asset in self.extract_from_file(host, state, id).await? {
            let asset_id = resolve_from(&dir, &asset);
            if !self.filter.matches(&asset_id) {
                continue;
            }
            let Some(content) = state.contents.get(&asset_id, self.runtime.as_ref()).await else {
                continue;
            };
            if !should_process(self.options.limit, content.len() as u64) {
                continue;
            }

            let asset_path = state.engine.emit(host, &asset_id, content.clone());
            let data_uri = file_data_uri(&asset_id, &content, self.options.svg_inline);
            state.ledger.record(data_uri, &asset_path);
        }
        Ok(())
    }

    /// Run both rewrite passes over the written bundle.
    ///
    /// Returns an empty report outside library builds.
    pub async fn rewrite(&self, bundle: &mut OutputBundle) -> Result<RewriteReport> {
        let Some(state) = self.state() else {
            return Ok(RewriteReport::default());
        };

        let cached = if state.watch {
            state.engine.cached_assets()
        } else {
            Vec::new()
        };
        let ctx = RewriteContext {
            runtime: self.runtime.as_ref(),
            out_dir: &state.out_dir,
            ledger: &state.ledger,
            filter: &self.filter,
            cached: &cached,
        };
        let report = rewrite_bundle(&ctx, bundle).await?;
        tracing::debug!(
            rewritten = report.rewritten.len(),
            restored = report.restored.len(),
            placeholders = report.placeholders,
            relinked = report.relinked,
            "Rewrote library bundle"
        );
        Ok(report)
    }
}

/// `type` parameter of a component sub-request query, e.g. `?vue&type=style`.
fn component_block_type(query: &str) -> Option<&str> {
    query
        .trim_start_matches('?')
        .split('&')
        .find_map(|param| param.strip_prefix("type="))
}

fn absolute_to(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[async_trait]
impl Plugin for LibAssetsPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn config_resolved(&self, config: &HostBuildConfig) -> Result<()> {
        if !config.is_library() {
            *self.state.write() = None;
            return Ok(());
        }

        let formats = config.library_formats()?;
        if !check_formats(&formats) && !self.options.public_url.is_empty() {
            tracing::warn!(
                formats = %formats.iter().map(ToString::to_string).collect::<Vec<_>>().join(","),
                "The public URL will be applied to all output formats"
            );
        }

        let out_dir = config.output_dir();
        let settings = EmitSettings::new(
            &self.options,
            &config.root,
            &out_dir,
            &config.assets_dir,
            config.watch,
        );
        let state = BuildState {
            root: config.root.clone(),
            public_dir: config
                .public_dir
                .as_deref()
                .map(|dir| absolute_to(&config.root, dir)),
            aliases: config.aliases.clone(),
            watch: config.watch,
            engine: EmissionEngine::new(settings),
            ledger: PlaceholderLedger::new(self.options.public_dir()),
            contents: ContentCache::new(),
            descriptors: DescriptorCache::new(),
            public_files: Mutex::new(FxHashMap::default()),
            asset_paths: Mutex::new(FxHashMap::default()),
            out_dir,
        };
        *self.state.write() = Some(Arc::new(state));
        Ok(())
    }

    async fn build_start(&self) -> Result<()> {
        if let Some(state) = self.state() {
            state.engine.begin_build();
            state.contents.clear();
            state.public_files.lock().clear();
        }
        Ok(())
    }

    async fn resolve_id(
        &self,
        host: &dyn HostContext,
        args: ResolveIdArgs<'_>,
    ) -> Result<Option<ResolveIdOutput>> {
        let Some(state) = self.state() else {
            return Ok(None);
        };
        if self.is_public_asset(&state, args.source) || args.options.skip_self {
            return Ok(None);
        }

        let importer = args.importer.unwrap_or_default();
        let id = if Path::new(args.source).is_absolute() {
            args.source.to_string()
        } else if args.source.starts_with('.') {
            resolve_from(&importer_dir(importer), args.source)
        } else {
            match host
                .resolve(args.source, importer, ResolveOptions::skip_self())
                .await
            {
                Some(id) => id,
                None => return Ok(None),
            }
        };

        if JS_TYPES_RE.is_match(&id) || CSS_LANGS_RE.is_match(&id) {
            self.emit_referenced(host, &state, &id).await?;
        }

        if !self.filter.matches(&id) {
            return Ok(None);
        }
        let Some(content) = state.contents.get(&id, self.runtime.as_ref()).await else {
            return Ok(None);
        };
        if !should_process(self.options.limit, content.len() as u64) {
            return Ok(None);
        }

        let asset_path = state.engine.emit(host, &id, content);
        let is_json = extension(&id) == Some("json");

        if self.options.public_dir().is_some() {
            state.asset_paths.lock().insert(id.clone(), asset_path);
            let id = if is_json { append_url_query(&id, "url") } else { id };
            return Ok(Some(ResolveIdOutput::Id(id)));
        }

        let external = format!("./{}", asset_path);
        let external = if is_json {
            append_url_query(&external, "url")
        } else {
            external
        };
        Ok(Some(ResolveIdOutput::External(external)))
    }

    async fn load(&self, id: &str) -> Result<Option<String>> {
        let (Some(state), Some(public_dir)) = (self.state(), self.options.public_dir()) else {
            return Ok(None);
        };

        let key = if extension(id) == Some("json") {
            remove_url_query(id, "url")
        } else {
            id.to_string()
        };
        let code = state
            .asset_paths
            .lock()
            .get(&key)
            .map(|asset_path| format!("export default '{}{}'", public_dir, asset_path));
        Ok(code)
    }

    async fn transform(&self, _code: &str, _id: &str) -> Result<Option<String>> {
        if let Some(state) = self.state() {
            state.engine.generation().mark_transformed();
        }
        Ok(None)
    }

    fn watch_change(&self, id: &str) {
        if let Some(state) = self.state() {
            tracing::debug!(id = %id, "Watched file changed");
            state.engine.generation().mark_changed();
        }
    }

    async fn generate_bundle(&self, host: &dyn HostContext) -> Result<()> {
        let Some(state) = self.state() else {
            return Ok(());
        };
        if state.watch && state.engine.generation().has_transformed() {
            state.engine.reemit_skipped(host);
        }
        Ok(())
    }

    async fn write_bundle(&self, bundle: &mut OutputBundle) -> Result<()> {
        self.rewrite(bundle).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::to_slash;
    use crate::style::{PreprocessError, PreprocessOptions, PreprocessedStyle};
    use crate::test_utils::MemoryHost;
    use tempfile::TempDir;

    fn library(root: &Path) -> HostBuildConfig {
        HostBuildConfig::new(root).with_lib_formats(["es"])
    }

    #[tokio::test]
    async fn test_inactive_outside_library_builds() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.png"), b"png").unwrap();
        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new());
        plugin.config_resolved(&HostBuildConfig::new(temp.path())).unwrap();
        assert!(!plugin.is_active());

        let host = MemoryHost::new();
        let id = to_slash(&temp.path().join("a.png"));
        let out = plugin.resolve_id(&host, ResolveIdArgs::new(&id, None)).await.unwrap();
        assert_eq!(out, None);
        assert!(host.emitted().is_empty());
    }

    #[test]
    fn test_unknown_format_is_fatal() {
        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new());
        let config = HostBuildConfig::new("/p").with_lib_formats(["es", "amd"]);
        assert!(matches!(plugin.config_resolved(&config), Err(Error::UnknownFormat(f)) if f == "amd"));
    }

    #[tokio::test]
    async fn test_direct_asset_import_is_external() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("logo.png"), b"png").unwrap();
        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new().with_name("[name].[ext]").unwrap());
        plugin.config_resolved(&library(temp.path())).unwrap();
        plugin.build_start().await.unwrap();

        let host = MemoryHost::new();
        let importer = to_slash(&temp.path().join("index.ts"));
        let out = plugin
            .resolve_id(&host, ResolveIdArgs::new("./logo.png", Some(&importer)))
            .await
            .unwrap();
        assert_eq!(out, Some(ResolveIdOutput::External("./assets/logo.png".to_string())));
        assert_eq!(host.emitted_names(), ["assets/logo.png"]);
    }

    #[tokio::test]
    async fn test_public_url_keeps_id_and_loads_url() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("data.json"), b"{}").unwrap();
        let options = LibAssetsOptions::new()
            .with_include(r"\.json$")
            .unwrap()
            .with_name("[name].[ext]")
            .unwrap()
            .with_public_url("https://cdn.example.com");
        let plugin = LibAssetsPlugin::new(options);
        plugin.config_resolved(&library(temp.path())).unwrap();
        plugin.build_start().await.unwrap();

        let host = MemoryHost::new();
        let id = to_slash(&temp.path().join("data.json"));
        let out = plugin.resolve_id(&host, ResolveIdArgs::new(&id, None)).await.unwrap();
        let expected = format!("{}?url", id);
        assert_eq!(out, Some(ResolveIdOutput::Id(expected.clone())));

        let code = plugin.load(&expected).await.unwrap();
        assert_eq!(code.as_deref(), Some("export default 'https://cdn.example.com/assets/data.json'"));
    }

    /// Preprocessor that rejects every stylesheet.
    #[derive(Debug)]
    struct Broken;

    #[async_trait]
    impl StylePreprocessor for Broken {
        async fn preprocess(
            &self,
            _code: &str,
            id: &str,
            _options: PreprocessOptions,
        ) -> std::result::Result<PreprocessedStyle, PreprocessError> {
            Err(PreprocessError::Failed {
                id: id.to_string(),
                message: "unsupported syntax".to_string(),
            })
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_preprocessing_scans_raw_style() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("bg.png"), b"png").unwrap();
        std::fs::write(temp.path().join("style.css"), ".a { background: url(./bg.png); }").unwrap();

        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new().with_name("[name].[ext]").unwrap())
            .with_preprocessor(Arc::new(Broken));
        plugin.config_resolved(&library(temp.path())).unwrap();
        plugin.build_start().await.unwrap();

        let host = MemoryHost::new();
        let id = to_slash(&temp.path().join("style.css"));
        plugin.resolve_id(&host, ResolveIdArgs::new(&id, None)).await.unwrap();
        assert_eq!(host.emitted_names(), ["assets/bg.png"]);

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("Failed to preprocess stylesheet"));
        assert!(output.contains("unsupported syntax"));
    }

    #[tokio::test]
    async fn test_below_limit_is_left_to_host() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("tiny.png"), b"x").unwrap();
        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new().with_limit(1024));
        plugin.config_resolved(&library(temp.path())).unwrap();

        let host = MemoryHost::new();
        let id = to_slash(&temp.path().join("tiny.png"));
        assert_eq!(plugin.resolve_id(&host, ResolveIdArgs::new(&id, None)).await.unwrap(), None);
        assert!(host.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_self_requests_and_public_files_are_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("public")).unwrap();
        std::fs::write(temp.path().join("public/favicon.ico"), b"ico").unwrap();
        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new());
        plugin
            .config_resolved(&library(temp.path()).with_public_dir("public"))
            .unwrap();

        let host = MemoryHost::new();
        let out = plugin
            .resolve_id(&host, ResolveIdArgs::new("/favicon.ico", None))
            .await
            .unwrap();
        assert_eq!(out, None);

        let mut args = ResolveIdArgs::new("pkg/logo.png", Some("/p/index.ts"));
        args.options = ResolveOptions::skip_self();
        assert_eq!(plugin.resolve_id(&host, args).await.unwrap(), None);
        assert!(host.resolve_requests().is_empty());
    }

    #[tokio::test]
    async fn test_component_without_compiler_is_fatal() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("App.vue"), "<template><div/></template>").unwrap();
        let plugin = LibAssetsPlugin::new(LibAssetsOptions::new()).without_compiler();
        plugin.config_resolved(&library(temp.path())).unwrap();

        let host = MemoryHost::new();
        let id = to_slash(&temp.path().join("App.vue"));
        let err = plugin.resolve_id(&host, ResolveIdArgs::new(&id, None)).await.unwrap_err();
        assert!(matches!(err, Error::CompilerUnavailable { .. }));
    }

    #[test]
    fn test_component_block_type() {
        assert_eq!(component_block_type("?vue&type=style&index=0&lang.css"), Some("style"));
        assert_eq!(component_block_type("?vue&type=script&setup=true"), Some("script"));
        assert_eq!(component_block_type(""), None);
    }
}

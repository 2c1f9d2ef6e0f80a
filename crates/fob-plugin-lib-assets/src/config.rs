//! Plugin options and the resolved host configuration.

use figment::{
    Figment,
    providers::{Env, Format as _, Json, Serialized, Toml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use crate::alias::Alias;
use crate::{Error, Result};

/// File extensions handled by default.
pub const KNOWN_ASSET_TYPES: &[&str] = &[
    // images
    "apng", "png", "jpe?g", "jfif", "pjpeg", "pjp", "gif", "svg", "ico", "webp", "avif",
    // media
    "mp4", "webm", "ogg", "mp3", "wav", "flac", "aac", "opus",
    // fonts
    "woff2?", "eot", "ttf", "otf",
    // other
    "webmanifest", "pdf", "txt",
];

/// Default `include` matcher built from [`KNOWN_ASSET_TYPES`].
pub static DEFAULT_ASSETS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\.({})(\?.*)?$", KNOWN_ASSET_TYPES.join("|")))
        .expect("static pattern is valid")
});

/// Script-like modules scanned with the URL-construction family.
pub(crate) static JS_TYPES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(?:[jt]sx?|mjs|cjs|vue)$").expect("static pattern is valid")
});

/// Stylesheet languages scanned with the style family.
pub(crate) static CSS_LANGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(?:css|less|sass|scss|styl|stylus|pcss|postcss|sss)(?:$|\?)")
        .expect("static pattern is valid")
});

/// Output files that may reference emitted assets.
pub(crate) static ASSETS_IMPORTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(?:css|js|cjs|mjs)$").expect("static pattern is valid")
});

pub(crate) const DEFAULT_NAME: &str = "[contenthash].[ext]";

/// Include/exclude matcher over module ids.
#[derive(Debug, Clone)]
pub struct AssetFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl AssetFilter {
    pub fn new(include: Vec<Regex>, exclude: Vec<Regex>) -> Self {
        Self { include, exclude }
    }

    /// Whether `id` should be treated as an asset.
    ///
    /// Virtual ids (containing `\0`) never match. Exclusion wins over inclusion;
    /// an empty include list accepts everything not excluded.
    pub fn matches(&self, id: &str) -> bool {
        if id.contains('\0') {
            return false;
        }
        if self.exclude.iter().any(|re| re.is_match(id)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(id))
    }
}

/// Generates an output name from `(resource_path, resource_query)`.
pub type NameFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Generates an output directory from `(url, resource_path, resource_query)`.
pub type OutputPathFn = Arc<dyn Fn(&str, &str, &str) -> String + Send + Sync>;

/// Output filename template or generator.
#[derive(Clone)]
pub enum AssetName {
    Template(String),
    Generator(NameFn),
}

impl Default for AssetName {
    fn default() -> Self {
        AssetName::Template(DEFAULT_NAME.to_string())
    }
}

impl fmt::Debug for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetName::Template(template) => f.debug_tuple("Template").field(template).finish(),
            AssetName::Generator(_) => f.write_str("Generator(<fn>)"),
        }
    }
}

/// Output directory for emitted assets, static or computed per asset.
#[derive(Clone)]
pub enum OutputPath {
    Static(String),
    Generator(OutputPathFn),
}

impl fmt::Debug for OutputPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputPath::Static(dir) => f.debug_tuple("Static").field(dir).finish(),
            OutputPath::Generator(_) => f.write_str("Generator(<fn>)"),
        }
    }
}

/// Digest used for `[hash]`/`[contenthash]` tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    #[default]
    Sha256,
    Sha512,
    Blake3,
}

impl FromStr for HashKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(HashKind::Sha256),
            "sha512" => Ok(HashKind::Sha512),
            "blake3" => Ok(HashKind::Blake3),
            other => Err(Error::InvalidConfig(format!(
                "unsupported hash type '{}' (expected sha256, sha512 or blake3)",
                other
            ))),
        }
    }
}

/// How the host renders inlined SVG files as data URIs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SvgInline {
    /// URL-encoded markup, falling back to base64 for SVGs with text content.
    #[default]
    Encoded,
    Base64,
}

/// Programmatic plugin options.
#[derive(Debug, Clone)]
pub struct LibAssetsOptions {
    pub include: Vec<Regex>,
    pub exclude: Vec<Regex>,
    pub name: AssetName,
    /// Assets smaller than this many bytes are left for the host to inline.
    pub limit: Option<u64>,
    pub output_path: Option<OutputPath>,
    pub public_url: String,
    pub reg_exp: Option<Regex>,
    pub hash: HashKind,
    pub svg_inline: SvgInline,
}

impl Default for LibAssetsOptions {
    fn default() -> Self {
        Self {
            include: vec![DEFAULT_ASSETS_RE.clone()],
            exclude: Vec::new(),
            name: AssetName::default(),
            limit: None,
            output_path: None,
            public_url: String::new(),
            reg_exp: None,
            hash: HashKind::default(),
            svg_inline: SvgInline::default(),
        }
    }
}

fn compile(pattern: &str, field: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| Error::InvalidConfig(format!("invalid {} pattern '{}': {}", field, pattern, e)))
}

impl LibAssetsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the include matchers with a single pattern.
    pub fn with_include(mut self, pattern: &str) -> Result<Self> {
        self.include = vec![compile(pattern, "include")?];
        Ok(self)
    }

    pub fn with_exclude(mut self, pattern: &str) -> Result<Self> {
        self.exclude.push(compile(pattern, "exclude")?);
        Ok(self)
    }

    /// Set the output name template. The template is validated eagerly.
    pub fn with_name(mut self, template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        crate::emit::validate_template(&template)?;
        self.name = AssetName::Template(template);
        Ok(self)
    }

    pub fn with_name_fn<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.name = AssetName::Generator(Arc::new(generator));
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_output_path(mut self, dir: impl Into<String>) -> Self {
        self.output_path = Some(OutputPath::Static(dir.into()));
        self
    }

    pub fn with_output_path_fn<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str, &str, &str) -> String + Send + Sync + 'static,
    {
        self.output_path = Some(OutputPath::Generator(Arc::new(generator)));
        self
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = public_url.into();
        self
    }

    pub fn with_reg_exp(mut self, pattern: &str) -> Result<Self> {
        self.reg_exp = Some(compile(pattern, "regExp")?);
        Ok(self)
    }

    pub fn with_hash(mut self, hash: HashKind) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_svg_inline(mut self, svg_inline: SvgInline) -> Self {
        self.svg_inline = svg_inline;
        self
    }

    pub fn filter(&self) -> AssetFilter {
        AssetFilter::new(self.include.clone(), self.exclude.clone())
    }

    /// Public URL with a guaranteed trailing slash, `None` when unset.
    pub fn public_dir(&self) -> Option<String> {
        if self.public_url.is_empty() {
            None
        } else if self.public_url.ends_with('/') {
            Some(self.public_url.clone())
        } else {
            Some(format!("{}/", self.public_url))
        }
    }
}

/// Serializable options, loadable from a config file and the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LibAssetsConfig {
    /// Include patterns; `None` selects the known asset extensions.
    pub include: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub name: String,
    pub limit: Option<u64>,
    pub output_path: Option<String>,
    pub public_url: String,
    pub reg_exp: Option<String>,
    pub hash: HashKind,
    pub svg_inline: SvgInline,
}

impl Default for LibAssetsConfig {
    fn default() -> Self {
        Self {
            include: None,
            exclude: Vec::new(),
            name: DEFAULT_NAME.to_string(),
            limit: None,
            output_path: None,
            public_url: String::new(),
            reg_exp: None,
            hash: HashKind::default(),
            svg_inline: SvgInline::default(),
        }
    }
}

impl LibAssetsConfig {
    /// Load configuration from multiple sources.
    /// Priority: environment variables > config file > defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        Self::figment(config_path)
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// The merged provider chain used by [`LibAssetsConfig::load`].
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        let config_file = config_path.map(Path::to_path_buf).or_else(|| {
            ["lib-assets.toml", "lib-assets.json"]
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
        });

        if let Some(path) = config_file {
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }

        // LIB_ASSETS_PUBLIC_URL → publicUrl
        figment.merge(Env::prefixed("LIB_ASSETS_").map(|key| camel_case(key.as_str()).into()))
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for (i, part) in key.split('_').filter(|p| !p.is_empty()).enumerate() {
        let mut chars = part.chars();
        if i > 0 {
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
            }
        }
        out.push_str(chars.as_str());
    }
    out
}

impl TryFrom<LibAssetsConfig> for LibAssetsOptions {
    type Error = Error;

    fn try_from(config: LibAssetsConfig) -> Result<Self> {
        let include = match config.include {
            Some(patterns) => patterns
                .iter()
                .map(|p| compile(p, "include"))
                .collect::<Result<Vec<_>>>()?,
            None => vec![DEFAULT_ASSETS_RE.clone()],
        };
        let exclude = config
            .exclude
            .iter()
            .map(|p| compile(p, "exclude"))
            .collect::<Result<Vec<_>>>()?;

        let mut options = LibAssetsOptions {
            include,
            exclude,
            limit: config.limit,
            output_path: config.output_path.map(OutputPath::Static),
            public_url: config.public_url,
            hash: config.hash,
            svg_inline: config.svg_inline,
            ..LibAssetsOptions::default()
        }
        .with_name(config.name)?;

        if let Some(pattern) = config.reg_exp {
            options = options.with_reg_exp(&pattern)?;
        }
        Ok(options)
    }
}

/// Output formats of a library build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryFormat {
    Es,
    Cjs,
    Umd,
    Iife,
}

impl LibraryFormat {
    /// Intermediate formats are consumed by another bundler downstream.
    pub fn is_intermediate(self) -> bool {
        matches!(self, LibraryFormat::Es | LibraryFormat::Cjs)
    }
}

impl FromStr for LibraryFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "es" => Ok(LibraryFormat::Es),
            "cjs" => Ok(LibraryFormat::Cjs),
            "umd" => Ok(LibraryFormat::Umd),
            "iife" => Ok(LibraryFormat::Iife),
            other => Err(Error::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for LibraryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LibraryFormat::Es => "es",
            LibraryFormat::Cjs => "cjs",
            LibraryFormat::Umd => "umd",
            LibraryFormat::Iife => "iife",
        })
    }
}

/// Returns `true` when the formats are all intermediate or all final.
pub fn check_formats(formats: &[LibraryFormat]) -> bool {
    let intermediate = formats.iter().any(|f| f.is_intermediate());
    let final_format = formats.iter().any(|f| !f.is_intermediate());
    intermediate != final_format
}

/// Resolved host configuration handed to `config_resolved`.
#[derive(Debug, Clone)]
pub struct HostBuildConfig {
    pub root: PathBuf,
    /// Output directory, relative to `root` unless absolute.
    pub out_dir: PathBuf,
    pub assets_dir: String,
    pub public_dir: Option<PathBuf>,
    pub aliases: Vec<Alias>,
    pub watch: bool,
    /// Library formats, `None` when the build is not a library build.
    pub lib_formats: Option<Vec<String>>,
}

impl HostBuildConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            out_dir: PathBuf::from("dist"),
            assets_dir: "assets".to_string(),
            public_dir: None,
            aliases: Vec::new(),
            watch: false,
            lib_formats: None,
        }
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }

    pub fn with_assets_dir(mut self, assets_dir: impl Into<String>) -> Self {
        self.assets_dir = assets_dir.into();
        self
    }

    pub fn with_public_dir(mut self, public_dir: impl Into<PathBuf>) -> Self {
        self.public_dir = Some(public_dir.into());
        self
    }

    pub fn with_alias(mut self, alias: Alias) -> Self {
        self.aliases.push(alias);
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_lib_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lib_formats = Some(formats.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_library(&self) -> bool {
        self.lib_formats.is_some()
    }

    /// Parsed library formats. An empty list means the host default `es` + `umd`.
    pub fn library_formats(&self) -> Result<Vec<LibraryFormat>> {
        match &self.lib_formats {
            None => Ok(Vec::new()),
            Some(formats) if formats.is_empty() => Ok(vec![LibraryFormat::Es, LibraryFormat::Umd]),
            Some(formats) => formats.iter().map(|f| f.parse()).collect(),
        }
    }

    /// Absolute output directory.
    pub fn output_dir(&self) -> PathBuf {
        if self.out_dir.is_absolute() {
            self.out_dir.clone()
        } else {
            self.root.join(&self.out_dir)
        }
    }
}

/// Whether an asset of `size` bytes should be emitted.
pub fn should_process(limit: Option<u64>, size: u64) -> bool {
    match limit {
        Some(limit) => size >= limit,
        None => true,
    }
}

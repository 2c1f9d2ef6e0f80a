//! Asset emission.
//!
//! Each resolved asset id is turned into an output path by interpolating the
//! configured name template, registered with the host once per build, and
//! (in watch mode) remembered by output filename so it can be re-emitted when
//! the host skips the module that referenced it.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256, Sha512};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use crate::config::{AssetName, HashKind, LibAssetsOptions, OutputPath};
use crate::host::HostContext;
use crate::paths::{join_posix, relative_posix, split_query, to_slash};
use crate::{Error, Result};

/// Hash length used when a template does not give one.
pub const DEFAULT_HASH_LENGTH: usize = 16;

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\[\]]+)\]").expect("static pattern is valid"));

static HASH_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:([^:]+):)?(?:hash|contenthash)(?::([a-z]+\d*))?(?::(\d+))?$")
        .expect("static pattern is valid")
});

/// A file registered with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedAsset {
    /// Resolved id of the source file, query included.
    pub source_id: String,
    /// Output path relative to the output directory, without query.
    pub file_name: String,
    /// Absolute output path.
    pub full_path: PathBuf,
    pub source: Arc<[u8]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestKind {
    Hex,
    Base64,
    Base64Url,
}

#[derive(Debug, Clone, Copy)]
struct HashToken {
    kind: HashKind,
    digest: DigestKind,
    length: Option<usize>,
}

/// Parse a bracket token as a hash token. `None` when it is not one.
fn parse_hash_token(token: &str, default_kind: HashKind) -> Option<Result<HashToken>> {
    let caps = HASH_TOKEN_RE.captures(token)?;
    Some(hash_token(&caps, token, default_kind))
}

fn hash_token(caps: &Captures<'_>, token: &str, default_kind: HashKind) -> Result<HashToken> {
    let kind = match caps.get(1) {
        Some(m) => m.as_str().parse()?,
        None => default_kind,
    };
    let digest = match caps.get(2).map(|m| m.as_str().to_lowercase()).as_deref() {
        None | Some("hex") => DigestKind::Hex,
        Some("base64") => DigestKind::Base64,
        Some("base64url") => DigestKind::Base64Url,
        Some(other) => {
            return Err(Error::InvalidConfig(format!(
                "unsupported digest '{}' in [{}] (expected hex, base64 or base64url)",
                other, token
            )));
        }
    };
    let length = match caps.get(3) {
        Some(m) => Some(m.as_str().parse::<usize>().map_err(|e| {
            Error::InvalidConfig(format!("invalid hash length in [{}]: {}", token, e))
        })?),
        None => None,
    };
    Ok(HashToken {
        kind,
        digest,
        length,
    })
}

/// Check every hash token of a name template.
pub fn validate_template(template: &str) -> Result<()> {
    TOKEN_RE
        .captures_iter(template)
        .filter_map(|caps| parse_hash_token(caps.get(1)?.as_str(), HashKind::default()))
        .try_for_each(|parsed| parsed.map(|_| ()))
}

fn digest_bytes(kind: HashKind, content: &[u8]) -> Vec<u8> {
    match kind {
        HashKind::Sha256 => Sha256::digest(content).to_vec(),
        HashKind::Sha512 => Sha512::digest(content).to_vec(),
        HashKind::Blake3 => blake3::hash(content).as_bytes().to_vec(),
    }
}

fn hex_digest(kind: HashKind, content: &[u8]) -> String {
    match kind {
        HashKind::Sha256 => format!("{:x}", Sha256::digest(content)),
        HashKind::Sha512 => format!("{:x}", Sha512::digest(content)),
        HashKind::Blake3 => blake3::hash(content).to_hex().to_string(),
    }
}

fn render_hash(token: HashToken, content: &[u8]) -> String {
    let encoded = match token.digest {
        DigestKind::Hex => hex_digest(token.kind, content),
        DigestKind::Base64 => STANDARD.encode(digest_bytes(token.kind, content)),
        DigestKind::Base64Url => URL_SAFE_NO_PAD.encode(digest_bytes(token.kind, content)),
    };
    let length = token.length.unwrap_or(DEFAULT_HASH_LENGTH).min(encoded.len());
    encoded[..length].to_string()
}

/// Inputs for [`interpolate_name`].
#[derive(Debug, Clone, Copy)]
pub struct NameContext<'a> {
    pub resource_path: &'a str,
    pub resource_query: &'a str,
    /// Directory `[path]` is computed relative to.
    pub context: &'a str,
    pub content: &'a [u8],
    pub reg_exp: Option<&'a Regex>,
    pub hash: HashKind,
}

/// Expand `[name]`, `[ext]`, `[path]`, `[folder]`, `[query]`, hash tokens and
/// `[N]` regex captures in `template`. Unknown tokens are kept as written.
pub fn interpolate_name(template: &str, ctx: &NameContext<'_>) -> String {
    let file = ctx.resource_path.rsplit('/').next().unwrap_or(ctx.resource_path);
    let (name, ext) = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, ext),
        _ => (file, "bin"),
    };

    let dir = ctx
        .resource_path
        .rsplit_once('/')
        .map_or("", |(dir, _)| dir);
    // Parent segments would escape the output directory.
    let mut directory = relative_posix(ctx.context, dir)
        .split('/')
        .map(|segment| if segment == ".." { "_" } else { segment })
        .collect::<Vec<_>>()
        .join("/");
    if !directory.is_empty() {
        directory.push('/');
    }
    let folder = directory
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    let captures = ctx.reg_exp.and_then(|re| re.captures(ctx.resource_path));

    TOKEN_RE
        .replace_all(template, |caps: &Captures<'_>| {
            let token = &caps[1];
            match token.to_lowercase().as_str() {
                "ext" => return ext.to_string(),
                "name" => return name.to_string(),
                "path" => return directory.clone(),
                "folder" => return folder.clone(),
                "query" => return ctx.resource_query.to_string(),
                _ => {}
            }
            if let Some(Ok(hash)) = parse_hash_token(token, ctx.hash) {
                return render_hash(hash, ctx.content);
            }
            let captured = token
                .parse::<usize>()
                .ok()
                .and_then(|index| captures.as_ref()?.get(index));
            match captured {
                Some(group) => group.as_str().to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Tracks whether any module was transformed since the last file change.
#[derive(Debug, Default)]
pub struct BuildGeneration {
    transformed: AtomicBool,
}

impl BuildGeneration {
    /// A watched file changed; a new generation starts.
    pub fn mark_changed(&self) {
        self.transformed.store(false, Ordering::SeqCst);
    }

    pub fn mark_transformed(&self) {
        self.transformed.store(true, Ordering::SeqCst);
    }

    pub fn has_transformed(&self) -> bool {
        self.transformed.load(Ordering::SeqCst)
    }
}

/// Settings the engine needs from the options and the host config.
#[derive(Debug, Clone)]
pub struct EmitSettings {
    pub name: AssetName,
    pub output_path: Option<OutputPath>,
    pub reg_exp: Option<Regex>,
    pub hash: HashKind,
    pub assets_dir: String,
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub watch: bool,
}

impl EmitSettings {
    pub fn new(options: &LibAssetsOptions, root: &Path, out_dir: &Path, assets_dir: &str, watch: bool) -> Self {
        Self {
            name: options.name.clone(),
            output_path: options.output_path.clone(),
            reg_exp: options.reg_exp.clone(),
            hash: options.hash,
            assets_dir: assets_dir.to_string(),
            root: root.to_path_buf(),
            out_dir: out_dir.to_path_buf(),
            watch,
        }
    }
}

#[derive(Debug, Default)]
struct BuildEmissions {
    /// Resolved id → output path, for this build.
    by_id: FxHashMap<String, String>,
    /// Output filenames registered with the host in this build.
    file_names: FxHashSet<String>,
}

/// Emits assets once per build and keeps the watch-mode cache.
#[derive(Debug)]
pub struct EmissionEngine {
    settings: EmitSettings,
    build: Mutex<BuildEmissions>,
    /// Output filename → emitted asset, kept across watch rebuilds.
    cache: Mutex<IndexMap<String, EmittedAsset>>,
    generation: BuildGeneration,
}

impl EmissionEngine {
    pub fn new(settings: EmitSettings) -> Self {
        Self {
            settings,
            build: Mutex::new(BuildEmissions::default()),
            cache: Mutex::new(IndexMap::new()),
            generation: BuildGeneration::default(),
        }
    }

    pub fn settings(&self) -> &EmitSettings {
        &self.settings
    }

    pub fn generation(&self) -> &BuildGeneration {
        &self.generation
    }

    /// Forget what was emitted in the previous build. The watch cache survives.
    pub fn begin_build(&self) {
        *self.build.lock() = BuildEmissions::default();
    }

    /// Output path of `id` relative to the output directory, query included.
    pub fn asset_path(&self, id: &str, content: &[u8]) -> String {
        let (pure_id, query) = split_query(id);
        let settings = &self.settings;

        let url = match &settings.name {
            AssetName::Template(template) => interpolate_name(
                template,
                &NameContext {
                    resource_path: pure_id,
                    resource_query: query,
                    context: &to_slash(&settings.root),
                    content,
                    reg_exp: settings.reg_exp.as_ref(),
                    hash: settings.hash,
                },
            ),
            AssetName::Generator(generate) => generate(pure_id, query),
        };

        match &settings.output_path {
            Some(OutputPath::Generator(dir)) => join_posix(&dir(&url, pure_id, query), &url),
            Some(OutputPath::Static(dir)) => join_posix(dir, &url),
            None => join_posix(&settings.assets_dir, &url),
        }
    }

    /// Emit `id` and return its output path.
    ///
    /// The same id is registered with the host only once per build; later calls
    /// return the recorded path.
    pub fn emit(&self, host: &dyn HostContext, id: &str, content: Arc<[u8]>) -> String {
        let mut build = self.build.lock();
        if let Some(path) = build.by_id.get(id) {
            return path.clone();
        }

        let asset_path = self.asset_path(id, &content);
        let (_, query) = split_query(id);
        let file_name = if query.is_empty() {
            asset_path.clone()
        } else {
            asset_path.replacen(query, "", 1)
        };

        let asset = EmittedAsset {
            source_id: id.to_string(),
            full_path: self.settings.out_dir.join(&file_name),
            file_name: file_name.clone(),
            source: content,
        };
        host.emit_file(&asset);
        tracing::debug!(id = %id, asset = %file_name, "Emitted asset");

        if self.settings.watch {
            self.cache.lock().insert(file_name.clone(), asset);
        }
        build.file_names.insert(file_name);
        build.by_id.insert(id.to_string(), asset_path.clone());
        asset_path
    }

    /// Re-register cached assets that were not emitted in the current build.
    pub fn reemit_skipped(&self, host: &dyn HostContext) -> usize {
        let mut build = self.build.lock();
        let cache = self.cache.lock();
        let mut count = 0;
        for (file_name, asset) in cache.iter() {
            if build.file_names.insert(file_name.clone()) {
                host.emit_file(asset);
                count += 1;
            }
        }
        if count > 0 {
            tracing::debug!(count, "Re-emitted cached assets skipped by the host");
        }
        count
    }

    /// Assets remembered across watch rebuilds, in first-emission order.
    pub fn cached_assets(&self) -> Vec<EmittedAsset> {
        self.cache.lock().values().cloned().collect()
    }
}

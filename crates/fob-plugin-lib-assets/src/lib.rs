#![cfg_attr(docsrs, feature(doc_cfg))]

//! # fob-plugin-lib-assets
//!
//! Asset pipeline for library builds.
//!
//! When a bundler builds a library, its native asset handling is switched off:
//! images, fonts and other files referenced from scripts, stylesheets and
//! component files would otherwise be inlined or lost. This plugin takes over
//! that job:
//!
//! 1. **Discovers** asset references with targeted pattern extraction
//!    (`new URL('./x.png', import.meta.url)`, `url(...)`, `image-set(...)`)
//! 2. **Resolves** them through path aliases and the host module resolver
//! 3. **Emits** each asset once under a content-addressed name
//! 4. **Relinks** the final bundle after it is written, because the real
//!    location of an asset relative to the chunk that references it is only
//!    known once the whole output layout exists
//!
//! ## Architecture
//!
//! ```text
//! resolve_id ─► extract ─► alias ─► (style rebase | component blocks) ─► emit ─► ledger
//!                                                                              │
//! write_bundle ◄───────────────────── rewrite (placeholders + importer paths) ◄┘
//! ```
//!
//! The host bundler owns the driver loop and calls into [`Plugin`] once per
//! lifecycle phase. Everything the pipeline needs from the host goes through
//! [`HostContext`] (resolve a specifier, emit a file) and [`Runtime`]
//! (filesystem access).
//!
//! ## Example
//!
//! ```rust,no_run
//! use fob_plugin_lib_assets::{HostBuildConfig, LibAssetsOptions, LibAssetsPlugin, Plugin};
//!
//! # fn example() -> fob_plugin_lib_assets::Result<()> {
//! let plugin = LibAssetsPlugin::new(
//!     LibAssetsOptions::new().with_name("[name].[contenthash:8].[ext]")?,
//! );
//!
//! let host = HostBuildConfig::new("/project").with_lib_formats(["es"]);
//! plugin.config_resolved(&host)?;
//! # Ok(())
//! # }
//! ```

pub mod alias;
pub mod component;
pub mod config;
pub mod content;
pub mod emit;
pub mod extract;
pub mod host;
pub mod ledger;
pub mod paths;
pub mod plugin;
pub mod replace;
pub mod rewrite;
pub mod runtime;
pub mod style;

// Logging utilities (optional, enabled with "logging" feature)
#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub mod logging;

#[cfg(feature = "logging")]
#[cfg_attr(docsrs, doc(cfg(feature = "logging")))]
pub use logging::{LogLevel, init_logging, init_logging_from_env};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use alias::{Alias, AliasFind};
pub use component::{ComponentCompiler, ComponentDescriptor, DescriptorCache, SfcCompiler};
pub use config::{
    AssetFilter, AssetName, HashKind, HostBuildConfig, LibAssetsConfig, LibAssetsOptions,
    LibraryFormat, OutputPath, SvgInline,
};
pub use emit::{EmissionEngine, EmittedAsset};
pub use extract::AssetCandidate;
pub use host::{BundleEntry, HostContext, OutputBundle, ResolveOptions};
pub use ledger::PlaceholderLedger;
pub use plugin::{LibAssetsPlugin, Plugin, ResolveIdArgs, ResolveIdOutput};
pub use rewrite::RewriteReport;
pub use runtime::{FileMetadata, NativeRuntime, Runtime, RuntimeError, RuntimeResult};
pub use style::{InlineImportPreprocessor, PreprocessedStyle, StylePreprocessor};

/// Error types for the library asset pipeline.
///
/// Only conditions that make the build impossible surface as errors. Missing
/// files, failed preprocessing and absent source maps are reported through
/// `tracing` and the affected asset is skipped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A component file was reached but no component compiler is configured.
    #[error("No component compiler available to parse {file}")]
    CompilerUnavailable { file: String },

    /// The component compiler rejected a file.
    #[error("Failed to parse component {file}: {message}")]
    ComponentParse { file: String, message: String },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The host requested a library format this plugin cannot emit for.
    #[error("Unknown library format: {0}")]
    UnknownFormat(String),

    /// Filesystem failure reported by the runtime.
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Rewriting a bundle file back to disk failed.
    #[error("Write failure: {0}")]
    WriteFailure(String),
}

/// Result type alias for plugin operations.
pub type Result<T> = std::result::Result<T, Error>;

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::CompilerUnavailable { .. } => "COMPILER_UNAVAILABLE",
            Error::ComponentParse { .. } => "COMPONENT_PARSE_ERROR",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::UnknownFormat(_) => "UNKNOWN_FORMAT",
            Error::Runtime(_) => "RUNTIME_ERROR",
            Error::WriteFailure(_) => "WRITE_FAILURE",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::CompilerUnavailable { file } => Some(Box::new(format!(
                "'{}' is a component file. Configure a component compiler with \
                 LibAssetsPlugin::with_compiler() or keep the built-in SfcCompiler.",
                file
            ))),
            Error::InvalidConfig(msg) => Some(Box::new(format!(
                "Check the lib-assets options for invalid patterns or templates.\nError: {}",
                msg
            ))),
            Error::UnknownFormat(format) => Some(Box::new(format!(
                "Library format '{}' is not supported. Use one of: es, cjs, umd, iife.",
                format
            ))),
            Error::WriteFailure(msg) => Some(Box::new(format!(
                "Failed to write bundle file. Check disk space and permissions.\nError: {}",
                msg
            ))),
            _ => None,
        }
    }
}

//! Path aliases and specifier resolution.

use futures::future::join_all;
use regex::Regex;
use std::borrow::Cow;

use crate::host::{HostContext, ResolveOptions};
use crate::paths::{importer_dir, resolve_from};
use crate::{Error, Result};

/// What an alias matches against.
#[derive(Debug, Clone)]
pub enum AliasFind {
    /// Matches the specifier itself or any `find/...` path below it.
    Exact(String),
    Pattern(Regex),
}

/// A single alias entry, e.g. `@` → `/project/src`.
#[derive(Debug, Clone)]
pub struct Alias {
    pub find: AliasFind,
    pub replacement: String,
}

impl Alias {
    pub fn exact(find: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            find: AliasFind::Exact(find.into()),
            replacement: replacement.into(),
        }
    }

    pub fn pattern(pattern: &str, replacement: impl Into<String>) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| {
            Error::InvalidConfig(format!("invalid alias pattern '{}': {}", pattern, e))
        })?;
        Ok(Self {
            find: AliasFind::Pattern(re),
            replacement: replacement.into(),
        })
    }

    /// Length of the matched part of `importee`, `None` when the alias does not apply.
    fn match_len(&self, importee: &str) -> Option<usize> {
        match &self.find {
            AliasFind::Exact(find) => {
                let applies = importee == find
                    || importee
                        .strip_prefix(find.as_str())
                        .is_some_and(|rest| rest.starts_with('/'));
                applies.then_some(find.len())
            }
            AliasFind::Pattern(re) => re.find(importee).map(|m| m.len()),
        }
    }

    fn apply<'a>(&self, importee: &'a str) -> Cow<'a, str> {
        match &self.find {
            AliasFind::Exact(find) => {
                Cow::Owned(format!("{}{}", self.replacement, &importee[find.len()..]))
            }
            AliasFind::Pattern(re) => re.replace(importee, self.replacement.as_str()),
        }
    }

    /// Whether this alias rewrites `importee`.
    pub fn matches(&self, importee: &str) -> bool {
        self.match_len(importee).is_some()
    }
}

/// Substitute the most specific matching alias.
///
/// Among matching aliases the one covering the longest part of the specifier
/// wins; ties go to the earlier entry.
pub fn apply_aliases<'a>(aliases: &[Alias], importee: &'a str) -> Cow<'a, str> {
    let mut best: Option<(&Alias, usize)> = None;
    for alias in aliases {
        let Some(len) = alias.match_len(importee) else {
            continue;
        };
        if best.is_none_or(|(_, best_len)| len > best_len) {
            best = Some((alias, len));
        }
    }

    match best {
        Some((alias, _)) => alias.apply(importee),
        None => Cow::Borrowed(importee),
    }
}

/// Resolve extracted literals to absolute ids.
///
/// Each literal is aliased, then handed to the host resolver. When the host
/// cannot resolve it the aliased literal is joined onto the importer's
/// directory. All lookups run concurrently; the output order follows the input.
pub async fn resolve_candidates(
    host: &dyn HostContext,
    aliases: &[Alias],
    literals: &[&str],
    importer: &str,
) -> Vec<String> {
    let dir = importer_dir(importer);

    let lookups = literals.iter().map(|literal| {
        let updated = apply_aliases(aliases, literal).into_owned();
        let dir = &dir;
        async move {
            match host.resolve(&updated, importer, ResolveOptions::skip_self()).await {
                Some(id) => id,
                None => resolve_from(dir, &updated),
            }
        }
    });

    join_all(lookups).await
}

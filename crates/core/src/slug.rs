//! Collision-free slug generation.
//!
//! Slugs are built from a few human-readable parts joined with `_`. When the
//! plain candidate is taken, the resolver jumps straight past the highest
//! numeric suffix already in use (`_<N>`), so bulk creation of identically
//! named entities converges in one lookup per insert instead of scanning.
//!
//! The resolver is pure: it works against any [`SlugNamespace`], which the
//! persistence layer fills with the existing slugs sharing the candidate root.

use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::CoreError;

/// Maximum number of candidates tried before giving up with [`CoreError::SlugExhausted`].
pub const MAX_SLUG_ATTEMPTS: usize = 20;

/// Widest suffix the resolver can produce: `_` plus the digits of `u32::MAX`.
pub const MAX_SUFFIX_WIDTH: usize = 11;

/// A set of identifiers already taken within one slug scope.
pub trait SlugNamespace {
    fn contains(&self, candidate: &str) -> bool;

    /// Every identifier starting with `prefix`.
    fn with_prefix<'a>(&'a self, prefix: &str) -> Vec<&'a str>;
}

impl SlugNamespace for BTreeSet<String> {
    fn contains(&self, candidate: &str) -> bool {
        BTreeSet::contains(self, candidate)
    }

    fn with_prefix<'a>(&'a self, prefix: &str) -> Vec<&'a str> {
        self.range(prefix.to_string()..)
            .take_while(|s| s.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }
}

impl SlugNamespace for HashSet<String> {
    fn contains(&self, candidate: &str) -> bool {
        HashSet::contains(self, candidate)
    }

    fn with_prefix<'a>(&'a self, prefix: &str) -> Vec<&'a str> {
        self.iter()
            .filter(|s| s.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }
}

/// Convert free text into a slug fragment.
///
/// Decomposes to NFKD and drops combining marks, so accented letters keep
/// their base letter. Then keeps ASCII letters, digits, `_` and `-`;
/// lowercases; collapses runs of whitespace and hyphens into a single `-`;
/// trims leading/trailing `-`/`_`. Anything else non-ASCII is dropped.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else if c == '-' || c.is_whitespace() {
            pending_dash = true;
        }
    }

    out.trim_matches(|c| c == '-' || c == '_').to_string()
}

/// Join the non-empty parts with `_`.
pub fn join_parts<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Slug parts for name-derived entities (projects, attachments, terms).
pub fn name_slug_parts(name: &str) -> Vec<String> {
    vec![slugify(name)]
}

/// Slug parts for samples: owner username, collection date, name. Each is optional.
pub fn sample_slug_parts(
    username: Option<&str>,
    collected: Option<NaiveDate>,
    name: &str,
) -> Vec<String> {
    vec![
        username.map(slugify).unwrap_or_default(),
        collected.map(|d| d.to_string()).unwrap_or_default(),
        slugify(name),
    ]
}

/// The shortest prefix any candidate for `base` can start with.
///
/// The persistence layer loads every existing slug starting with this root
/// before calling [`resolve`].
pub fn candidate_root(base: &str, max_len: usize) -> String {
    truncate(base, max_len.saturating_sub(MAX_SUFFIX_WIDTH))
}

/// Resolve a unique slug for `base_parts` within `taken`.
///
/// Returns the joined parts (truncated to `max_len`) when free and
/// `start_suffix` is zero; otherwise tries `_<N>` suffixes, always leaving
/// room for the suffix inside `max_len`. Fails with
/// [`CoreError::SlugExhausted`] after [`MAX_SLUG_ATTEMPTS`] candidates, and with a
/// validation error when the parts are all empty.
pub fn resolve<S, N>(
    base_parts: &[S],
    max_len: usize,
    taken: &N,
    start_suffix: u32,
) -> Result<String, CoreError>
where
    S: AsRef<str>,
    N: SlugNamespace + ?Sized,
{
    let base = join_parts(base_parts);
    if base.is_empty() {
        return Err(CoreError::field(
            "slug",
            "Cannot derive an identifier from empty input",
        ));
    }

    if start_suffix == 0 {
        let candidate = truncate(&base, max_len);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
    }

    let mut current = start_suffix;
    for _ in 0..MAX_SLUG_ATTEMPTS {
        let Some(next_width) = current.checked_add(1).map(suffix_width) else {
            break;
        };
        if next_width >= max_len {
            break;
        }

        let root = format!("{}_", truncate(&base, max_len - next_width));
        let highest = taken
            .with_prefix(&root)
            .into_iter()
            .filter_map(|s| parse_suffix(&s[root.len()..]))
            .max();

        let next = highest
            .and_then(|n| n.checked_add(1))
            .map_or(current + 1, |n| n.max(current + 1));

        let width = suffix_width(next);
        if width >= max_len {
            break;
        }
        let candidate = format!("{}_{next}", truncate(&base, max_len - width));
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        tracing::debug!(candidate = %candidate, "Slug candidate taken, trying the next suffix");
        current = next;
    }

    Err(CoreError::SlugExhausted {
        base,
        attempts: MAX_SLUG_ATTEMPTS,
    })
}

/// Width of `_<n>`.
fn suffix_width(n: u32) -> usize {
    n.to_string().len() + 1
}

fn parse_suffix(rest: &str) -> Option<u32> {
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

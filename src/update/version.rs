//! Semantic version comparison.

use crate::error::{Error, Result};
use semver::Version;
use std::cmp::Ordering;

/// Parse a release version, tolerating surrounding whitespace and a `v` prefix.
///
/// # Errors
///
/// Returns [`Error::Schema`] if the remainder is not a valid semantic version.
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    Version::parse(stripped)
        .map_err(|e| Error::Schema(format!("invalid version '{raw}': {e}")))
}

/// Precedence order of two versions; build metadata does not participate.
#[must_use]
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// `true` when `remote` takes precedence over `local`.
#[must_use]
pub fn is_newer(remote: &Version, local: &Version) -> bool {
    precedence(remote, local) == Ordering::Greater
}

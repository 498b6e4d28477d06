// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Dotted version parsing and comparison

use crate::error::{Result, UpdateError};
use std::path::Path;

/// Client version sentinel that always receives an update.
pub const FORCED_UPDATE: &str = "ForcedUpdate";

const COMPONENTS: usize = 4;

/// Parse the first four numeric components of a dotted version ("0.9.74.1").
///
/// Trailing components beyond the fourth are ignored.
pub fn parse_version(s: &str) -> Result<[u64; COMPONENTS]> {
    let tokens: Vec<&str> = s.split('.').collect();
    if tokens.len() < COMPONENTS {
        return Err(UpdateError::MalformedVersion(format!(
            "{s}: expected {COMPONENTS} dotted components"
        )));
    }

    let mut parsed = [0_u64; COMPONENTS];
    for (slot, token) in parsed.iter_mut().zip(&tokens) {
        *slot = token
            .parse()
            .map_err(|_| UpdateError::MalformedVersion(format!("{s}: invalid component {token}")))?;
    }
    Ok(parsed)
}

/// Returns true iff `latest` is strictly newer than `client`.
pub fn can_update(client: &str, latest: &str) -> Result<bool> {
    let client_tokens = parse_version(client)?;
    let latest_tokens = parse_version(latest)?;
    tracing::debug!(client, latest, "comparing versions");

    // Arrays compare lexicographically: the first differing component decides.
    Ok(latest_tokens > client_tokens)
}

/// Derive the build version from a latest-image directory such as
/// `/build/images/x86-generic/g-0.9.74.1-a1`.
pub fn latest_version_from_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let name = raw.rsplit('/').next().unwrap_or_default();
    let name = name.trim_start_matches(['g', '-']);
    name.split('-').next().unwrap_or_default().to_owned()
}

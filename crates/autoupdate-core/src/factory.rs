// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Factory-floor image registry
//!
//! On a factory floor server every image is pre-built and registered in a
//! TOML file:
//!
//! ```toml
//! [[entry]]
//! qualified_board_ids = [1, 2, 3, "x86-generic"]
//! factory = { image = "generic-factory.gz", checksum = "AtiI8B64agHVN+yeBAyiNMX3+HM=" }
//! release = { image = "generic-release.gz", checksum = "AtiI8B64agHVN+yeBAyiNMX3+HM=" }
//! oem = { image = "generic-oem.gz", checksum = "AtiI8B64agHVN+yeBAyiNMX3+HM=" }
//! stateimg = { image = "generic-state.gz", checksum = "AtiI8B64agHVN+yeBAyiNMX3+HM=" }
//! ```
//!
//! Images are looked up by name in the static directory. Their sizes are read
//! once at load time and the loaded config never changes afterwards.

use crate::digest::ContentDigest;
use crate::error::{ChecksumMismatch, Result, UpdateError};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageKind {
    Factory,
    Release,
    Oem,
    Stateimg,
}

impl ImageKind {
    pub const ALL: [Self; 4] = [Self::Factory, Self::Release, Self::Oem, Self::Stateimg];

    /// Kind named by a channel such as `release-channel`: everything before
    /// the last `-`, or the whole channel when there is none.
    pub fn from_channel(channel: &str) -> Option<Self> {
        let kind = channel.rsplit_once('-').map_or(channel, |(kind, _)| kind);
        match kind {
            "factory" => Some(Self::Factory),
            "release" => Some(Self::Release),
            "oem" | "oempartitionimg" => Some(Self::Oem),
            "stateimg" => Some(Self::Stateimg),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Factory => "factory",
            Self::Release => "release",
            Self::Oem => "oem",
            Self::Stateimg => "stateimg",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered image, served from the static directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryImage {
    pub image_name: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryConfigEntry {
    pub qualified_board_ids: BTreeSet<String>,
    pub images: BTreeMap<ImageKind, FactoryImage>,
}

/// Loaded factory registry, immutable for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryConfig {
    entries: Vec<FactoryConfigEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFactoryConfig {
    #[serde(rename = "entry", default)]
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    qualified_board_ids: Vec<BoardIdent>,
    factory: Option<RawImage>,
    release: Option<RawImage>,
    #[serde(alias = "oempartitionimg")]
    oem: Option<RawImage>,
    stateimg: Option<RawImage>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawImage {
    image: String,
    checksum: String,
}

/// Board ids may be written as numbers or strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoardIdent {
    Number(i64),
    Name(String),
}

impl BoardIdent {
    fn into_key(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Name(name) => name,
        }
    }
}

impl FactoryConfig {
    pub fn from_file(
        path: &Path,
        static_dir: &Path,
        validator: Option<&dyn ContentDigest>,
    ) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!(
                "failed to read factory config {}: {e}",
                path.display()
            ))
        })?;
        Self::import(&source, static_dir, validator)
    }

    /// Parse a factory config and size every image under `static_dir`.
    ///
    /// With a validator, every image is re-hashed and all mismatches are
    /// reported together.
    pub fn import(
        source: &str,
        static_dir: &Path,
        validator: Option<&dyn ContentDigest>,
    ) -> Result<Self> {
        let raw: RawFactoryConfig = toml::from_str(source)
            .map_err(|e| UpdateError::Config(format!("failed to parse factory config: {e}")))?;

        let mut entries = Vec::with_capacity(raw.entries.len());
        let mut mismatches = Vec::new();

        for (index, raw_entry) in raw.entries.into_iter().enumerate() {
            if raw_entry.qualified_board_ids.is_empty() {
                return Err(UpdateError::Config(format!(
                    "factory entry {index} has no qualified_board_ids"
                )));
            }
            let qualified_board_ids = raw_entry
                .qualified_board_ids
                .into_iter()
                .map(BoardIdent::into_key)
                .collect();

            let kinds = [
                (ImageKind::Factory, raw_entry.factory),
                (ImageKind::Release, raw_entry.release),
                (ImageKind::Oem, raw_entry.oem),
                (ImageKind::Stateimg, raw_entry.stateimg),
            ];

            let mut images = BTreeMap::new();
            for (kind, raw_image) in kinds {
                let Some(raw_image) = raw_image else {
                    continue;
                };
                if !is_plain_file_name(&raw_image.image) {
                    return Err(UpdateError::Config(format!(
                        "factory entry {index}: {kind} image {:?} is not a file name",
                        raw_image.image
                    )));
                }

                let image_path = static_dir.join(&raw_image.image);
                let size = std::fs::metadata(&image_path)
                    .map_err(|e| {
                        UpdateError::Config(format!(
                            "factory image {} is unreadable: {e}",
                            image_path.display()
                        ))
                    })?
                    .len();

                if let Some(validator) = validator {
                    let actual = validator.digest(&image_path)?.hash;
                    if actual != raw_image.checksum {
                        let mismatch = ChecksumMismatch {
                            image: raw_image.image.clone(),
                            expected: raw_image.checksum.clone(),
                            actual,
                        };
                        error!("{mismatch}");
                        mismatches.push(mismatch);
                    }
                }

                images.insert(
                    kind,
                    FactoryImage {
                        image_name: raw_image.image,
                        checksum: raw_image.checksum,
                        size,
                    },
                );
            }

            entries.push(FactoryConfigEntry {
                qualified_board_ids,
                images,
            });
        }

        if !mismatches.is_empty() {
            return Err(UpdateError::ConfigChecksumMismatch(mismatches));
        }
        if validator.is_some() {
            info!(entries = entries.len(), "Factory config checksums verified");
        }

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[FactoryConfigEntry] {
        &self.entries
    }

    /// First entry qualifying `board_id`, image of the kind named by `channel`.
    pub fn select_image(&self, board_id: &str, channel: &str) -> Result<&FactoryImage> {
        let kind = ImageKind::from_channel(channel).ok_or_else(|| {
            UpdateError::ImageNotFound(format!("channel {channel} names no image kind"))
        })?;

        let entry = self
            .entries
            .iter()
            .find(|entry| entry.qualified_board_ids.contains(board_id))
            .ok_or_else(|| {
                UpdateError::ImageNotFound(format!("no factory entry for board {board_id}"))
            })?;

        entry.images.get(&kind).ok_or_else(|| {
            UpdateError::ImageNotFound(format!("board {board_id} has no {kind} image"))
        })
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
}

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Autoupdate core - decides whether a device gets an update
//!
//! Devices ping with their version, channel and board. The engine compares
//! versions (or consults the factory image registry), builds and caches the
//! update artifact through external tools, and renders the XML answer.

pub mod build_cache;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod factory;
pub mod payload;
pub mod request;
pub mod tools;
pub mod version;

pub use build_cache::{BuildCache, CacheOutcome, CachedArtifact, ImageDescriptor};
pub use config::UpdateSettings;
pub use digest::{ContentDigest, FileDigest, Sha1Digest};
pub use engine::{Collaborators, UpdateDecisionEngine};
pub use error::{ChecksumMismatch, UpdateError};
pub use factory::{FactoryConfig, FactoryImage, ImageKind};
pub use payload::{PayloadFormatter, UpdateOffer, UpdateResponse};
pub use request::UpdateRequest;
pub use version::{FORCED_UPDATE, can_update};

// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update artifact cache
//!
//! An image directory holds the unpacked `kernel.image` and `rootfs.image`
//! and the generated `update.gz`. The artifact is rebuilt if and only if it
//! is missing or strictly older than the rootfs it was built from. Nothing is
//! cached in memory: freshness is read back from the filesystem every time.

use crate::config::UpdateSettings;
use crate::digest::{ContentDigest, FileDigest};
use crate::error::{Result, UpdateError};
use crate::tools::{ArtifactBuilder, ImageUnpacker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const KERNEL_FILE: &str = "kernel.image";
pub const ROOTFS_FILE: &str = "rootfs.image";
pub const ARTIFACT_FILE: &str = "update.gz";

const PARTITION_PREFIX: &str = "part_";

/// Paths derived from an image directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub image_path: PathBuf,
    pub kernel_file: PathBuf,
    pub rootfs_file: PathBuf,
    pub update_artifact_path: PathBuf,
}

impl ImageDescriptor {
    pub fn new(image_path: &Path) -> Self {
        Self {
            image_path: image_path.to_path_buf(),
            kernel_file: image_path.join(KERNEL_FILE),
            rootfs_file: image_path.join(ROOTFS_FILE),
            update_artifact_path: image_path.join(ARTIFACT_FILE),
        }
    }

    async fn is_unpacked(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.kernel_file).await?
            && tokio::fs::try_exists(&self.rootfs_file).await?)
    }

    /// True when the artifact exists and is not older than the rootfs.
    pub async fn is_fresh(&self) -> Result<bool> {
        let artifact = match tokio::fs::metadata(&self.update_artifact_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let rootfs = tokio::fs::metadata(&self.rootfs_file).await?;
        Ok(artifact.modified()? >= rootfs.modified()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Built,
}

/// A ready artifact and the digest of the bytes that were published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedArtifact {
    pub outcome: CacheOutcome,
    pub digest: FileDigest,
}

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Claim on a single-flight slot. The map entry goes away with the last claim,
/// including when the claiming future is cancelled.
struct InFlight<'a> {
    map: &'a Mutex<HashMap<PathBuf, Slot>>,
    key: &'a Path,
    slot: Slot,
}

impl<'a> InFlight<'a> {
    fn claim(map: &'a Mutex<HashMap<PathBuf, Slot>>, key: &'a Path) -> Self {
        let slot = Arc::clone(map.lock().entry(key.to_path_buf()).or_default());
        Self { map, key, slot }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // One reference is ours, one is the map's: nobody else is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            map.remove(self.key);
        }
    }
}

/// Deletes the artifact unless the build finished. The builder writes in
/// place and an interrupted build leaves a truncated file that looks fresh.
struct PendingArtifact<'a> {
    path: &'a Path,
    finished: bool,
}

impl Drop for PendingArtifact<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match std::fs::remove_file(self.path) {
            Ok(()) => warn!(path = %self.path.display(), "Removed incomplete update image"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), "Failed to remove incomplete update image: {e}"),
        }
    }
}

/// Builds update artifacts on demand, one build per image at a time.
#[derive(Debug)]
pub struct BuildCache {
    static_dir: PathBuf,
    archive_mode: bool,
    disk_image: &'static str,
    unpacker: Arc<dyn ImageUnpacker>,
    builder: Arc<dyn ArtifactBuilder>,
    digest: Arc<dyn ContentDigest>,
    in_flight: Mutex<HashMap<PathBuf, Slot>>,
}

impl BuildCache {
    pub fn new(
        settings: &UpdateSettings,
        unpacker: Arc<dyn ImageUnpacker>,
        builder: Arc<dyn ArtifactBuilder>,
        digest: Arc<dyn ContentDigest>,
    ) -> Self {
        Self {
            static_dir: settings.static_dir.clone(),
            archive_mode: settings.archive_mode,
            disk_image: settings.disk_image_name(),
            unpacker,
            builder,
            digest,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Where artifacts are published outside archive mode.
    pub fn published_artifact(&self) -> PathBuf {
        self.static_dir.join(ARTIFACT_FILE)
    }

    /// Make sure `image_path` has an up to date `update.gz` and digest it.
    ///
    /// Concurrent callers for the same image wait for the one doing the work
    /// and then see its result as a cache hit. The digest and the publish
    /// copy happen under the image lock, so the returned digest always
    /// describes the bytes this call published. Every failure is reported as
    /// `BuildFailed`.
    pub async fn ensure_artifact(&self, image_path: &Path) -> Result<CachedArtifact> {
        let published = self.published_artifact();
        if image_path == published {
            return Err(UpdateError::BuildFailed(format!(
                "{} is the publish target, not an image directory",
                image_path.display()
            )));
        }

        let image = ImageDescriptor::new(image_path);
        self.exclusive(image_path, async {
            let outcome = self.refresh(&image).await?;
            let digest = self.digest_of(image.update_artifact_path.clone()).await?;

            // Lock order is always image, then publish target.
            if !self.archive_mode {
                self.exclusive(&published, self.publish(&image, &published))
                    .await?;
            }
            Ok::<_, UpdateError>(CachedArtifact { outcome, digest })
        })
        .await
        .map_err(UpdateError::into_build_failure)
    }

    /// Run `work` while holding the lock for `key`.
    async fn exclusive<T>(
        &self,
        key: &Path,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let claim = InFlight::claim(&self.in_flight, key);
        let _guard = claim.slot.lock().await;
        work.await
    }

    async fn refresh(&self, image: &ImageDescriptor) -> Result<CacheOutcome> {
        self.unpack(image).await?;

        if image.is_fresh().await? {
            info!(
                path = %image.update_artifact_path.display(),
                "Found cached update image"
            );
            return Ok(CacheOutcome::Hit);
        }

        info!(path = %image.update_artifact_path.display(), "Generating update image");
        let mut pending = PendingArtifact {
            path: &image.update_artifact_path,
            finished: false,
        };
        self.builder
            .build(&image.kernel_file, &image.rootfs_file)
            .await?;

        if !tokio::fs::try_exists(&image.update_artifact_path).await? {
            return Err(UpdateError::BuildFailed(format!(
                "builder did not produce {}",
                image.update_artifact_path.display()
            )));
        }
        pending.finished = true;
        Ok(CacheOutcome::Built)
    }

    async fn unpack(&self, image: &ImageDescriptor) -> Result<()> {
        if image.is_unpacked().await? {
            return Ok(());
        }

        info!(path = %image.image_path.display(), "Unpacking image");
        if self.archive_mode {
            self.unpacker.extract_bundle(&image.image_path).await?;
        }

        purge_partitions(&image.image_path).await?;
        let partitions = self
            .unpacker
            .unpack(&image.image_path, self.disk_image)
            .await?;
        tokio::fs::rename(&partitions.kernel, &image.kernel_file).await?;
        tokio::fs::rename(&partitions.rootfs, &image.rootfs_file).await?;
        purge_partitions(&image.image_path).await?;
        Ok(())
    }

    async fn digest_of(&self, path: PathBuf) -> Result<FileDigest> {
        let digest = Arc::clone(&self.digest);
        tokio::task::spawn_blocking(move || digest.digest(&path))
            .await
            .map_err(|e| UpdateError::BuildFailed(format!("digest task failed: {e}")))?
    }

    async fn publish(&self, image: &ImageDescriptor, published: &Path) -> Result<()> {
        if image.update_artifact_path == published {
            return Ok(());
        }
        debug!(
            from = %image.update_artifact_path.display(),
            to = %published.display(),
            "Publishing update image"
        );
        tokio::fs::copy(&image.update_artifact_path, published)
            .await
            .map_err(|e| {
                warn!("Failed to copy update image to {}: {e}", published.display());
                UpdateError::BuildFailed(format!("copy to {}: {e}", published.display()))
            })?;
        Ok(())
    }
}

/// Remove leftover `part_*` files from an earlier unpack.
async fn purge_partitions(image_dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(image_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with(PARTITION_PREFIX)
        {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

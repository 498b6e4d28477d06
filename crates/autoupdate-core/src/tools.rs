// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! External build tooling
//!
//! Image lookup, partition unpacking and payload generation are done by
//! external programs. Each is invoked with an argument list, never through a
//! shell, and is killed if it outlives the configured timeout.

use crate::error::{Result, UpdateError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Archive unpacked in archive-serving mode before partitions are extracted.
pub const BUNDLE_FILE: &str = "image.zip";

const LATEST_IMAGE_SCRIPT: &str = "get_latest_image.sh";
const UNPACK_SCRIPT: &str = "unpack_partitions.sh";
const BUILD_SCRIPT: &str = "mk_memento_images.sh";
const KERNEL_PARTITION: &str = "part_2";
const ROOTFS_PARTITION: &str = "part_3";

/// Raw partition files left in the image directory by the unpacker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partitions {
    pub kernel: PathBuf,
    pub rootfs: PathBuf,
}

impl Partitions {
    pub fn in_dir(image_dir: &Path) -> Self {
        Self {
            kernel: image_dir.join(KERNEL_PARTITION),
            rootfs: image_dir.join(ROOTFS_PARTITION),
        }
    }
}

#[async_trait]
pub trait LatestImageResolver: Send + Sync + fmt::Debug {
    /// Directory of the most recent build for `board_id`.
    async fn latest_image(&self, board_id: &str) -> Result<PathBuf>;
}

#[async_trait]
pub trait ImageUnpacker: Send + Sync + fmt::Debug {
    /// Extract the disk image from the bundle next to it.
    async fn extract_bundle(&self, image_dir: &Path) -> Result<()>;

    /// Split `image_file` inside `image_dir` into kernel and rootfs partitions.
    async fn unpack(&self, image_dir: &Path, image_file: &str) -> Result<Partitions>;
}

#[async_trait]
pub trait ArtifactBuilder: Send + Sync + fmt::Debug {
    /// Generate `update.gz` next to the kernel file.
    async fn build(&self, kernel_file: &Path, rootfs_file: &Path) -> Result<()>;
}

/// Runs the dev scripts from `scripts_dir`.
#[derive(Debug, Clone)]
pub struct ScriptTools {
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl ScriptTools {
    pub fn new(scripts_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            timeout,
        }
    }
}

/// Run a tool to completion, failing on timeout or nonzero exit.
async fn run_tool(mut command: Command, name: &str, timeout: Duration) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(tool = name, "running {:?}", command.as_std());

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| {
            UpdateError::BuildFailed(format!("{name} timed out after {timeout:?}"))
        })?
        .map_err(|e| UpdateError::BuildFailed(format!("failed to start {name}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(tool = name, status = %output.status, "tool failed: {}", stderr.trim());
        return Err(UpdateError::BuildFailed(format!(
            "{name} exited with {}",
            output.status
        )));
    }
    Ok(output)
}

#[async_trait]
impl LatestImageResolver for ScriptTools {
    async fn latest_image(&self, board_id: &str) -> Result<PathBuf> {
        let mut command = Command::new(self.scripts_dir.join(LATEST_IMAGE_SCRIPT));
        command.arg("--board").arg(board_id);

        let output = run_tool(command, LATEST_IMAGE_SCRIPT, self.timeout)
            .await
            .map_err(|e| UpdateError::ImageNotFound(format!("latest image for {board_id}: {e}")))?;

        let path = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if path.is_empty() {
            return Err(UpdateError::ImageNotFound(format!(
                "no latest image for board {board_id}"
            )));
        }
        Ok(PathBuf::from(path))
    }
}

#[async_trait]
impl ImageUnpacker for ScriptTools {
    async fn extract_bundle(&self, image_dir: &Path) -> Result<()> {
        let mut command = Command::new("unzip");
        command.arg("-o").arg(BUNDLE_FILE).current_dir(image_dir);
        run_tool(command, "unzip", self.timeout).await?;
        Ok(())
    }

    async fn unpack(&self, image_dir: &Path, image_file: &str) -> Result<Partitions> {
        // The unpack script ships alongside each image.
        let mut command = Command::new(image_dir.join(UNPACK_SCRIPT));
        command.arg(image_file).current_dir(image_dir);
        run_tool(command, UNPACK_SCRIPT, self.timeout).await?;

        let partitions = Partitions::in_dir(image_dir);
        for part in [&partitions.kernel, &partitions.rootfs] {
            if !tokio::fs::try_exists(part).await? {
                return Err(UpdateError::BuildFailed(format!(
                    "{UNPACK_SCRIPT} did not produce {}",
                    part.display()
                )));
            }
        }
        Ok(partitions)
    }
}

#[async_trait]
impl ArtifactBuilder for ScriptTools {
    async fn build(&self, kernel_file: &Path, rootfs_file: &Path) -> Result<()> {
        let mut command = Command::new(self.scripts_dir.join(BUILD_SCRIPT));
        command.arg(kernel_file).arg(rootfs_file);
        run_tool(command, BUILD_SCRIPT, self.timeout).await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn test_latest_image_from_script() {
        let scripts = TempDir::new().unwrap();
        write_script(
            scripts.path(),
            LATEST_IMAGE_SCRIPT,
            r#"echo "/build/images/$2/g-1.2.3.5-a1""#,
        );

        let tools = ScriptTools::new(scripts.path(), Duration::from_secs(10));
        let path = tools.latest_image("x86-mario").await.unwrap();
        assert_eq!(path, PathBuf::from("/build/images/x86-mario/g-1.2.3.5-a1"));
    }

    #[tokio::test]
    async fn test_board_is_passed_verbatim() {
        let scripts = TempDir::new().unwrap();
        write_script(scripts.path(), LATEST_IMAGE_SCRIPT, r#"printf '%s' "$2""#);

        let tools = ScriptTools::new(scripts.path(), Duration::from_secs(10));
        let path = tools.latest_image("x86; rm -rf /").await.unwrap();
        assert_eq!(path, PathBuf::from("x86; rm -rf /"));
    }

    #[tokio::test]
    async fn test_empty_latest_image_is_not_found() {
        let scripts = TempDir::new().unwrap();
        write_script(scripts.path(), LATEST_IMAGE_SCRIPT, "true");

        let tools = ScriptTools::new(scripts.path(), Duration::from_secs(10));
        let err = tools.latest_image("x86-generic").await.unwrap_err();
        assert!(matches!(err, UpdateError::ImageNotFound(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_build_failure() {
        let scripts = TempDir::new().unwrap();
        write_script(scripts.path(), BUILD_SCRIPT, "echo boom >&2; exit 3");

        let tools = ScriptTools::new(scripts.path(), Duration::from_secs(10));
        let err = tools
            .build(Path::new("kernel.image"), Path::new("rootfs.image"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::BuildFailed(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_build_failure() {
        let scripts = TempDir::new().unwrap();
        write_script(scripts.path(), BUILD_SCRIPT, "sleep 5");

        let tools = ScriptTools::new(scripts.path(), Duration::from_millis(200));
        let err = tools
            .build(Path::new("kernel.image"), Path::new("rootfs.image"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::BuildFailed(_)));
        assert!(err.to_string().contains("timed out after 200ms"), "{err}");
    }

    #[tokio::test]
    async fn test_unpack_reports_partitions() {
        let image_dir = TempDir::new().unwrap();
        write_script(
            image_dir.path(),
            UNPACK_SCRIPT,
            r#"test -f "$1" && echo kernel > part_2 && echo rootfs > part_3"#,
        );
        std::fs::write(image_dir.path().join("chromiumos_image.bin"), b"disk").unwrap();

        let tools = ScriptTools::new("/unused", Duration::from_secs(10));
        let partitions = tools
            .unpack(image_dir.path(), "chromiumos_image.bin")
            .await
            .unwrap();
        assert_eq!(partitions, Partitions::in_dir(image_dir.path()));
        assert!(partitions.rootfs.exists());
    }

    #[tokio::test]
    async fn test_unpack_without_partitions_fails() {
        let image_dir = TempDir::new().unwrap();
        write_script(image_dir.path(), UNPACK_SCRIPT, "true");

        let tools = ScriptTools::new("/unused", Duration::from_secs(10));
        let err = tools
            .unpack(image_dir.path(), "chromiumos_image.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::BuildFailed(_)));
    }
}

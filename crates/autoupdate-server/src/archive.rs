// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Archive-serving mode: expose a build archive under `/static/archive`

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

pub const ARCHIVE_LINK: &str = "archive";

/// Point `<public_dir>/archive` at `archive_root`, replacing a stale link.
#[cfg(unix)]
pub fn link_archive(public_dir: &Path, archive_root: &Path) -> Result<()> {
    let link = public_dir.join(ARCHIVE_LINK);

    std::fs::create_dir_all(public_dir)
        .with_context(|| format!("Failed to create {}", public_dir.display()))?;

    match std::fs::read_link(&link) {
        Ok(target) if target == archive_root => return Ok(()),
        Ok(target) => {
            warn!(stale = %target.display(), "Removing stale archive symlink");
            std::fs::remove_file(&link)
                .with_context(|| format!("Failed to remove {}", link.display()))?;
        }
        Err(_) if link.exists() => {
            anyhow::bail!("{} exists and is not a symlink", link.display());
        }
        Err(_) => {}
    }

    std::os::unix::fs::symlink(archive_root, &link).with_context(|| {
        format!(
            "Failed to link {} to {}",
            link.display(),
            archive_root.display()
        )
    })?;
    info!(link = %link.display(), target = %archive_root.display(), "Serving build archive");
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_link() {
        let public = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();

        link_archive(public.path(), archive.path()).unwrap();
        let link = public.path().join(ARCHIVE_LINK);
        assert_eq!(std::fs::read_link(&link).unwrap(), archive.path());

        // Idempotent.
        link_archive(public.path(), archive.path()).unwrap();
        assert_eq!(std::fs::read_link(&link).unwrap(), archive.path());
    }

    #[test]
    fn test_replaces_stale_link() {
        let public = TempDir::new().unwrap();
        let old = TempDir::new().unwrap();
        let new = TempDir::new().unwrap();

        link_archive(public.path(), old.path()).unwrap();
        link_archive(public.path(), new.path()).unwrap();
        assert_eq!(
            std::fs::read_link(public.path().join(ARCHIVE_LINK)).unwrap(),
            new.path()
        );
    }

    #[test]
    fn test_refuses_to_replace_directory() {
        let public = TempDir::new().unwrap();
        let archive = TempDir::new().unwrap();
        std::fs::create_dir(public.path().join(ARCHIVE_LINK)).unwrap();

        assert!(link_archive(public.path(), archive.path()).is_err());
    }
}

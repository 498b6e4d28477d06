// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Engine settings

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const CANONICAL_IMAGE: &str = "chromiumos_image.bin";
const TEST_IMAGE: &str = "chromiumos_test_image.bin";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettings {
    /// Directory holding labelled builds and the published `update.gz`.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Directory containing `get_latest_image.sh` and `mk_memento_images.sh`.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Application id reported in responses, without braces.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Serve images straight out of a build archive instead of publishing
    /// them into the static directory.
    #[serde(default)]
    pub archive_mode: bool,

    /// Unpack the test image instead of the canonical one.
    #[serde(default)]
    pub test_image: bool,

    /// External base URL for labelled builds (e.g. a buildbot httpd).
    #[serde(default)]
    pub urlbase: Option<String>,

    /// Upper bound on any single external tool invocation.
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_app_id() -> String {
    "87efface-864d-49a5-9bb3-4b050a7c227a".to_owned()
}

fn default_tool_timeout_secs() -> u64 {
    1800
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            static_dir: default_static_dir(),
            scripts_dir: default_scripts_dir(),
            app_id: default_app_id(),
            archive_mode: false,
            test_image: false,
            urlbase: None,
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl UpdateSettings {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    /// Disk image the partitions are unpacked from.
    pub fn disk_image_name(&self) -> &'static str {
        if self.test_image {
            TEST_IMAGE
        } else {
            CANONICAL_IMAGE
        }
    }
}

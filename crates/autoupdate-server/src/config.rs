// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use anyhow::{Context, Result, bail};
use autoupdate_core::UpdateSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub updates: UpdateSettings,
    #[serde(default)]
    pub factory: Option<FactorySettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSettings {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served under `/static`.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorySettings {
    pub config_path: PathBuf,
    /// Re-hash every factory image at startup.
    #[serde(default)]
    pub validate: bool,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            public_dir: default_public_dir(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.updates.app_id.is_empty() {
            bail!("updates.app_id must be set");
        }
        if self.updates.tool_timeout_secs == 0 {
            bail!("updates.tool_timeout_secs must be greater than zero");
        }
        if let Some(urlbase) = &self.updates.urlbase
            && !(urlbase.starts_with("http://") || urlbase.starts_with("https://"))
        {
            bail!("updates.urlbase must be an http(s) URL, got {urlbase}");
        }
        if self.updates.archive_mode {
            if self.server.public_dir == self.updates.static_dir {
                bail!("archive_mode needs server.public_dir to differ from updates.static_dir");
            }
        } else if self.server.public_dir != self.updates.static_dir {
            // Artifacts and factory images live in static_dir but /static
            // serves public_dir.
            bail!(
                "server.public_dir ({}) must match updates.static_dir ({}) outside archive_mode",
                self.server.public_dir.display(),
                self.updates.static_dir.display()
            );
        }
        Ok(())
    }
}

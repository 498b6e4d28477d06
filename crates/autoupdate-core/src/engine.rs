// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Update decision engine
//!
//! Answers one ping at a time: parse the request, pick the factory or the
//! version-comparison path, make sure the artifact exists and describe where
//! to fetch it. Only a malformed request is reported back as an error; every
//! other failure becomes a "no update" answer.

use crate::build_cache::{ARTIFACT_FILE, BuildCache};
use crate::config::UpdateSettings;
use crate::digest::{ContentDigest, Sha1Digest};
use crate::error::{Result, UpdateError};
use crate::factory::FactoryConfig;
use crate::payload::{PayloadFormatter, UpdateOffer, UpdateResponse};
use crate::request::UpdateRequest;
use crate::tools::{ArtifactBuilder, ImageUnpacker, LatestImageResolver, ScriptTools};
use crate::version::{can_update, latest_version_from_path};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The external programs and services the engine relies on.
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn LatestImageResolver>,
    pub unpacker: Arc<dyn ImageUnpacker>,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub digest: Arc<dyn ContentDigest>,
}

impl Collaborators {
    /// Scripts from `settings.scripts_dir` and in-process SHA-1 digests.
    pub fn scripts(settings: &UpdateSettings) -> Self {
        let tools = Arc::new(ScriptTools::new(
            settings.scripts_dir.clone(),
            settings.tool_timeout(),
        ));
        Self {
            resolver: tools.clone(),
            unpacker: tools.clone(),
            builder: tools,
            digest: Arc::new(Sha1Digest),
        }
    }
}

#[derive(Debug)]
pub struct UpdateDecisionEngine {
    settings: UpdateSettings,
    factory: Option<Arc<FactoryConfig>>,
    resolver: Arc<dyn LatestImageResolver>,
    cache: BuildCache,
    formatter: PayloadFormatter,
}

impl UpdateDecisionEngine {
    pub fn new(settings: UpdateSettings, collaborators: Collaborators) -> Self {
        let cache = BuildCache::new(
            &settings,
            collaborators.unpacker,
            collaborators.builder,
            collaborators.digest,
        );
        let formatter = PayloadFormatter::new(settings.app_id.clone());
        Self {
            settings,
            factory: None,
            resolver: collaborators.resolver,
            cache,
            formatter,
        }
    }

    /// Serve pre-registered factory images instead of building updates.
    /// A config without entries leaves the engine in version mode.
    #[must_use]
    pub fn with_factory_config(mut self, factory: Arc<FactoryConfig>) -> Self {
        if factory.entries().is_empty() {
            warn!("Factory config has no entries, serving regular updates");
            self.factory = None;
        } else {
            self.factory = Some(factory);
        }
        self
    }

    pub fn is_factory_mode(&self) -> bool {
        self.factory.is_some()
    }

    /// Answer a ping body with a rendered response.
    ///
    /// `host` is the authority clients used to reach this server and `label`
    /// names a specific build under the static directory.
    pub async fn handle_ping(&self, body: &str, host: &str, label: Option<&str>) -> Result<String> {
        debug!("handle update ping");
        let request = UpdateRequest::parse(body)?.with_label(label.map(str::to_owned));
        let response = self.decide(&request, host).await;
        self.formatter.render(&response)
    }

    pub async fn decide(&self, request: &UpdateRequest, host: &str) -> UpdateResponse {
        if let Some(factory) = &self.factory {
            return Self::factory_response(factory, request, host);
        }

        match self.version_offer(request, host).await {
            Ok(Some(offer)) => {
                info!(codebase = %offer.codebase, "Returning update payload");
                UpdateResponse::Update(offer)
            }
            Ok(None) => {
                info!(
                    board = %request.board_id,
                    version = %request.client_version,
                    "No update"
                );
                UpdateResponse::NoUpdate
            }
            Err(e) => {
                warn!(board = %request.board_id, "Not offering an update: {e}");
                UpdateResponse::NoUpdate
            }
        }
    }

    fn factory_response(
        factory: &FactoryConfig,
        request: &UpdateRequest,
        host: &str,
    ) -> UpdateResponse {
        match factory.select_image(&request.board_id, &request.channel) {
            Ok(image) => {
                let codebase = format!("http://{host}/static/{}", image.image_name);
                info!(%codebase, board = %request.board_id, "Returning factory image");
                UpdateResponse::Update(UpdateOffer {
                    codebase,
                    hash: image.checksum.clone(),
                    size: image.size,
                })
            }
            Err(e) => {
                warn!(board = %request.board_id, channel = %request.channel, "{e}");
                UpdateResponse::NoUpdate
            }
        }
    }

    /// The latest image is only looked up when the comparison or the
    /// unlabelled build needs it.
    async fn version_offer(&self, request: &UpdateRequest, host: &str) -> Result<Option<UpdateOffer>> {
        let mut latest_image = None;

        if request.is_forced() {
            info!(board = %request.board_id, "Forced update requested");
        } else {
            let image = self.resolver.latest_image(&request.board_id).await?;
            let latest_version = latest_version_from_path(&image);
            if !can_update(&request.client_version, &latest_version)? {
                return Ok(None);
            }
            info!(latest = %latest_version, "Update found");
            latest_image = Some(image);
        }

        if let Some(label) = request.requested_label.as_deref() {
            return self.labelled_offer(label, host).await.map(Some);
        }

        let latest_image = match latest_image {
            Some(image) => image,
            None => self.resolver.latest_image(&request.board_id).await?,
        };
        self.latest_offer(&latest_image, host).await.map(Some)
    }

    async fn labelled_offer(&self, label: &str, host: &str) -> Result<UpdateOffer> {
        info!(label, "Client requested a specific build");
        let image_dir = self.label_dir(label).await?;
        let artifact = self.cache.ensure_artifact(&image_dir).await?;

        let base = self
            .settings
            .urlbase
            .clone()
            .unwrap_or_else(|| format!("http://{host}/static/archive"));
        let codebase = format!("{}/{label}/{ARTIFACT_FILE}", base.trim_end_matches('/'));

        Ok(UpdateOffer {
            codebase,
            hash: artifact.digest.hash,
            size: artifact.digest.size,
        })
    }

    async fn latest_offer(&self, latest_image: &Path, host: &str) -> Result<UpdateOffer> {
        let artifact = self.cache.ensure_artifact(latest_image).await?;

        Ok(UpdateOffer {
            codebase: format!("http://{host}/static/{ARTIFACT_FILE}"),
            hash: artifact.digest.hash,
            size: artifact.digest.size,
        })
    }

    /// `<static_dir>/<label>`, which must be an existing directory. Labels
    /// are a single path segment.
    async fn label_dir(&self, label: &str) -> Result<PathBuf> {
        if label.is_empty() || label == "." || label == ".." || label.contains(['/', '\\']) {
            return Err(UpdateError::ImageNotFound(format!("invalid label {label:?}")));
        }

        let image_dir = self.settings.static_dir.join(label);
        let is_dir = match tokio::fs::metadata(&image_dir).await {
            Ok(meta) => meta.is_dir(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if !is_dir {
            return Err(UpdateError::ImageNotFound(format!(
                "{} not found",
                image_dir.display()
            )));
        }
        Ok(image_dir)
    }
}

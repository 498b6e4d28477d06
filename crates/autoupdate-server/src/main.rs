// SPDX-License-Identifier: CC-BY-NC-ND-4.0

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use autoupdate_core::{
    Collaborators, ContentDigest, FactoryConfig, Sha1Digest, UpdateDecisionEngine, UpdateError,
};
use autoupdate_server::config::ServerConfig;
use autoupdate_server::handlers::{self, UpdateState};

#[derive(Debug, Parser)]
#[command(name = "autoupdate-server", about = "Answers device update pings")]
struct Args {
    /// Path to the server configuration file
    #[arg(default_value = "autoupdate.toml")]
    config: PathBuf,

    /// Verify factory image checksums, report the result and exit
    #[arg(long)]
    validate_factory_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("autoupdate_server=info,autoupdate_core=info")
        }))
        .init();

    let args = Args::parse();
    info!(path = %args.config.display(), "Loading configuration");
    let config = ServerConfig::from_file(&args.config)?;

    let factory = match &config.factory {
        Some(factory) => {
            let validate = factory.validate || args.validate_factory_config;
            let validator: Option<&dyn ContentDigest> =
                if validate { Some(&Sha1Digest) } else { None };
            let loaded = FactoryConfig::from_file(
                &factory.config_path,
                &config.updates.static_dir,
                validator,
            );
            match loaded {
                Ok(loaded) => {
                    info!(
                        path = %factory.config_path.display(),
                        entries = loaded.entries().len(),
                        "Factory config loaded"
                    );
                    Some(Arc::new(loaded))
                }
                Err(UpdateError::ConfigChecksumMismatch(mismatches)) => {
                    let report: Vec<String> = mismatches.iter().map(ToString::to_string).collect();
                    anyhow::bail!("Checksum mismatch in factory config file: {}", report.join("; "));
                }
                Err(e) => return Err(e).context("Failed to load factory config"),
            }
        }
        None if args.validate_factory_config => {
            anyhow::bail!("--validate-factory-config needs a [factory] section");
        }
        None => None,
    };

    if args.validate_factory_config {
        println!("Factory config looks good.");
        return Ok(());
    }

    if config.updates.archive_mode {
        info!("Serving update images straight out of the build archive");
        #[cfg(unix)]
        {
            autoupdate_server::archive::link_archive(
                &config.server.public_dir,
                &config.updates.static_dir,
            )?;
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("archive_mode needs symlink support");
        }
    }

    let mut engine =
        UpdateDecisionEngine::new(config.updates.clone(), Collaborators::scripts(&config.updates));
    if let Some(factory) = factory {
        engine = engine.with_factory_config(factory);
    }

    let state = UpdateState {
        engine: Arc::new(engine),
    };
    let app = handlers::router(state, &config.server.public_dir);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Autoupdate server listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

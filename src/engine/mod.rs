use std::io::IsTerminal;
use std::path::Path;

use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::Client;

use crate::catalog::select_target_version;
use crate::config::Settings;
use crate::engine::models::{ReleaseAsset, RunOutcome, SourceRepository, Toolchain};
use crate::engine::state::{BuildDecision, RunState};
use crate::env::WorkDir;
use crate::error::{PublishError, RunError};
use crate::mirror::{UptodownSession, VersionListing, resolve_download_url};
use crate::networking::{FetchedFile, Fetcher, http_client};
use crate::process::PatchInputs;
use crate::releases::list_release_assets;
use crate::storage::StorageManager;
use crate::updater::{
    ComponentVersion, ReleaseApi, check_for_rebuild, extract_triplet, publish, release_body,
    tag_for_artifact,
};
use crate::util::sha256_file;

pub mod models;
pub mod state;

/// Drives one `Check -> Build -> Publish` run against the project's own repository.
pub struct Reconciler<A: ReleaseApi> {
    pub state: RunState,
    settings: Settings,
    repository: String,
    api: A,
    pages: Client,
    fetcher: Fetcher,
    storage: StorageManager,
}

impl<A: ReleaseApi> Reconciler<A> {
    pub fn new(settings: Settings, repository: impl Into<String>, api: A) -> Self {
        let pages = http_client(settings.http_timeout);
        let fetcher = Fetcher::new(settings.download_timeout, settings.retry)
            .with_progress(std::io::stderr().is_terminal());
        let storage = StorageManager::new(settings.workdir.clone());
        Self {
            state: RunState::Check,
            settings,
            repository: repository.into(),
            api,
            pages,
            fetcher,
            storage,
        }
    }

    pub async fn run(&mut self) -> Result<RunOutcome, RunError> {
        loop {
            info!("engine: {}", self.state.label());
            let next = match self.state.clone() {
                RunState::Check => self.check().await,
                RunState::Build => self.build().await,
                RunState::Publish {
                    toolchain,
                    version,
                    output,
                } => self.publish(&toolchain, &version, &output).await,
                RunState::Skipped { version } => return Ok(RunOutcome::Skipped { version }),
                RunState::Published {
                    tag,
                    asset,
                    release_id,
                } => {
                    return Ok(RunOutcome::Published {
                        tag,
                        asset,
                        release_id,
                    });
                }
            };
            match next {
                Ok(state) => self.state = state,
                Err(err) => {
                    error!("engine: {} failed: {err}", self.state.label());
                    return Err(err);
                }
            }
        }
    }

    async fn check(&self) -> Result<RunState, RunError> {
        let decision = check_for_rebuild(
            &self.api,
            &self.repository,
            &self.settings.sources.patches.owner_repo,
            self.settings.failure_policy,
        )
        .await?;
        Ok(match decision {
            BuildDecision::Skip { version } => {
                info!("engine: {version} already published; nothing to do");
                RunState::Skipped { version }
            }
            BuildDecision::Build { reason } => {
                info!("engine: rebuilding ({reason})");
                RunState::Build
            }
        })
    }

    async fn build(&self) -> Result<RunState, RunError> {
        self.storage.prepare().await?;

        let sources = &self.settings.sources;
        let patches = self.fetch_release(&sources.patches).await?;
        let cli = self.fetch_release(&sources.cli).await?;
        let integrations = self.fetch_release(&sources.integrations).await?;

        let patches_path = self.storage.artifact_for(&sources.patches, &patches)?;
        let tag = tag_for_artifact(&file_name(&patches_path))?;
        let toolchain = Toolchain {
            cli: self.storage.artifact_for(&sources.cli, &cli)?,
            patches: patches_path,
            integrations: self.storage.artifact_for(&sources.integrations, &integrations)?,
            manifest: self.settings.manifest.clone(),
            patches_version: tag.trim_start_matches('v').to_owned(),
        };
        debug!("engine: toolchain {toolchain:?}");

        let version = select_target_version(
            &toolchain.manifest,
            &self.settings.package,
            self.settings.version_order,
        )
        .await?;

        let layout = self.storage.layout();
        let output = layout.output_package(&version);
        self.storage
            .claim_output(&output, self.settings.overwrite)
            .await?;

        let mut session = UptodownSession::open(
            &self.settings.mirror_app,
            self.settings.http_timeout,
            self.settings.retry,
        );
        let input = acquire_package(
            &mut session,
            &self.fetcher,
            layout,
            &version,
            self.settings.max_pages,
        )
        .await?;
        drop(session);

        let inputs = PatchInputs {
            cli: &toolchain.cli,
            patches: &toolchain.patches,
            integrations: &toolchain.integrations,
            input: &input.path,
            output: &output,
        };
        if let Err(err) = self.settings.runner.patch(&inputs, None).await {
            warn!("engine: {} stage failed; discarding package", err.stage());
            self.storage
                .discard_after_failure(&input.path, &output)
                .await;
            return Err(err.into());
        }

        Ok(RunState::Publish {
            toolchain,
            version,
            output,
        })
    }

    async fn publish(
        &self,
        toolchain: &Toolchain,
        version: &str,
        output: &Path,
    ) -> Result<RunState, RunError> {
        let tag = format!("v{}", toolchain.patches_version);
        let digest = sha256_file(output)
            .await
            .map_err(|e| PublishError::Io(format!("{}: {e}", output.display())))?;
        let components = [
            ComponentVersion {
                name: "Patches".into(),
                version: toolchain.patches_version.clone(),
            },
            ComponentVersion {
                name: "CLI".into(),
                version: component_version(&toolchain.cli),
            },
            ComponentVersion {
                name: "Integrations".into(),
                version: component_version(&toolchain.integrations),
            },
            ComponentVersion {
                name: "YouTube".into(),
                version: version.to_owned(),
            },
        ];
        let body = release_body(
            &components,
            &digest,
            &Utc::now().format("%Y-%m-%d").to_string(),
        );

        let release_id = publish(&self.api, &self.repository, &tag, output, &body).await?;
        Ok(RunState::Published {
            tag,
            asset: file_name(output),
            release_id,
        })
    }

    /// Fetch every asset of the latest release of `source` into the working directory.
    async fn fetch_release(
        &self,
        source: &SourceRepository,
    ) -> Result<Vec<ReleaseAsset>, RunError> {
        let url = source.latest_release_url();
        info!("engine: collecting {} assets from {url}", source.role.label());
        let mut assets = list_release_assets(&self.pages, &url, &self.settings.retry).await?;
        for asset in &mut assets {
            let dest = self.storage.layout().artifact(&asset.filename);
            let fetched = self.fetcher.fetch(&asset.url, &dest).await?;
            asset.byte_size = Some(fetched.byte_size);
        }
        Ok(assets)
    }
}

/// Resolve `version` on the mirror and download it as the input package.
pub async fn acquire_package<L: VersionListing>(
    listing: &mut L,
    fetcher: &Fetcher,
    layout: &WorkDir,
    version: &str,
    max_pages: u32,
) -> Result<FetchedFile, RunError> {
    let url = resolve_download_url(listing, version, max_pages).await?;
    let fetched = fetcher.fetch(&url, &layout.input_package(version)).await?;
    Ok(fetched)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn component_version(path: &Path) -> String {
    let name = file_name(path);
    extract_triplet(&name).unwrap_or(name)
}

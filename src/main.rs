use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::error;

mod catalog;
mod config;
mod engine;
mod env;
mod error;
mod mirror;
mod networking;
mod process;
mod releases;
mod storage;
#[cfg(test)]
mod test_support;
mod updater;
mod util;

use crate::config::{Cli, Command, Settings};
use crate::engine::Reconciler;
use crate::engine::models::RunOutcome;
use crate::engine::state::BuildDecision;
use crate::env::Credentials;
use crate::error::RunError;
use crate::mirror::{UptodownSession, resolve_download_url};
use crate::updater::{GithubClient, check_for_rebuild};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("patch-release: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let settings = Settings::from_options(&cli.options)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let credentials = Credentials::from_env()?;
            let api = GithubClient::new(Some(credentials.token), settings.http_timeout)
                .with_upload_timeout(settings.download_timeout);
            let mut reconciler = Reconciler::new(settings, credentials.repository, api);
            match reconciler.run().await? {
                RunOutcome::Skipped { version } => {
                    println!("skipped: {version} is already published");
                }
                RunOutcome::Published {
                    tag,
                    asset,
                    release_id,
                } => println!("published {asset} to {tag} (release {release_id})"),
            }
        }
        Command::Check => {
            let credentials = Credentials::from_env()?;
            let api = GithubClient::new(Some(credentials.token), settings.http_timeout);
            let decision = check_for_rebuild(
                &api,
                &credentials.repository,
                &settings.sources.patches.owner_repo,
                settings.failure_policy,
            )
            .await?;
            match decision {
                BuildDecision::Skip { version } => println!("skip {version}"),
                BuildDecision::Build { reason } => println!("build: {reason}"),
            }
        }
        Command::SelectVersion => {
            let version = catalog::select_target_version(
                &settings.manifest,
                &settings.package,
                settings.version_order,
            )
            .await?;
            println!("{version}");
        }
        Command::Resolve { version } => {
            let mut session =
                UptodownSession::open(&settings.mirror_app, settings.http_timeout, settings.retry);
            let url = resolve_download_url(&mut session, &version, settings.max_pages).await?;
            println!("{url}");
        }
    }
    Ok(())
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::catalog::{DEFAULT_PACKAGE, VersionOrder};
use crate::engine::models::{Role, SourceRepository};
use crate::engine::state::FailurePolicy;
use crate::env::{WorkDir, validate_repository};
use crate::error::ConfigError;
use crate::mirror::DEFAULT_MAX_PAGES;
use crate::process::{DEFAULT_STRIP_GLOBS, PatchRunner};
use crate::util::RetryPolicy;

pub const DEFAULT_MIRROR_APP: &str = "youtube";
pub const MANIFEST_FILE: &str = "patches.json";

#[derive(Parser, Debug)]
#[command(
    name = "patch-release",
    author,
    version,
    about = "Rebuild and publish a patched YouTube package whenever the patch toolchain releases"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub options: Options,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Check, build and publish (default).
    Run,
    /// Only compare the published tag with the upstream tag.
    Check,
    /// Print the version the manifest selects.
    SelectVersion,
    /// Print the mirror download URL for a version.
    Resolve { version: String },
}

#[derive(Args, Debug, Clone)]
pub struct Options {
    /// Directory holding downloaded artifacts and the patched output.
    #[arg(long, global = true, default_value = "work")]
    pub workdir: PathBuf,

    /// Compatibility manifest; defaults to patches.json inside the working directory.
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    #[arg(long, global = true, default_value = DEFAULT_PACKAGE)]
    pub package: String,

    /// Mirror app slug, as in https://<slug>.en.uptodown.com.
    #[arg(long, global = true, default_value = DEFAULT_MIRROR_APP)]
    pub mirror_app: String,

    #[arg(long, global = true, value_enum, default_value_t = VersionOrder::Lexical)]
    pub version_order: VersionOrder,

    /// Stop when a tag lookup fails instead of rebuilding.
    #[arg(long, global = true)]
    pub fail_closed: bool,

    /// Replace an existing output package.
    #[arg(long, global = true)]
    pub overwrite: bool,

    #[arg(long, global = true, default_value_t = 3)]
    pub retries: u32,

    #[arg(long, global = true, default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: u32,

    /// Timeout in seconds for page and API requests.
    #[arg(long, global = true, default_value_t = 30)]
    pub http_timeout: u64,

    /// Timeout in seconds for a single artifact download or the package upload.
    #[arg(long, global = true, default_value_t = 600)]
    pub download_timeout: u64,

    #[arg(long, global = true, default_value = "java")]
    pub java: PathBuf,

    #[arg(long, global = true, default_value = "zip")]
    pub zip: PathBuf,

    /// Archive glob removed before patching; repeat for several.
    #[arg(long = "strip", global = true)]
    pub strip: Vec<String>,

    #[arg(long, global = true, default_value = "revanced/revanced-patches")]
    pub patches_repo: String,

    #[arg(long, global = true, default_value = "revanced/revanced-cli")]
    pub cli_repo: String,

    #[arg(long, global = true, default_value = "revanced/revanced-integrations")]
    pub integrations_repo: String,
}

/// The three upstream repositories a build draws from.
#[derive(Clone, Debug)]
pub struct Sources {
    pub patches: SourceRepository,
    pub cli: SourceRepository,
    pub integrations: SourceRepository,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub workdir: WorkDir,
    pub manifest: PathBuf,
    pub package: String,
    pub mirror_app: String,
    pub version_order: VersionOrder,
    pub failure_policy: FailurePolicy,
    pub overwrite: bool,
    pub retry: RetryPolicy,
    pub max_pages: u32,
    pub http_timeout: Duration,
    pub download_timeout: Duration,
    pub runner: PatchRunner,
    pub sources: Sources,
}

impl Settings {
    pub fn from_options(options: &Options) -> Result<Self, ConfigError> {
        for repo in [
            &options.patches_repo,
            &options.cli_repo,
            &options.integrations_repo,
        ] {
            validate_repository(repo)?;
        }

        let workdir = WorkDir::new(&options.workdir);
        let manifest = options
            .manifest
            .clone()
            .unwrap_or_else(|| workdir.artifact(MANIFEST_FILE));
        let strip = if options.strip.is_empty() {
            DEFAULT_STRIP_GLOBS.iter().map(|g| (*g).to_owned()).collect()
        } else {
            options.strip.clone()
        };

        Ok(Self {
            workdir,
            manifest,
            package: options.package.clone(),
            mirror_app: options.mirror_app.clone(),
            version_order: options.version_order,
            failure_policy: if options.fail_closed {
                FailurePolicy::FailClosed
            } else {
                FailurePolicy::FailOpen
            },
            overwrite: options.overwrite,
            retry: RetryPolicy {
                retries: options.retries,
                ..RetryPolicy::default()
            },
            max_pages: options.max_pages,
            http_timeout: Duration::from_secs(options.http_timeout),
            download_timeout: Duration::from_secs(options.download_timeout),
            runner: PatchRunner::new(&options.java, &options.zip, strip),
            sources: Sources {
                patches: SourceRepository::new(Role::Patches, &options.patches_repo, ".jar"),
                cli: SourceRepository::new(Role::Cli, &options.cli_repo, "-all.jar"),
                integrations: SourceRepository::new(
                    Role::Integrations,
                    &options.integrations_repo,
                    ".apk",
                ),
            },
        })
    }
}

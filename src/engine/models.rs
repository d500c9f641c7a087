use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A downloadable file found on a release page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub url: String,
    pub filename: String,
    /// Known once the asset has been fetched.
    pub byte_size: Option<u64>,
}

/// Release as returned by the release metadata API.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseRecord {
    pub tag_name: String,
    pub id: u64,
    #[serde(default)]
    pub assets: Vec<RemoteAsset>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteAsset {
    pub name: String,
    pub id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Patches,
    Cli,
    Integrations,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Patches => "patches",
            Role::Cli => "cli",
            Role::Integrations => "integrations",
        }
    }
}

/// An upstream repository and the artifact taken from its latest release.
#[derive(Clone, Debug)]
pub struct SourceRepository {
    pub role: Role,
    pub owner_repo: String,
    pub wanted_suffix: String,
}

impl SourceRepository {
    pub fn new(
        role: Role,
        owner_repo: impl Into<String>,
        wanted_suffix: impl Into<String>,
    ) -> Self {
        Self {
            role,
            owner_repo: owner_repo.into(),
            wanted_suffix: wanted_suffix.into(),
        }
    }

    pub fn latest_release_url(&self) -> String {
        format!("https://github.com/{}/releases/latest", self.owner_repo)
    }

    /// First asset whose name ends with the wanted suffix.
    pub fn pick<'a>(&self, assets: &'a [ReleaseAsset]) -> Option<&'a ReleaseAsset> {
        assets
            .iter()
            .find(|asset| asset.filename.ends_with(&self.wanted_suffix))
    }
}

/// Tool artifacts materialized in the working directory.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub cli: PathBuf,
    pub patches: PathBuf,
    pub integrations: PathBuf,
    pub manifest: PathBuf,
    pub patches_version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped { version: String },
    Published {
        tag: String,
        asset: String,
        release_id: u64,
    },
}

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const TOKEN_VAR: &str = "GITHUB_TOKEN";
pub const REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";

/// Publishing credentials, read once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    pub repository: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("repository", &self.repository)
            .finish()
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build credentials from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = lookup(TOKEN_VAR)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingEnv(TOKEN_VAR))?;
        let repository = lookup(REPOSITORY_VAR)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingEnv(REPOSITORY_VAR))?;
        validate_repository(&repository)?;
        Ok(Self { token, repository })
    }
}

/// Accept only `owner/repo` with two non-empty segments.
pub fn validate_repository(value: &str) -> Result<(), ConfigError> {
    let mut parts = value.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => Ok(()),
        _ => Err(ConfigError::InvalidRepository(value.to_owned())),
    }
}

/// File layout of one run inside the working directory.
#[derive(Clone, Debug)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    pub fn input_package(&self, version: &str) -> PathBuf {
        self.root.join(input_package_name(version))
    }

    pub fn output_package(&self, version: &str) -> PathBuf {
        self.root.join(output_package_name(version))
    }
}

pub fn input_package_name(version: &str) -> String {
    format!("youtube-v{version}.apk")
}

pub fn output_package_name(version: &str) -> String {
    format!("youtube-revanced-v{version}.apk")
}

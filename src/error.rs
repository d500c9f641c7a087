use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("invalid repository {0:?}: expected owner/repo")]
    InvalidRepository(String),
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(String),

    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("no compatible versions found for {package}")]
    NotFound { package: String },
}

#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("version {version} not found on mirror after {pages} page(s)")]
    VersionNotFound { version: String, pages: u32 },

    #[error("mirror entry for {version} has no download token")]
    MissingDownloadToken { version: String },

    #[error("mirror request failed: {0}")]
    Request(String),

    #[error("mirror returned HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Error, Debug, Clone)]
pub enum TransferError {
    #[error("download failed with HTTP {0}")]
    HttpStatus(u16),

    #[error("download request failed: {0}")]
    Request(String),

    #[error("download interrupted: {0}")]
    Interrupted(String),

    #[error("download incomplete: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("failed to write download: {0}")]
    Io(String),
}

impl TransferError {
    /// Whether a retry has a chance of succeeding.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::HttpStatus(code) => *code == 408 || *code == 429 || *code >= 500,
            TransferError::Request(_)
            | TransferError::Interrupted(_)
            | TransferError::Incomplete { .. } => true,
            TransferError::Io(_) => false,
        }
    }
}

impl ResolutionError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            ResolutionError::Request(_) => true,
            ResolutionError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ResolutionError::VersionNotFound { .. }
            | ResolutionError::MissingDownloadToken { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("{stage} stage failed with exit code {}", exit_code_text(.code))]
    ProcessFailed {
        stage: &'static str,
        code: Option<i32>,
    },

    #[error("failed to start {stage} stage: {message}")]
    Spawn { stage: &'static str, message: String },

    #[error("input package {path} is not a valid archive: {message}")]
    InvalidPackage { path: String, message: String },
}

fn exit_code_text(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
}

impl PatchError {
    #[must_use]
    pub fn stage(&self) -> &'static str {
        match self {
            PatchError::ProcessFailed { stage, .. } | PatchError::Spawn { stage, .. } => *stage,
            PatchError::InvalidPackage { .. } => "inspect",
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum PublishError {
    #[error("{context} failed with HTTP {status}")]
    Api { context: String, status: u16 },

    #[error("release API request failed: {0}")]
    Request(String),

    #[error("failed to read release asset: {0}")]
    Io(String),

    #[error("cannot derive a release tag from {0}")]
    MissingVersion(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("output {0} already exists; pass --overwrite to replace it")]
    OutputExists(String),

    #[error("working directory error: {0}")]
    Io(String),

    #[error("no {role} artifact matching *{suffix} in {repository}")]
    MissingArtifact {
        role: &'static str,
        suffix: String,
        repository: String,
    },
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Terminal cause of a failed run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

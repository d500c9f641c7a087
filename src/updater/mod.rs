use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use log::{debug, info, warn};
use regex::Regex;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::engine::models::ReleaseRecord;
use crate::engine::state::{BuildDecision, FailurePolicy};
use crate::error::PublishError;
use crate::networking::http_client;

pub const GITHUB_API_URL: &str = "https://api.github.com";
pub const GITHUB_UPLOAD_URL: &str = "https://uploads.github.com";
pub const PACKAGE_CONTENT_TYPE: &str = "application/vnd.android.package-archive";

static TRIPLET: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)\.(\d+)").ok());

/// Release metadata operations used by the reconciler.
pub trait ReleaseApi {
    /// Tag of the latest published release, `None` when the repository has none.
    async fn latest_tag(&self, repository: &str) -> Result<Option<String>, PublishError>;

    async fn release_by_tag(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<ReleaseRecord>, PublishError>;

    async fn delete_asset(&self, repository: &str, asset_id: u64) -> Result<(), PublishError>;

    async fn create_release(
        &self,
        repository: &str,
        tag: &str,
        body: &str,
    ) -> Result<ReleaseRecord, PublishError>;

    async fn upload_asset(
        &self,
        repository: &str,
        release_id: u64,
        name: &str,
        path: &Path,
    ) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Deserialize)]
struct LatestRelease {
    tag_name: String,
}

#[derive(Debug, Serialize)]
struct NewRelease<'a> {
    tag_name: &'a str,
    name: &'a str,
    body: &'a str,
}

/// GitHub REST implementation of [`ReleaseApi`].
#[derive(Clone)]
pub struct GithubClient {
    client: Client,
    token: Option<String>,
    api_base: String,
    upload_base: String,
    upload_timeout: Duration,
}

impl GithubClient {
    pub fn new(token: Option<String>, timeout: Duration) -> Self {
        Self::with_endpoints(token, timeout, GITHUB_API_URL, GITHUB_UPLOAD_URL)
    }

    pub fn with_endpoints(
        token: Option<String>,
        timeout: Duration,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        Self {
            client: http_client(timeout),
            token,
            api_base: api_base.into(),
            upload_base: upload_base.into(),
            upload_timeout: timeout,
        }
    }

    /// Whole-request limit for asset uploads, which carry the full package.
    #[must_use]
    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        context: &str,
    ) -> Result<reqwest::Response, PublishError> {
        self.request(builder)
            .send()
            .await
            .map_err(|err| PublishError::Request(format!("{context}: {err}")))
    }
}

fn api_error(context: impl Into<String>, status: StatusCode) -> PublishError {
    PublishError::Api {
        context: context.into(),
        status: status.as_u16(),
    }
}

impl ReleaseApi for GithubClient {
    async fn latest_tag(&self, repository: &str) -> Result<Option<String>, PublishError> {
        let url = format!("{}/repos/{repository}/releases/latest", self.api_base);
        let context = format!("latest release lookup for {repository}");
        let response = self.send(self.client.get(&url), &context).await?;
        match response.status() {
            StatusCode::OK => {
                let release: LatestRelease = response
                    .json()
                    .await
                    .map_err(|err| PublishError::Request(format!("{context}: {err}")))?;
                Ok(Some(release.tag_name))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(api_error(context, status)),
        }
    }

    async fn release_by_tag(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<ReleaseRecord>, PublishError> {
        let url = format!("{}/repos/{repository}/releases/tags/{tag}", self.api_base);
        let context = format!("release lookup for {tag}");
        let response = self.send(self.client.get(&url), &context).await?;
        match response.status() {
            StatusCode::OK => response
                .json()
                .await
                .map(Some)
                .map_err(|err| PublishError::Request(format!("{context}: {err}"))),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(api_error(context, status)),
        }
    }

    async fn delete_asset(&self, repository: &str, asset_id: u64) -> Result<(), PublishError> {
        let url = format!("{}/repos/{repository}/releases/assets/{asset_id}", self.api_base);
        let context = format!("delete of asset {asset_id}");
        let response = self.send(self.client.delete(&url), &context).await?;
        if response.status() != StatusCode::NO_CONTENT {
            return Err(api_error(context, response.status()));
        }
        Ok(())
    }

    async fn create_release(
        &self,
        repository: &str,
        tag: &str,
        body: &str,
    ) -> Result<ReleaseRecord, PublishError> {
        let url = format!("{}/repos/{repository}/releases", self.api_base);
        let context = format!("creation of release {tag}");
        let payload = NewRelease {
            tag_name: tag,
            name: tag,
            body,
        };
        let response = self
            .send(self.client.post(&url).json(&payload), &context)
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(api_error(context, response.status()));
        }
        response
            .json()
            .await
            .map_err(|err| PublishError::Request(format!("{context}: {err}")))
    }

    async fn upload_asset(
        &self,
        repository: &str,
        release_id: u64,
        name: &str,
        path: &Path,
    ) -> Result<(), PublishError> {
        let mut url = Url::parse(&format!(
            "{}/repos/{repository}/releases/{release_id}/assets",
            self.upload_base
        ))
        .map_err(|err| PublishError::Request(format!("upload url: {err}")))?;
        url.query_pairs_mut().append_pair("name", name);

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| PublishError::Io(format!("{}: {err}", path.display())))?;
        let context = format!("upload of {name}");
        let response = self
            .send(
                self.client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, PACKAGE_CONTENT_TYPE)
                    .timeout(self.upload_timeout)
                    .body(bytes),
                &context,
            )
            .await?;
        if response.status() != StatusCode::CREATED {
            return Err(api_error(context, response.status()));
        }
        Ok(())
    }
}

/// Numeric `x.y.z` part of a tag or file name (`v4.16.0-release` -> `4.16.0`).
pub fn extract_triplet(text: &str) -> Option<String> {
    TRIPLET
        .as_ref()?
        .captures(text)
        .map(|caps| format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

/// Release tag derived from the version embedded in an artifact file name.
pub fn tag_for_artifact(filename: &str) -> Result<String, PublishError> {
    extract_triplet(filename)
        .map(|version| format!("v{version}"))
        .ok_or_else(|| PublishError::MissingVersion(filename.to_owned()))
}

/// Compare our latest tag with the patch tool's latest tag.
pub fn decide(
    current: Result<Option<String>, PublishError>,
    upstream: Result<Option<String>, PublishError>,
    policy: FailurePolicy,
) -> Result<BuildDecision, PublishError> {
    let (current, upstream) = match (current, upstream) {
        (Ok(current), Ok(upstream)) => (current, upstream),
        (Err(err), _) | (_, Err(err)) => {
            return match policy {
                FailurePolicy::FailOpen => {
                    warn!("check: tag lookup failed ({err}); building anyway");
                    Ok(BuildDecision::Build {
                        reason: format!("tag lookup failed: {err}"),
                    })
                }
                FailurePolicy::FailClosed => Err(err),
            };
        }
    };

    let current_version = current.as_deref().and_then(extract_triplet);
    let upstream_version = upstream.as_deref().and_then(extract_triplet);
    debug!(
        "check: current={current:?} ({current_version:?}) upstream={upstream:?} ({upstream_version:?})"
    );

    match (current_version, upstream_version) {
        (Some(ours), Some(theirs)) if ours == theirs => Ok(BuildDecision::Skip { version: ours }),
        (ours, theirs) => Ok(BuildDecision::Build {
            reason: format!(
                "published {} differs from upstream {}",
                ours.as_deref().unwrap_or("none"),
                theirs.as_deref().unwrap_or("none")
            ),
        }),
    }
}

/// Run both tag lookups and decide whether to rebuild.
pub async fn check_for_rebuild<A: ReleaseApi>(
    api: &A,
    own_repository: &str,
    upstream_repository: &str,
    policy: FailurePolicy,
) -> Result<BuildDecision, PublishError> {
    let current = api.latest_tag(own_repository).await;
    let upstream = api.latest_tag(upstream_repository).await;
    let decision = decide(current, upstream, policy)?;
    info!("check: {decision:?}");
    Ok(decision)
}

/// Attach `output` to the release tagged `tag`, creating the release when needed.
pub async fn publish<A: ReleaseApi>(
    api: &A,
    repository: &str,
    tag: &str,
    output: &Path,
    body: &str,
) -> Result<u64, PublishError> {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PublishError::Io(format!("{} has no file name", output.display())))?;

    let release_id = match api.release_by_tag(repository, tag).await? {
        Some(existing) => {
            info!("publish: reusing release {tag} (id {})", existing.id);
            for asset in existing.assets.iter().filter(|asset| asset.name == name) {
                info!("publish: replacing existing asset {} (id {})", asset.name, asset.id);
                api.delete_asset(repository, asset.id).await?;
            }
            existing.id
        }
        None => {
            let created = api.create_release(repository, tag, body).await?;
            info!("publish: created release {tag} (id {})", created.id);
            created.id
        }
    };

    api.upload_asset(repository, release_id, &name, output).await?;
    info!("publish: uploaded {name} to {repository}@{tag}");
    Ok(release_id)
}

/// One component version line of a release body.
#[derive(Clone, Debug)]
pub struct ComponentVersion {
    pub name: String,
    pub version: String,
}

pub fn release_body(components: &[ComponentVersion], sha256: &str, built_on: &str) -> String {
    let mut body = String::from("## Components\n\n");
    for component in components {
        body.push_str(&format!("- {}: `{}`\n", component.name, component.version));
    }
    body.push_str(&format!("\nSHA-256: `{sha256}`\n\nBuilt on {built_on}.\n"));
    body
}

use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::error::{ResolutionError, TransferError};
use crate::networking::{fetch_text, http_client};
use crate::util::{RetryPolicy, retry};

pub const DOWNLOAD_BASE: &str = "https://dw.uptodown.com/dwn/";
pub const DEFAULT_MAX_PAGES: u32 = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionEntry {
    pub version: String,
    pub detail_url: String,
}

/// A paginated version listing on the mirror.
pub trait VersionListing {
    /// Entries of listing page `index` (0-based), `None` once nothing more can be loaded.
    async fn page(&mut self, index: u32) -> Result<Option<Vec<VersionEntry>>, ResolutionError>;

    /// Download token published on the detail page of `entry`.
    async fn download_token(
        &mut self,
        entry: &VersionEntry,
    ) -> Result<Option<String>, ResolutionError>;

    /// Direct download URL for a token.
    fn download_url(&self, token: &str) -> String {
        download_url(token)
    }
}

/// Scan at most `max_pages` listing pages for `version` and build its direct download URL.
pub async fn resolve_download_url<L: VersionListing>(
    listing: &mut L,
    version: &str,
    max_pages: u32,
) -> Result<String, ResolutionError> {
    let mut scanned = 0;
    while scanned < max_pages {
        let Some(entries) = listing.page(scanned).await? else {
            debug!("mirror: listing exhausted after {scanned} page(s)");
            break;
        };
        scanned += 1;
        debug!("mirror: page {scanned} lists {} version(s)", entries.len());

        if let Some(entry) = entries.iter().find(|entry| entry.version == version) {
            info!("mirror: found {version} at {}", entry.detail_url);
            let token = listing.download_token(entry).await?.ok_or_else(|| {
                ResolutionError::MissingDownloadToken {
                    version: version.to_owned(),
                }
            })?;
            return Ok(listing.download_url(&token));
        }
    }

    warn!("mirror: {version} not found after {scanned} page(s)");
    Err(ResolutionError::VersionNotFound {
        version: version.to_owned(),
        pages: scanned,
    })
}

pub fn download_url(token: &str) -> String {
    format!("{DOWNLOAD_BASE}{token}")
}

/// Listing session on Uptodown; one per resolution.
pub struct UptodownSession {
    client: Client,
    app_base: String,
    app_code: Option<String>,
    retry: RetryPolicy,
}

impl UptodownSession {
    /// Open a session for the app published under `https://<app>.en.uptodown.com`.
    pub fn open(app: &str, timeout: Duration, retry: RetryPolicy) -> Self {
        Self::with_base(
            format!("https://{app}.en.uptodown.com/android"),
            http_client(timeout),
            retry,
        )
    }

    pub fn with_base(app_base: impl Into<String>, client: Client, retry: RetryPolicy) -> Self {
        let app_base = app_base.into().trim_end_matches('/').to_owned();
        debug!("mirror: session opened for {app_base}");
        Self {
            client,
            app_base,
            app_code: None,
            retry,
        }
    }

    async fn get(&self, url: &str) -> Result<String, ResolutionError> {
        retry(&self.retry, "mirror", ResolutionError::is_transient, || async {
            fetch_text(&self.client, url).await.map_err(|err| match err {
                TransferError::HttpStatus(status) => ResolutionError::HttpStatus {
                    status,
                    url: url.to_owned(),
                },
                other => ResolutionError::Request(other.to_string()),
            })
        })
        .await
    }

    fn absolute(&self, href: &str) -> String {
        Url::parse(&self.app_base)
            .and_then(|base| base.join(href))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| href.to_owned())
    }
}

impl VersionListing for UptodownSession {
    async fn page(&mut self, index: u32) -> Result<Option<Vec<VersionEntry>>, ResolutionError> {
        if index == 0 {
            let body = self.get(&format!("{}/versions", self.app_base)).await?;
            let (entries, code) = parse_versions_page(&body);
            if code.is_none() {
                debug!("mirror: no load-more control on the versions page");
            }
            self.app_code = code;
            let entries = entries
                .into_iter()
                .map(|entry| VersionEntry {
                    detail_url: self.absolute(&entry.detail_url),
                    ..entry
                })
                .collect();
            return Ok(Some(entries));
        }

        let Some(code) = self.app_code.clone() else {
            return Ok(None);
        };
        // Page 1 of the listing is the HTML page itself.
        let url = format!("{}/apps/{code}/versions/{}", self.app_base, index + 1);
        let body = self.get(&url).await?;
        let entries = parse_versions_json(&body)?;
        if entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            entries
                .into_iter()
                .map(|entry| VersionEntry {
                    detail_url: self.absolute(&entry.detail_url),
                    ..entry
                })
                .collect(),
        ))
    }

    async fn download_token(
        &mut self,
        entry: &VersionEntry,
    ) -> Result<Option<String>, ResolutionError> {
        let body = self.get(&entry.detail_url).await?;
        Ok(parse_download_token(&body))
    }
}

impl Drop for UptodownSession {
    fn drop(&mut self) {
        debug!("mirror: session closed for {}", self.app_base);
    }
}

/// Version entries of the HTML listing plus the app code used to load more.
pub fn parse_versions_page(html: &str) -> (Vec<VersionEntry>, Option<String>) {
    let document = Html::parse_document(html);
    let (Ok(entry_selector), Ok(version_selector), Ok(code_selector)) = (
        Selector::parse("div[data-url]"),
        Selector::parse("span.version"),
        Selector::parse("#detail-app-name[data-code], [data-code]"),
    ) else {
        return (Vec::new(), None);
    };

    let entries = document
        .select(&entry_selector)
        .filter_map(|div| {
            let detail_url = div.value().attr("data-url")?.trim().to_owned();
            let version = div
                .select(&version_selector)
                .next()?
                .text()
                .collect::<String>()
                .trim()
                .to_owned();
            (!version.is_empty() && !detail_url.is_empty()).then_some(VersionEntry {
                version,
                detail_url,
            })
        })
        .collect();

    let code = document
        .select(&code_selector)
        .filter_map(|el| el.value().attr("data-code"))
        .map(str::trim)
        .find(|code| !code.is_empty())
        .map(str::to_owned);

    (entries, code)
}

/// Entries of a "load more" listing response.
pub fn parse_versions_json(body: &str) -> Result<Vec<VersionEntry>, ResolutionError> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|e| ResolutionError::Request(format!("unexpected listing payload: {e}")))?;
    let Some(items) = payload.get("data").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let version = item.get("version")?.as_str()?.trim().to_owned();
            let detail_url = match item.get("versionURL")? {
                Value::String(url) => url.clone(),
                Value::Object(map) => map.get("url")?.as_str()?.to_owned(),
                _ => return None,
            };
            Some(VersionEntry {
                version,
                detail_url,
            })
        })
        .collect())
}

pub fn parse_download_token(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("#detail-download-button[data-url]").ok()?;
    document
        .select(&selector)
        .filter_map(|button| button.value().attr("data-url"))
        .map(str::trim)
        .find(|token| !token.is_empty())
        .map(str::to_owned)
}

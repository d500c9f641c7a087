use log::{debug, info};
use reqwest::{Client, Url};
use scraper::{Html, Selector};

use crate::engine::models::ReleaseAsset;
use crate::error::TransferError;
use crate::networking::fetch_text;
use crate::util::{RetryPolicy, retry};

const DOWNLOAD_PATH_MARKER: &str = "/releases/download/";
const SIGNATURE_SUFFIX: &str = ".asc";

/// List the downloadable assets of a release page, signatures excluded.
pub async fn list_release_assets(
    client: &Client,
    release_url: &str,
    policy: &RetryPolicy,
) -> Result<Vec<ReleaseAsset>, TransferError> {
    let base = Url::parse(release_url)
        .map_err(|e| TransferError::Request(format!("invalid release url {release_url}: {e}")))?;
    let page = fetch_page(client, release_url, policy).await?;
    let mut assets = parse_release_assets(&page, &base);

    // Release pages defer long asset lists to separately loaded fragments.
    for fragment in asset_fragments(&page, &base) {
        debug!("releases: loading asset fragment {fragment}");
        let body = fetch_page(client, &fragment, policy).await?;
        assets.extend(parse_release_assets(&body, &base));
    }

    info!("releases: {} asset(s) on {release_url}", assets.len());
    Ok(assets)
}

async fn fetch_page(
    client: &Client,
    url: &str,
    policy: &RetryPolicy,
) -> Result<String, TransferError> {
    retry(policy, "releases", TransferError::is_transient, || fetch_text(client, url)).await
}

pub fn parse_release_assets(html: &str, base: &Url) -> Vec<ReleaseAsset> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|link| link.value().attr("href"))
        .filter(|href| href.contains(DOWNLOAD_PATH_MARKER))
        .filter_map(|href| base.join(href).ok())
        .filter_map(|url| {
            let filename = url.path_segments()?.next_back()?.to_owned();
            if filename.is_empty() || filename.ends_with(SIGNATURE_SUFFIX) {
                return None;
            }
            Some(ReleaseAsset {
                url: url.to_string(),
                filename,
                byte_size: None,
            })
        })
        .collect()
}

pub fn asset_fragments(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("include-fragment[src*=\"expanded_assets\"]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|fragment| fragment.value().attr("src"))
        .filter_map(|src| base.join(src).ok())
        .map(|url| url.to_string())
        .collect()
}

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::TransferError;
use crate::util::{RetryPolicy, format_size, retry};

pub const USER_AGENT: &str = concat!(
    "patch-release/",
    env!("CARGO_PKG_VERSION"),
    " (release rebuild automation)"
);

/// Build the HTTP client shared by page scraping and API calls.
pub fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|err| {
            warn!("network client: falling back to default HTTP client configuration ({err})");
            Client::new()
        })
}

/// Fetch a page body as text, failing on any non-success status.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, TransferError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| TransferError::Request(format!("GET {url}: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(TransferError::HttpStatus(status.as_u16()));
    }
    response
        .text()
        .await
        .map_err(|e| TransferError::Interrupted(format!("GET {url}: {e}")))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    pub byte_size: u64,
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    retry: RetryPolicy,
    show_progress: bool,
}

impl Fetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            client: http_client(timeout),
            retry,
            show_progress: true,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Download `url` to `dest`. `dest` only ever appears once the body is complete.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<FetchedFile, TransferError> {
        info!("fetch: {url} -> {}", dest.display());
        let fetched = retry(&self.retry, "fetch", TransferError::is_transient, || {
            self.fetch_once(url, dest)
        })
        .await?;
        info!(
            "fetch: wrote {} to {}",
            format_size(fetched.byte_size),
            fetched.path.display()
        );
        Ok(fetched)
    }

    async fn fetch_once(&self, url: &str, dest: &Path) -> Result<FetchedFile, TransferError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransferError::Request(e.to_string()))?;
        if response.status() != StatusCode::OK {
            warn!("fetch: {url} returned HTTP {}", response.status());
            return Err(TransferError::HttpStatus(response.status().as_u16()));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::Io(format!("failed to create download dir: {e}")))?;
        }
        let part = part_path(dest);
        let total = response.content_length();
        let progress = self.progress_bar(total, dest);

        let written = match write_body(response, &part, &progress).await {
            Ok(written) => written,
            Err(err) => {
                progress.abandon();
                let _ = fs::remove_file(&part).await;
                return Err(err);
            }
        };
        progress.finish_and_clear();

        if let Some(total) = total
            && written < total
        {
            let _ = fs::remove_file(&part).await;
            return Err(TransferError::Incomplete {
                received: written,
                expected: total,
            });
        }

        fs::rename(&part, dest)
            .await
            .map_err(|e| TransferError::Io(format!("failed to move download into place: {e}")))?;
        debug!("fetch: {} complete ({written} bytes)", dest.display());
        Ok(FetchedFile {
            path: dest.to_path_buf(),
            byte_size: written,
        })
    }

    fn progress_bar(&self, total: Option<u64>, dest: &Path) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = match total {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        let template = if total.is_some() {
            "{msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}"
        } else {
            "{msg} {spinner} {bytes} {bytes_per_sec}"
        };
        bar.set_style(
            ProgressStyle::with_template(template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(
            dest.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        bar
    }
}

async fn write_body(
    response: reqwest::Response,
    part: &Path,
    progress: &ProgressBar,
) -> Result<u64, TransferError> {
    let mut file = File::create(part)
        .await
        .map_err(|e| TransferError::Io(format!("failed to create file: {e}")))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransferError::Interrupted(e.to_string()))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::Io(format!("write error: {e}")))?;
        written += chunk.len() as u64;
        progress.set_position(written);
    }
    file.flush()
        .await
        .map_err(|e| TransferError::Io(format!("flush error: {e}")))?;
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("download"));
    name.push(".part");
    dest.with_file_name(name)
}

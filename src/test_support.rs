//! Minimal scripted HTTP server for exercising real `reqwest` round trips.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::engine::models::ReleaseRecord;
use crate::error::PublishError;
use crate::updater::ReleaseApi;

pub struct HttpReply {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
    declared_length: Option<usize>,
    delay: Duration,
}

impl HttpReply {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            reason: "OK",
            content_type: "application/octet-stream",
            body,
            declared_length: None,
            delay: Duration::ZERO,
        }
    }

    pub fn html(body: &str) -> Self {
        Self {
            content_type: "text/html; charset=utf-8",
            ..Self::ok(body.as_bytes().to_vec())
        }
    }

    pub fn json(status: u16, reason: &'static str, body: &str) -> Self {
        Self {
            status,
            reason,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
            declared_length: None,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16, reason: &'static str) -> Self {
        Self {
            status,
            reason,
            content_type: "text/plain",
            body: Vec::new(),
            declared_length: None,
            delay: Duration::ZERO,
        }
    }

    /// Announce `declared` bytes but close the connection after `body`.
    pub fn truncated(body: Vec<u8>, declared: usize) -> Self {
        Self {
            declared_length: Some(declared),
            ..Self::ok(body)
        }
    }

    /// Hold the response back for `delay` after the request has been read.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub request_line: String,
    pub body: Vec<u8>,
}

pub struct TestServer {
    base: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

/// Answer one connection per scripted reply, in order, then stop listening.
pub async fn serve(replies: Vec<HttpReply>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));

    let task_hits = hits.clone();
    let task_requests = requests.clone();
    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            if let Some(recorded) = read_request(&mut stream).await {
                task_requests.lock().unwrap().push(recorded);
            }
            task_hits.fetch_add(1, Ordering::SeqCst);
            if !reply.delay.is_zero() {
                tokio::time::sleep(reply.delay).await;
            }
            let head = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                reply.status,
                reply.reason,
                reply.content_type,
                reply.declared_length.unwrap_or(reply.body.len())
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&reply.body).await;
            let _ = stream.shutdown().await;
        }
    });

    TestServer {
        base: format!("http://{addr}"),
        hits,
        requests,
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }

    Some(RecordedRequest {
        request_line: head.lines().next().unwrap_or_default().to_owned(),
        body,
    })
}

/// In-memory release API that records every call it receives.
#[derive(Default)]
pub struct FakeReleaseApi {
    latest: HashMap<String, String>,
    releases: HashMap<String, ReleaseRecord>,
    unreachable: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeReleaseApi {
    pub const CREATED_ID: u64 = 900;

    pub fn with_latest(mut self, repository: &str, tag: &str) -> Self {
        self.latest.insert(repository.to_owned(), tag.to_owned());
        self
    }

    pub fn with_release(mut self, repository: &str, release: ReleaseRecord) -> Self {
        self.releases
            .insert(format!("{repository}@{}", release.tag_name), release);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ReleaseApi for FakeReleaseApi {
    async fn latest_tag(&self, repository: &str) -> Result<Option<String>, PublishError> {
        self.record(format!("latest_tag {repository}"));
        if self.unreachable {
            return Err(PublishError::Request("connection refused".into()));
        }
        Ok(self.latest.get(repository).cloned())
    }

    async fn release_by_tag(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<ReleaseRecord>, PublishError> {
        self.record(format!("release_by_tag {tag}"));
        Ok(self.releases.get(&format!("{repository}@{tag}")).cloned())
    }

    async fn delete_asset(&self, _repository: &str, asset_id: u64) -> Result<(), PublishError> {
        self.record(format!("delete_asset {asset_id}"));
        Ok(())
    }

    async fn create_release(
        &self,
        _repository: &str,
        tag: &str,
        _body: &str,
    ) -> Result<ReleaseRecord, PublishError> {
        self.record(format!("create_release {tag}"));
        Ok(ReleaseRecord {
            tag_name: tag.to_owned(),
            id: Self::CREATED_ID,
            assets: Vec::new(),
        })
    }

    async fn upload_asset(
        &self,
        _repository: &str,
        release_id: u64,
        name: &str,
        path: &Path,
    ) -> Result<(), PublishError> {
        self.record(format!("upload_asset {release_id} {name}"));
        if !path.is_file() {
            return Err(PublishError::Io(format!("{} missing", path.display())));
        }
        Ok(())
    }
}

use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::{Client, Response};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::engine::models::Manifest;
use crate::error::{Result, SyncError};
use crate::util::{discard, format_speed};

const USER_AGENT: &str = concat!("preload-sync/", env!("CARGO_PKG_VERSION"));

/// HTTP transport for manifests and resource bodies.
#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    /// GET `url` and return the whole body.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.get(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| SyncError::network(url, e))?;
        Ok(body.to_vec())
    }

    pub async fn fetch_manifest(&self, url: &str) -> Result<Manifest> {
        let body = self.fetch(url).await?;
        Manifest::from_slice(&body, url)
    }

    /// Stream the body of `url` into `dest` and sync it to disk.
    ///
    /// `dest` should be a staging path; on failure whatever was written there
    /// is removed.
    pub async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.get(url).await?;
        match stream_to_file(url, response, dest).await {
            Ok(written) => Ok(written),
            Err(err) => {
                discard(dest).await;
                Err(err)
            }
        }
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::RemoteStatus {
                url: url.to_owned(),
                status,
            });
        }
        Ok(response)
    }
}

async fn stream_to_file(url: &str, response: Response, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::write(parent, e))?;
    }
    let mut file = File::create(dest)
        .await
        .map_err(|e| SyncError::write(dest, e))?;

    let total = response.content_length();
    let started = Instant::now();
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SyncError::network(url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::write(dest, e))?;
        downloaded += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| SyncError::write(dest, e))?;
    file.sync_all()
        .await
        .map_err(|e| SyncError::write(dest, e))?;

    if let Some(total) = total
        && downloaded < total
    {
        return Err(SyncError::Truncated {
            url: url.to_owned(),
            received: downloaded,
            expected: total,
        });
    }

    let elapsed = started.elapsed().as_secs_f32();
    let speed = if elapsed > 0.0 {
        downloaded as f32 / elapsed
    } else {
        downloaded as f32
    };
    debug!(
        "fetched {url}: {downloaded} bytes at {}",
        format_speed(speed)
    );
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> NetworkClient {
        NetworkClient::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn fetches_and_decodes_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"Name":"a","MD5":"d2","Version":2,"Path":"http://cdn/a"}]"#,
            ))
            .mount(&server)
            .await;

        let manifest = client()
            .fetch_manifest(&format!("{}/manifest.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(manifest.get("a").unwrap().version, 2);
    }

    #[tokio::test]
    async fn non_success_status_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/manifest.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client()
            .fetch(&format!("{}/manifest.json", server.uri()))
            .await
            .unwrap_err();
        match err {
            SyncError::RemoteStatus { status, .. } => assert_eq!(status.as_u16(), 500),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        // Nothing listens on port 9 of the loopback interface.
        let err = client()
            .fetch("http://127.0.0.1:9/manifest.json")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
    }

    #[tokio::test]
    async fn malformed_manifest_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client().fetch_manifest(&server.uri()).await.unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[tokio::test]
    async fn streams_body_to_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("a.bin.tmp");
        let written = client()
            .fetch_to_file(&format!("{}/a.bin", server.uri()), &dest)
            .await
            .unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.bin.tmp");
        let err = client()
            .fetch_to_file(&format!("{}/a.bin", server.uri()), &dest)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "remote-status");
        assert!(!dest.exists());
    }
}

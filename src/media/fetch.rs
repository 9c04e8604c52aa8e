//! Fetch task: streams one image URL into one destination file.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::StreamExt;
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::media::filename::generate_name;
use crate::media::post::{Channel, Post};

/// Error types for a single download
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    Status(StatusCode),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Download timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Download task aborted: {0}")]
    Aborted(String),
}

/// Result type for download operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Immutable description of one download, captured when it is scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTask {
    pub id: Uuid,
    pub channel: Channel,
    pub post_id: String,
    pub title: String,
    pub url: String,
    pub destination: PathBuf,
}

impl FetchTask {
    /// Describe the download of `post` into `{output_root}/{channel}/`
    pub fn new(output_root: &Path, channel: &Channel, post: &Post) -> Self {
        let destination = output_root
            .join(channel.name())
            .join(generate_name(&post.id, &post.title, &post.url));

        Self {
            id: Uuid::new_v4(),
            channel: channel.clone(),
            post_id: post.id.clone(),
            title: post.title.clone(),
            url: post.url.clone(),
            destination,
        }
    }
}

/// A completed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSuccess {
    pub bytes_written: u64,
    pub destination: PathBuf,
}

/// Result of one attempted download, kept for reporting only.
#[derive(Debug)]
pub struct FetchOutcome {
    pub task: FetchTask,
    pub result: FetchResult<FetchSuccess>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(success) => write!(
                f,
                "media downloaded: {} ({}, {} bytes)",
                self.task.title,
                success.destination.display(),
                success.bytes_written
            ),
            Err(e) => write!(f, "failed to download media: {} ({}): {}", self.task.title, self.task.url, e),
        }
    }
}

/// Run one download to completion.
///
/// The whole transfer races `timeout` and `cancel`; whichever fires first
/// drops the response and the file handle and yields a failed outcome. A
/// partially written file is left in place.
#[instrument(skip(client, task, cancel), fields(task_id = %task.id, post_id = %task.post_id, channel = %task.channel))]
pub async fn fetch(client: &Client, task: FetchTask, timeout: Duration, cancel: &CancellationToken) -> FetchOutcome {
    let deadline = Instant::now() + timeout;

    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = tokio::time::timeout_at(deadline, download(client, &task.url, &task.destination)) => {
            result.unwrap_or(Err(FetchError::TimedOut(timeout)))
        }
    };

    FetchOutcome { task, result }
}

async fn download(client: &Client, url: &str, destination: &Path) -> FetchResult<FetchSuccess> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status()));
    }

    let bytes_written = stream_to_file(response, destination).await?;
    debug!(path = %destination.display(), bytes = bytes_written, "Streamed response to file");

    Ok(FetchSuccess {
        bytes_written,
        destination: destination.to_path_buf(),
    })
}

/// Stream a response body to a file chunk by chunk
async fn stream_to_file(response: Response, file_path: &Path) -> FetchResult<u64> {
    let mut file = File::create(file_path).await?;

    let mut stream = response.bytes_stream();
    let mut bytes_written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }

    file.flush().await?;

    Ok(bytes_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task_for(root: &Path, url: String) -> FetchTask {
        let post = Post::new("p1", "Cute Cat", url, false);
        FetchTask::new(root, &Channel::new("catpics"), &post)
    }

    #[test]
    fn test_task_destination_layout() {
        let task = task_for(Path::new("output"), "https://i.redd.it/cat.jpg".to_string());
        assert_eq!(task.destination, PathBuf::from("output/catpics/p1_Cute_Cat.jpg"));
        assert_eq!(task.channel.name(), "catpics");
    }

    #[tokio::test]
    async fn test_fetch_writes_body_to_destination() {
        let server = MockServer::start().await;
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        Mock::given(method("GET"))
            .and(path("/cat.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("catpics")).unwrap();
        let task = task_for(dir.path(), format!("{}/cat.jpg", server.uri()));

        let outcome = fetch(&Client::new(), task.clone(), Duration::from_secs(5), &CancellationToken::new()).await;
        let success = outcome.result.unwrap();

        assert_eq!(success.bytes_written, body.len() as u64);
        assert_eq!(success.destination, task.destination);
        assert_eq!(std::fs::read(&task.destination).unwrap(), body);
    }

    #[tokio::test]
    async fn test_error_status_creates_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("catpics")).unwrap();
        let task = task_for(dir.path(), format!("{}/cat.jpg", server.uri()));

        let outcome = fetch(&Client::new(), task.clone(), Duration::from_secs(5), &CancellationToken::new()).await;

        assert!(matches!(outcome.result, Err(FetchError::Status(StatusCode::NOT_FOUND))));
        assert!(!task.destination.exists());
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_io_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let task = task_for(dir.path(), format!("{}/cat.jpg", server.uri()));

        let outcome = fetch(&Client::new(), task, Duration::from_secs(5), &CancellationToken::new()).await;
        assert!(matches!(outcome.result, Err(FetchError::Io(_))));
    }

    #[tokio::test]
    async fn test_deadline_turns_into_timeout_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"data".to_vec())
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("catpics")).unwrap();
        let task = task_for(dir.path(), format!("{}/cat.jpg", server.uri()));

        let outcome = fetch(&Client::new(), task, Duration::from_millis(100), &CancellationToken::new()).await;
        assert!(matches!(outcome.result, Err(FetchError::TimedOut(_))));
    }

    #[tokio::test]
    async fn test_cancellation_turns_into_failure() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = task_for(Path::new("unused"), "http://127.0.0.1:9/cat.jpg".to_string());
        let outcome = fetch(&Client::new(), task, Duration::from_secs(5), &cancel).await;

        assert!(matches!(outcome.result, Err(FetchError::Cancelled)));
        assert!(outcome.to_string().starts_with("failed to download media: Cute Cat"));
    }
}

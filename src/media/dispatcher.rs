//! Bounded dispatcher for fetch tasks
//!
//! This module:
//! 1. Provisions one output directory per channel before scheduling its posts
//! 2. Classifies every post, with at most `ceiling` probes in flight
//! 3. Spawns one fetch task per image, gated by a counting semaphore
//! 4. Joins every spawned task before returning

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::media::classifier::{Classification, Classifier};
use crate::media::fetch::{FetchError, FetchOutcome, FetchTask, fetch};
use crate::media::post::{Channel, Post};
use crate::media::report::ReportSink;

/// Error types for the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Concurrency ceiling must be greater than zero")]
    InvalidCeiling,

    #[error("Failed to create output directory {}: {source}", .path.display())]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for dispatcher operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Counting semaphore that also tracks how many holders it currently has and
/// the most it ever had at once.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Wait for a free slot. The slot is returned when the permit is dropped.
    pub async fn admit(self: &Arc<Self>) -> Result<AdmissionPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        Ok(AdmissionPermit {
            gate: self.clone(),
            _permit: permit,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// A held admission slot
#[derive(Debug)]
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // Runs before `_permit` is released, so the count never exceeds capacity.
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub output_root: PathBuf,
    pub ceiling: usize,
    pub fetch_timeout: Duration,
}

/// Everything a run produced, for reporting
#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<FetchOutcome>,
    /// Posts skipped with a reported reason
    pub skipped: usize,
    /// Posts without a target (empty URL or self post)
    pub no_target: usize,
    pub peak_in_flight: usize,
    /// Scheduling stopped early because the run was cancelled
    pub interrupted: bool,
}

impl RunSummary {
    pub fn scheduled(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.scheduled() - self.succeeded()
    }
}

/// Schedules fetch tasks for classified posts under a global ceiling.
pub struct Dispatcher {
    config: DispatcherConfig,
    client: Client,
    classifier: Arc<Classifier>,
    gate: Arc<AdmissionGate>,
    sink: Arc<dyn ReportSink>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a new dispatcher
    pub fn new(
        config: DispatcherConfig,
        client: Client,
        classifier: Arc<Classifier>,
        sink: Arc<dyn ReportSink>,
        cancel: CancellationToken,
    ) -> DispatchResult<Self> {
        if config.ceiling == 0 {
            return Err(DispatchError::InvalidCeiling);
        }

        let gate = Arc::new(AdmissionGate::new(config.ceiling));

        Ok(Self {
            config,
            client,
            classifier,
            gate,
            sink,
            cancel,
        })
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    /// Download the images of every channel's posts.
    ///
    /// Returns once every scheduled task has finished. Failed downloads are
    /// part of the summary; only a directory that cannot be created ends the
    /// run early, after the tasks already scheduled have finished. Once the
    /// run is cancelled no further channel is provisioned or scheduled.
    pub async fn run<I>(&self, channel_posts: I) -> DispatchResult<RunSummary>
    where
        I: IntoIterator<Item = (Channel, Vec<Post>)>,
    {
        let mut summary = RunSummary::default();
        let mut handles = Vec::new();

        for (channel, posts) in channel_posts {
            if self.cancel.is_cancelled() {
                warn!(channel = %channel, "Run cancelled; no further channels are scheduled");
                summary.interrupted = true;
                break;
            }

            let dir = self.config.output_root.join(channel.name());
            if let Err(source) = tokio::fs::create_dir_all(&dir).await {
                error!(channel = %channel, path = %dir.display(), error = %source, "Failed to create output directory");
                self.join_all(handles, &mut summary).await;
                return Err(DispatchError::CreateDirectory { path: dir, source });
            }

            debug!(channel = %channel, posts = posts.len(), "Classifying posts");
            let verdicts: Vec<(Post, Classification)> = stream::iter(posts)
                .map(|post| async move {
                    let verdict = self.classifier.classify(&post.url, post.is_self, &self.cancel).await;
                    (post, verdict)
                })
                .buffer_unordered(self.config.ceiling)
                .collect()
                .await;

            // Cancelled probes say nothing about the posts, so none of them are reported.
            if self.cancel.is_cancelled() {
                warn!(channel = %channel, "Run cancelled during classification; channel not scheduled");
                summary.interrupted = true;
                break;
            }

            for (post, verdict) in verdicts {
                match verdict {
                    Classification::Image => {
                        let task = FetchTask::new(&self.config.output_root, &channel, &post);
                        self.sink.scheduled(&task);
                        handles.push((task.clone(), self.spawn(task)));
                    }
                    Classification::NoTarget => summary.no_target += 1,
                    other => {
                        self.sink.skipped(&channel, &post, &other);
                        summary.skipped += 1;
                    }
                }
            }
        }

        self.join_all(handles, &mut summary).await;

        info!(
            scheduled = summary.scheduled(),
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            skipped = summary.skipped,
            peak_in_flight = summary.peak_in_flight,
            interrupted = summary.interrupted,
            "Run finished"
        );

        Ok(summary)
    }

    fn spawn(&self, task: FetchTask) -> JoinHandle<FetchOutcome> {
        let client = self.client.clone();
        let gate = self.gate.clone();
        let sink = self.sink.clone();
        let cancel = self.cancel.clone();
        let timeout = self.config.fetch_timeout;

        tokio::spawn(async move {
            let outcome = match gate.admit().await {
                Ok(_permit) => fetch(&client, task, timeout, &cancel).await,
                Err(e) => FetchOutcome {
                    task,
                    result: Err(FetchError::Aborted(e.to_string())),
                },
            };

            sink.finished(&outcome);
            outcome
        })
    }

    async fn join_all(&self, handles: Vec<(FetchTask, JoinHandle<FetchOutcome>)>, summary: &mut RunSummary) {
        for (task, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(task_id = %task.id, post_id = %task.post_id, error = %e, "Fetch task did not complete");
                    let outcome = FetchOutcome {
                        task,
                        result: Err(FetchError::Aborted(e.to_string())),
                    };
                    self.sink.finished(&outcome);
                    outcome
                }
            };
            summary.outcomes.push(outcome);
        }

        summary.peak_in_flight = self.gate.peak();
    }
}

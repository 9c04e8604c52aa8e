use tracing::{error, info};

use crate::media::classifier::Classification;
use crate::media::fetch::{FetchOutcome, FetchTask};
use crate::media::post::{Channel, Post};

/// Receives per-post decisions and per-download outcomes as they happen.
pub trait ReportSink: Send + Sync {
    /// A post was skipped. Never called for posts without a target.
    fn skipped(&self, channel: &Channel, post: &Post, classification: &Classification);

    /// A download was handed to the dispatcher.
    fn scheduled(&self, _task: &FetchTask) {}

    /// A download finished, successfully or not.
    fn finished(&self, outcome: &FetchOutcome);
}

/// Writes one structured log event per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn skipped(&self, channel: &Channel, post: &Post, classification: &Classification) {
        info!(
            channel = %channel,
            post_id = %post.id,
            reason = %classification,
            "skipped: Title:'{}' does not have image",
            post.title
        );
    }

    fn finished(&self, outcome: &FetchOutcome) {
        let task = &outcome.task;
        match &outcome.result {
            Ok(success) => info!(
                task_id = %task.id,
                channel = %task.channel,
                post_id = %task.post_id,
                path = %success.destination.display(),
                bytes = success.bytes_written,
                "media downloaded: {}",
                task.title
            ),
            Err(e) => error!(
                task_id = %task.id,
                channel = %task.channel,
                post_id = %task.post_id,
                url = %task.url,
                error = %e,
                "failed to download media: {}",
                task.title
            ),
        }
    }
}

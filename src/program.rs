use std::env::consts::{ARCH, FAMILY, OS};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Error, bail};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::Client;
use tokio::process::Command as ProcessCommand;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::cli::{Cli, Command, bug_report_url, version_line};
use crate::config::{AppConfig, ConfigManager, Network};
use crate::logger::init_logger;
use crate::media::{
    Channel, Classification, Classifier, Dispatcher, DispatcherConfig, FetchOutcome, FetchTask, Post, ReportSink,
    RunSummary, TracingSink,
};
use crate::reddit::{Credentials, ListingOptions, PostSource, RedditClient, SourceResult};

/// Error shown when no subreddit was given.
const MISSING_CHANNELS: &str = "--sub-reddit option is required. please see help";

/// Ties the command line, configuration, post source and dispatcher together.
pub(crate) struct Program {
    cli: Cli,
}

impl Program {
    pub(crate) fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Runs the command selected on the command line.
    pub(crate) async fn run(self) -> Result<(), Error> {
        match self.cli.command {
            Some(Command::Version) => {
                println!("{}", version_line());
                Ok(())
            }
            Some(Command::BugReport) => bug_report().await,
            Some(Command::InitConfig) => {
                ConfigManager::write_default(&self.cli.config)?;
                println!("Wrote default configuration to {}", self.cli.config.display());
                Ok(())
            }
            None => self.download().await,
        }
    }

    async fn download(&self) -> Result<(), Error> {
        let channels = self.cli.channels();
        if channels.is_empty() {
            bail!(MISSING_CHANNELS);
        }

        let config_manager = ConfigManager::load(&self.cli.config)
            .with_context(|| format!("Failed to load configuration from {}", self.cli.config.display()))?;
        let config = config_manager.get_app_config();

        let _log_guard = init_logger(&config.logging, Path::new(&config.paths.log_directory))?;
        log_system_information();
        info!(
            config = %config_manager.config_path().display(),
            from_file = config_manager.loaded_from_file(),
            "Configuration loaded"
        );

        let result = self.download_channels(config, channels).await;
        if let Err(e) = &result {
            error!("{:#}", e);
        }
        result
    }

    async fn download_channels(&self, config: &AppConfig, channels: Vec<Channel>) -> Result<(), Error> {
        let ceiling = self.cli.concurrency.unwrap_or_else(|| config.pools.ceiling());
        if ceiling == 0 {
            bail!("--concurrency must be greater than zero");
        }
        let output_root = self
            .cli
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.paths.output_directory));

        let client = build_client(&config.network).context("Failed to build the HTTP client")?;

        let source = RedditClient::new(
            client.clone(),
            Credentials::from_env(),
            ListingOptions {
                time: config.listing.time,
                limit: config.listing.limit,
            },
        );
        info!(
            authenticated = source.is_authenticated(),
            time = %config.listing.time,
            limit = config.listing.limit,
            "Listing top posts"
        );
        let channel_posts = collect_posts(&source, &channels).await?;

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling outstanding downloads");
                interrupt.cancel();
            }
        });

        let classifier = Classifier::new(client.clone(), &config.classification, config.network.probe_timeout())
            .context("Invalid classification policy")?;
        let progress = Arc::new(ProgressSink::new(
            Arc::new(TracingSink),
            !config.logging.log_to_terminal,
        ));

        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                output_root: output_root.clone(),
                ceiling,
                fetch_timeout: config.network.fetch_timeout(),
            },
            client,
            Arc::new(classifier),
            progress.clone(),
            cancel.clone(),
        )?;

        info!(
            channels = channels.len(),
            ceiling = dispatcher.gate().capacity(),
            output = %output_root.display(),
            "Starting downloads"
        );
        let summary = dispatcher.run(channel_posts).await?;
        progress.finish(&summary);

        if summary.interrupted || cancel.is_cancelled() {
            warn!("Run was interrupted; unfinished downloads were cancelled");
        }
        println!("{}", summary_line(&summary));
        Ok(())
    }
}

/// Shared HTTP client for listing, probing and downloading.
fn build_client(network: &Network) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(&network.user_agent)
        .connect_timeout(network.connect_timeout())
        .gzip(true)
        .brotli(true)
        .deflate(true)
        .build()
}

/// Lists every channel in order. The first failure ends the run.
async fn collect_posts(source: &dyn PostSource, channels: &[Channel]) -> SourceResult<Vec<(Channel, Vec<Post>)>> {
    let mut channel_posts = Vec::with_capacity(channels.len());
    for channel in channels {
        let posts = source.top_posts(channel).await?;
        channel_posts.push((channel.clone(), posts));
    }
    Ok(channel_posts)
}

fn summary_line(summary: &RunSummary) -> String {
    format!(
        "{} downloaded, {} failed, {} skipped (peak {} concurrent)",
        summary.succeeded(),
        summary.failed(),
        summary.skipped,
        summary.peak_in_flight
    )
}

/// Forwards every report to an inner sink while driving a progress bar.
pub(crate) struct ProgressSink {
    inner: Arc<dyn ReportSink>,
    bar: ProgressBar,
}

impl ProgressSink {
    pub(crate) fn new(inner: Arc<dyn ReportSink>, visible: bool) -> Self {
        let draw_target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(0), draw_target);
        bar.set_style(progress_style());

        Self { inner, bar }
    }

    pub(crate) fn finish(&self, summary: &RunSummary) {
        self.bar.finish_with_message(summary_line(summary));
    }
}

fn progress_style() -> ProgressStyle {
    match ProgressStyle::with_template("{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} {wide_msg}") {
        Ok(style) => style.progress_chars("=> "),
        Err(e) => {
            warn!("Progress template error: {}. Using default bar.", e);
            ProgressStyle::default_bar()
        }
    }
}

impl ReportSink for ProgressSink {
    fn skipped(&self, channel: &Channel, post: &Post, classification: &Classification) {
        self.inner.skipped(channel, post, classification);
    }

    fn scheduled(&self, task: &FetchTask) {
        self.bar.inc_length(1);
        self.inner.scheduled(task);
    }

    fn finished(&self, outcome: &FetchOutcome) {
        self.bar.inc(1);
        self.bar.set_message(outcome.task.title.clone());
        self.inner.finished(outcome);
    }
}

async fn bug_report() -> Result<(), Error> {
    let url = bug_report_url().context("Failed to build the bug report URL")?;

    match open_in_browser(url.as_str()).await {
        Ok(true) => println!("Opened the bug report form in your browser."),
        _ => println!("Please open the following URL to report a bug:\n{}", url),
    }
    Ok(())
}

/// Hands `url` to the platform's opener. `Ok(false)` when it exits unsuccessfully.
async fn open_in_browser(url: &str) -> std::io::Result<bool> {
    let mut command = if cfg!(target_os = "macos") {
        ProcessCommand::new("open")
    } else if cfg!(target_os = "windows") {
        let mut command = ProcessCommand::new("cmd");
        command.args(["/C", "start", ""]);
        command
    } else {
        ProcessCommand::new("xdg-open")
    };

    let status = command
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use clap::Parser;
    use reqwest::StatusCode;

    use crate::media::fetch::{FetchError, FetchSuccess};
    use crate::reddit::SourceError;

    struct StubSource {
        posts: HashMap<String, Vec<Post>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PostSource for StubSource {
        async fn top_posts(&self, channel: &Channel) -> SourceResult<Vec<Post>> {
            self.calls.lock().unwrap().push(channel.name().to_string());
            self.posts.get(channel.name()).cloned().ok_or_else(|| SourceError::Status {
                channel: channel.name().to_string(),
                status: StatusCode::NOT_FOUND,
            })
        }
    }

    fn stub() -> StubSource {
        let mut posts = HashMap::new();
        posts.insert("pics".to_string(), vec![Post::new("a", "Cat", "https://i.redd.it/a.jpg", false)]);
        posts.insert("aww".to_string(), vec![]);
        StubSource {
            posts,
            calls: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_posts_are_collected_per_channel() {
        let source = stub();
        let channels = vec![Channel::new("pics"), Channel::new("aww")];

        let channel_posts = collect_posts(&source, &channels).await.unwrap();

        assert_eq!(channel_posts.len(), 2);
        assert_eq!(channel_posts[0].0, Channel::new("pics"));
        assert_eq!(channel_posts[0].1.len(), 1);
        assert!(channel_posts[1].1.is_empty());
    }

    #[tokio::test]
    async fn test_source_failure_stops_listing() {
        let source = stub();
        let channels = vec![Channel::new("missing"), Channel::new("pics")];

        let result = collect_posts(&source, &channels).await;

        assert!(matches!(result, Err(SourceError::Status { .. })));
        assert_eq!(*source.calls.lock().unwrap(), vec!["missing".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_channels_is_an_input_error() {
        let cli = Cli::try_parse_from(["reddit_downloader", "-s", " , "]).unwrap();

        let error = Program::new(cli).run().await.unwrap_err();

        assert_eq!(error.to_string(), MISSING_CHANNELS);
    }

    #[tokio::test]
    async fn test_init_config_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reddit_downloader.toml");
        let config = path.to_str().unwrap();
        let cli = Cli::try_parse_from(["reddit_downloader", "--config", config, "init-config"]).unwrap();

        Program::new(cli).run().await.unwrap();

        let loaded = ConfigManager::load(&path).unwrap();
        assert!(loaded.loaded_from_file());
    }

    struct CountingSink {
        finished: Mutex<usize>,
    }

    impl ReportSink for CountingSink {
        fn skipped(&self, _channel: &Channel, _post: &Post, _classification: &Classification) {}

        fn finished(&self, _outcome: &FetchOutcome) {
            *self.finished.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_progress_sink_tracks_and_forwards() {
        let inner = Arc::new(CountingSink {
            finished: Mutex::new(0),
        });
        let sink = ProgressSink::new(inner.clone(), false);

        let channel = Channel::new("pics");
        let root = Path::new("out");
        let first = FetchTask::new(root, &channel, &Post::new("a", "Cat", "https://i.redd.it/a.jpg", false));
        let second = FetchTask::new(root, &channel, &Post::new("b", "Dog", "https://i.redd.it/b.png", false));
        sink.scheduled(&first);
        sink.scheduled(&second);
        sink.finished(&FetchOutcome {
            task: first.clone(),
            result: Ok(FetchSuccess {
                bytes_written: 3,
                destination: first.destination.clone(),
            }),
        });
        sink.finished(&FetchOutcome {
            task: second,
            result: Err(FetchError::Aborted("panicked".to_string())),
        });

        assert_eq!(sink.bar.length(), Some(2));
        assert_eq!(sink.bar.position(), 2);
        assert_eq!(*inner.finished.lock().unwrap(), 2);
    }
}

//! Command line interface for reddit_downloader

use std::env::consts::{ARCH, OS};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

use crate::config::DEFAULT_CONFIG_FILE;
use crate::media::Channel;
use crate::reddit::{ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_PASSWORD, ENV_USERNAME};

/// The name of the cargo package.
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where bug reports go.
pub const REPOSITORY: &str = env!("CARGO_PKG_REPOSITORY");

#[derive(Parser, Debug)]
#[command(
    name = "reddit_downloader",
    about = "reddit_downloader downloads images from Reddit.",
    long_about = None,
    after_help = credentials_help(),
    disable_version_flag = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Subreddit names to download images from (delimited by commas)
    #[arg(short = 's', long = "sub-reddit", value_delimiter = ',')]
    pub sub_reddits: Vec<String>,

    /// Output directory to save images [default: config paths.output_directory]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Maximum number of simultaneous downloads [default: number of CPUs]
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Show reddit_downloader command version information
    Version,
    /// Open a prefilled bug report in the browser
    BugReport,
    /// Write a configuration file with default values
    InitConfig,
}

fn credentials_help() -> String {
    format!(
        "Posts are listed anonymously unless all of the following environment variables are set:\n  \
         - {}: the client's id\n  \
         - {}: the client's secret\n  \
         - {}: the account's username\n  \
         - {}: the account's password\n\
         The GO_REDDIT_CLIENT_* names are accepted as well.",
        ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_USERNAME, ENV_PASSWORD
    )
}

impl Cli {
    /// Requested channels, trimmed and de-duplicated in order of appearance
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = Vec::new();
        for name in &self.sub_reddits {
            let name = name.trim();
            let name = name.strip_prefix("r/").unwrap_or(name);
            if name.is_empty() {
                continue;
            }
            let channel = Channel::new(name);
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        channels
    }
}

/// Text printed by the `version` subcommand
pub fn version_line() -> String {
    format!("{} version {} (under MIT LICENSE)", NAME, VERSION)
}

/// New-issue URL with the environment filled in
pub fn bug_report_url() -> Result<Url, url::ParseError> {
    let body = format!(
        "## Description\n\n## Steps to reproduce\n\n## Expected behavior\n\n\
         ## Environment\n- {}: {}\n- OS: {}\n- ARCH: {}\n",
        NAME, VERSION, OS, ARCH
    );
    Url::parse_with_params(
        &format!("{}/issues/new", REPOSITORY.trim_end_matches('/')),
        &[("title", "[Bug Report] "), ("body", body.as_str())],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_reddits_are_comma_delimited() {
        let cli = Cli::try_parse_from(["reddit_downloader", "-s", "pics,r/aww, pics ,,", "-o", "out"]).unwrap();

        assert_eq!(cli.channels(), vec![Channel::new("pics"), Channel::new("aww")]);
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_subcommands_parse() {
        let cli = Cli::try_parse_from(["reddit_downloader", "version"]).unwrap();
        assert_eq!(cli.command, Some(Command::Version));

        let cli = Cli::try_parse_from(["reddit_downloader", "bug-report"]).unwrap();
        assert_eq!(cli.command, Some(Command::BugReport));

        let cli = Cli::try_parse_from(["reddit_downloader", "--config", "x.toml", "init-config"]).unwrap();
        assert_eq!(cli.command, Some(Command::InitConfig));
        assert_eq!(cli.config, PathBuf::from("x.toml"));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["reddit_downloader", "non-existent"]).is_err());
    }

    #[test]
    fn test_version_line() {
        assert_eq!(version_line(), format!("reddit_downloader version {} (under MIT LICENSE)", VERSION));
    }

    #[test]
    fn test_bug_report_url_carries_environment() {
        let url = bug_report_url().unwrap();
        assert!(url.path().ends_with("/issues/new"));

        let body = url
            .query_pairs()
            .find(|(key, _)| key == "body")
            .map(|(_, value)| value.into_owned())
            .unwrap();
        assert!(body.contains(VERSION));
        assert!(body.contains(OS));
    }
}

//! Content classification for post targets
//!
//! Decides whether a post URL points at a single downloadable image. URL rules
//! from the [`ClassificationPolicy`] are checked first, in order; posts that no
//! rule decides are probed over the network: the first bytes of the body are
//! sniffed, since many hosts serve images as `application/octet-stream`. Only
//! when the resolved type stays generic does the URL extension decide.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{CONTENT_TYPE, RANGE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::media::filename::url_extension;

/// Number of body bytes requested and inspected by the probe.
pub const SNIFF_LEN: usize = 512;

const OCTET_STREAM: &str = "application/octet-stream";

/// Error types for classification
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status: {0}")]
    Status(StatusCode),

    #[error("Probe timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Probe cancelled")]
    Cancelled,

    #[error("Invalid pattern in rule '{rule}': {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
}

/// Result type for classification operations
pub type ClassifyResult<T> = Result<T, ClassifyError>;

/// Verdict for a single post target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A single image; a fetch task will be scheduled
    Image,
    /// A multi-image gallery, which is not supported
    UnsupportedGallery,
    /// Anything else, with a human readable reason
    NotAnImage { reason: String },
    /// Empty URL or self post; skipped silently
    NoTarget,
}

impl Classification {
    fn not_an_image(reason: impl Into<String>) -> Self {
        Classification::NotAnImage { reason: reason.into() }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Image => write!(f, "image"),
            Classification::UnsupportedGallery => write!(f, "unsupported gallery"),
            Classification::NotAnImage { reason } => write!(f, "not an image ({})", reason),
            Classification::NoTarget => write!(f, "no target"),
        }
    }
}

/// What a URL rule matches against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlMatcher {
    /// Any path segment equal to the value (case-insensitive)
    PathSegment(String),
    /// Host ending with the value (case-insensitive)
    HostSuffix(String),
    /// Regular expression over the whole URL
    Pattern(String),
}

/// Verdict a URL rule assigns when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVerdict {
    Image,
    UnsupportedGallery,
    NotAnImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRule {
    pub name: String,
    pub verdict: RuleVerdict,
    pub matcher: UrlMatcher,
}

/// Prioritized URL rules plus the extension allow-list used when a probe
/// only resolves a generic binary type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationPolicy {
    pub image_extensions: Vec<String>,
    pub rules: Vec<UrlRule>,
}

impl Default for ClassificationPolicy {
    fn default() -> Self {
        Self {
            image_extensions: ["png", "jpg", "jpeg", "gif", "gifv", "bmp", "webp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            rules: vec![UrlRule {
                name: "gallery".to_string(),
                verdict: RuleVerdict::UnsupportedGallery,
                matcher: UrlMatcher::PathSegment("gallery".to_string()),
            }],
        }
    }
}

enum CompiledMatcher {
    PathSegment(String),
    HostSuffix(String),
    Pattern(Regex),
}

struct CompiledRule {
    name: String,
    matcher: CompiledMatcher,
    verdict: RuleVerdict,
}

impl CompiledRule {
    fn compile(rule: &UrlRule) -> ClassifyResult<Self> {
        let matcher = match &rule.matcher {
            UrlMatcher::PathSegment(segment) => CompiledMatcher::PathSegment(segment.to_ascii_lowercase()),
            UrlMatcher::HostSuffix(suffix) => CompiledMatcher::HostSuffix(suffix.to_ascii_lowercase()),
            UrlMatcher::Pattern(pattern) => {
                let regex = Regex::new(pattern).map_err(|source| ClassifyError::InvalidPattern {
                    rule: rule.name.clone(),
                    source,
                })?;
                CompiledMatcher::Pattern(regex)
            }
        };

        Ok(Self {
            name: rule.name.clone(),
            matcher,
            verdict: rule.verdict,
        })
    }

    fn matches(&self, raw: &str, parsed: Option<&Url>) -> bool {
        match &self.matcher {
            CompiledMatcher::PathSegment(segment) => parsed
                .and_then(|url| url.path_segments())
                .map(|mut segments| segments.any(|s| s.eq_ignore_ascii_case(segment)))
                .unwrap_or(false),
            CompiledMatcher::HostSuffix(suffix) => parsed
                .and_then(|url| url.host_str())
                .map(|host| host.to_ascii_lowercase().ends_with(suffix.as_str()))
                .unwrap_or(false),
            CompiledMatcher::Pattern(regex) => regex.is_match(raw),
        }
    }
}

/// Classifies post targets with a shared HTTP client.
pub struct Classifier {
    client: Client,
    rules: Vec<CompiledRule>,
    image_extensions: Vec<String>,
    probe_timeout: Duration,
}

impl Classifier {
    /// Create a classifier, compiling the policy's rules
    pub fn new(client: Client, policy: &ClassificationPolicy, probe_timeout: Duration) -> ClassifyResult<Self> {
        let rules = policy
            .rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<ClassifyResult<Vec<_>>>()?;

        let image_extensions = policy
            .image_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        Ok(Self {
            client,
            rules,
            image_extensions,
            probe_timeout,
        })
    }

    /// Classify a post target. Never fails: probe errors become `NotAnImage`.
    pub async fn classify(&self, url: &str, is_self: bool, cancel: &CancellationToken) -> Classification {
        if url.is_empty() || is_self {
            return Classification::NoTarget;
        }

        if let Some(verdict) = self.apply_rules(url) {
            return verdict;
        }

        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClassifyError::Cancelled),
            result = tokio::time::timeout(self.probe_timeout, self.probe(url)) => {
                result.unwrap_or(Err(ClassifyError::TimedOut(self.probe_timeout)))
            }
        };

        match probed {
            Ok(media_type) => self.decide(url, &media_type),
            Err(e) => {
                debug!(url = url, error = %e, "Content probe failed");
                Classification::not_an_image(format!("probe failed: {}", e))
            }
        }
    }

    fn apply_rules(&self, url: &str) -> Option<Classification> {
        let parsed = Url::parse(url).ok();
        let rule = self.rules.iter().find(|rule| rule.matches(url, parsed.as_ref()))?;
        trace!(url = url, rule = %rule.name, "URL rule matched");

        Some(match rule.verdict {
            RuleVerdict::Image => Classification::Image,
            RuleVerdict::UnsupportedGallery => Classification::UnsupportedGallery,
            RuleVerdict::NotAnImage => Classification::not_an_image(format!("matched rule '{}'", rule.name)),
        })
    }

    /// Fetch the first [`SNIFF_LEN`] bytes and resolve their media type.
    async fn probe(&self, url: &str) -> ClassifyResult<String> {
        let mut response = self
            .client
            .get(url)
            .header(RANGE, format!("bytes=0-{}", SNIFF_LEN - 1))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClassifyError::Status(response.status()));
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(normalize_media_type)
            .filter(|value| !value.is_empty());

        let mut prefix = Vec::with_capacity(SNIFF_LEN);
        while prefix.len() < SNIFF_LEN {
            match response.chunk().await? {
                Some(chunk) => {
                    let take = (SNIFF_LEN - prefix.len()).min(chunk.len());
                    prefix.extend_from_slice(&chunk[..take]);
                }
                None => break,
            }
        }

        Ok(resolve_media_type(&prefix, declared))
    }

    fn decide(&self, url: &str, media_type: &str) -> Classification {
        let primary = media_type.split('/').next().unwrap_or_default();
        if primary == "image" {
            return Classification::Image;
        }

        if media_type == OCTET_STREAM {
            let ext = url_extension(url);
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            if self.image_extensions.iter().any(|allowed| *allowed == ext) {
                return Classification::Image;
            }
            return Classification::not_an_image(format!("{} with extension '{}'", OCTET_STREAM, ext));
        }

        Classification::not_an_image(media_type.to_string())
    }
}

/// Lowercases a Content-Type value and strips its parameters.
fn normalize_media_type(value: &str) -> String {
    value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

/// Sniffed type when the prefix is recognised, else the declared type, else
/// `application/octet-stream`.
pub fn resolve_media_type(prefix: &[u8], declared: Option<String>) -> String {
    sniff(prefix)
        .map(str::to_string)
        .or(declared)
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Recognises common image signatures and textual payloads.
pub fn sniff(prefix: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n" as &[u8], "image/png"),
        (b"\xff\xd8\xff" as &[u8], "image/jpeg"),
        (b"GIF87a" as &[u8], "image/gif"),
        (b"GIF89a" as &[u8], "image/gif"),
        (b"\x00\x00\x01\x00" as &[u8], "image/x-icon"),
        (b"II*\x00" as &[u8], "image/tiff"),
        (b"MM\x00*" as &[u8], "image/tiff"),
    ];

    if let Some((_, media_type)) = SIGNATURES.iter().find(|(magic, _)| prefix.starts_with(magic)) {
        return Some(*media_type);
    }

    if prefix.len() >= 12 && &prefix[..4] == b"RIFF" && &prefix[8..12] == b"WEBP" {
        return Some("image/webp");
    }

    if is_bmp(prefix) {
        return Some("image/bmp");
    }

    sniff_text(prefix)
}

/// `BM`, zeroed reserved words and a known DIB header size.
fn is_bmp(prefix: &[u8]) -> bool {
    const DIB_HEADER_SIZES: [u32; 6] = [12, 40, 52, 56, 108, 124];

    if prefix.len() < 18 || !prefix.starts_with(b"BM") || prefix[6..10] != [0, 0, 0, 0] {
        return false;
    }
    let dib_size = u32::from_le_bytes([prefix[14], prefix[15], prefix[16], prefix[17]]);
    DIB_HEADER_SIZES.contains(&dib_size)
}

fn sniff_text(prefix: &[u8]) -> Option<&'static str> {
    // A cut at SNIFF_LEN may split a multi-byte character.
    let text = match std::str::from_utf8(prefix) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&prefix[..e.valid_up_to()]).ok()?,
        Err(_) => return None,
    };

    if text.is_empty() || text.chars().any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r' | '\x0c')) {
        return None;
    }

    let head = text.trim_start().to_ascii_lowercase();
    if head.starts_with("<!doctype html") || head.starts_with("<html") {
        Some("text/html")
    } else if head.starts_with("<?xml") {
        Some("text/xml")
    } else if head.starts_with('{') || head.starts_with('[') {
        Some("application/json")
    } else {
        Some("text/plain")
    }
}

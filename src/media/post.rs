use std::fmt;

use serde::{Deserialize, Serialize};

/// A single listed post as handed over by a post source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Unique, opaque identifier (e.g. `1abcde`)
    pub id: String,
    pub title: String,
    /// Target URL of the post; empty when the post links nowhere
    #[serde(default)]
    pub url: String,
    /// True for text posts without an external link
    #[serde(default)]
    pub is_self: bool,
}

impl Post {
    pub fn new(id: impl Into<String>, title: impl Into<String>, url: impl Into<String>, is_self: bool) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            is_self,
        }
    }
}

/// Named content group (a subreddit) whose posts are fetched as a batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Channel {
    fn from(name: String) -> Self {
        Self(name)
    }
}

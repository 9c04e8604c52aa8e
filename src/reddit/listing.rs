//! Wire types of Reddit's listing and token endpoints.

use serde::Deserialize;

use crate::media::Post;

/// Kind tag of link posts in a listing
pub const LINK_KIND: &str = "t3";

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub data: ListingData,
}

#[derive(Debug, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing>,
}

#[derive(Debug, Deserialize)]
pub struct Thing {
    pub kind: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct PostData {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_self: bool,
}

impl From<PostData> for Post {
    fn from(data: PostData) -> Self {
        Post {
            id: data.id,
            title: data.title,
            url: data.url.unwrap_or_default(),
            is_self: data.is_self,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ListingData {
    /// Link posts of this page; other kinds and malformed entries are dropped.
    pub fn into_posts(self) -> Vec<Post> {
        self.children
            .into_iter()
            .filter(|thing| thing.kind == LINK_KIND)
            .filter_map(|thing| serde_json::from_value::<PostData>(thing.data).ok())
            .map(Post::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_conversion_keeps_link_posts() {
        let page: Listing = serde_json::from_value(json!({
            "kind": "Listing",
            "data": {
                "after": "t3_b",
                "children": [
                    {
                        "kind": "t3",
                        "data": { "id": "a", "title": "Cat", "url": "https://i.redd.it/a.jpg", "is_self": false }
                    },
                    { "kind": "t3", "data": { "id": "b", "title": "Question", "url": null, "is_self": true } },
                    { "kind": "t1", "data": { "id": "c", "body": "a comment" } },
                    { "kind": "t3", "data": { "title": "no id" } }
                ]
            }
        }))
        .unwrap();

        assert_eq!(page.data.after.as_deref(), Some("t3_b"));
        let posts = page.data.into_posts();
        assert_eq!(
            posts,
            vec![
                Post::new("a", "Cat", "https://i.redd.it/a.jpg", false),
                Post::new("b", "Question", "", true),
            ]
        );
    }
}

use url::Url;

/// Characters in a post title that cannot appear in a file name.
const PATH_HOSTILE: [char; 2] = [' ', '/'];

/// Longest file name common filesystems accept, in bytes.
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Builds the output file name for a post: `{post_id}_{title}{ext}`.
///
/// Spaces and forward slashes in the title become underscores. The extension
/// is whatever the URL path ends with (dot included), so
/// `https://i.redd.it/abc.jpg?width=640` yields `.jpg`. URLs that do not parse
/// fall back to the text after the last `/` of the raw string. The title is
/// shortened on a character boundary so the name fits in
/// [`MAX_FILE_NAME_BYTES`].
pub fn generate_name(post_id: &str, title: &str, url: &str) -> String {
    let ext = url_extension(url);
    let budget = MAX_FILE_NAME_BYTES.saturating_sub(post_id.len() + 1 + ext.len());

    let mut sanitized = String::with_capacity(title.len().min(budget));
    for c in title.chars().map(|c| if PATH_HOSTILE.contains(&c) { '_' } else { c }) {
        if sanitized.len() + c.len_utf8() > budget {
            break;
        }
        sanitized.push(c);
    }

    format!("{}_{}{}", post_id, sanitized, ext)
}

/// Returns the trailing extension of the URL path including the leading dot,
/// or an empty string when the last path segment has none.
pub fn url_extension(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => segment_extension(parsed.path()).to_string(),
        Err(_) => segment_extension(url).to_string(),
    }
}

fn segment_extension(path: &str) -> &str {
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    match last_segment.rfind('.') {
        Some(dot) => &last_segment[dot..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_is_sanitized() {
        let name = generate_name("p1", "Cute Cat / Kitten", "https://i.redd.it/cat.jpg");
        assert_eq!(name, "p1_Cute_Cat___Kitten.jpg");
        assert!(!name.contains(' '));
        assert!(!name.contains('/'));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let first = generate_name("abc", "a b", "https://example.com/x.png");
        let second = generate_name("abc", "a b", "https://example.com/x.png");
        assert_eq!(first, second);
    }

    #[test]
    fn test_long_titles_fit_in_a_file_name() {
        let title = "é".repeat(300);
        let name = generate_name("1abcde", &title, "https://i.redd.it/cat.jpeg");

        assert!(name.len() <= MAX_FILE_NAME_BYTES);
        assert!(name.starts_with("1abcde_é"));
        assert!(name.ends_with("é.jpeg"));

        let short = generate_name("1abcde", "short title", "https://i.redd.it/cat.jpeg");
        assert_eq!(short, "1abcde_short_title.jpeg");
    }

    #[test]
    fn test_extension_ignores_query_and_fragment() {
        assert_eq!(url_extension("https://i.redd.it/abc.jpeg?width=640#top"), ".jpeg");
        assert_eq!(url_extension("https://i.imgur.com/abc.gifv"), ".gifv");
    }

    #[test]
    fn test_missing_extension_is_empty() {
        assert_eq!(url_extension("https://imgur.com/a/xyz"), "");
        assert_eq!(url_extension("https://example.com/"), "");
        assert_eq!(url_extension("https://example.com"), "");
        assert_eq!(generate_name("id", "t", "https://imgur.com/a/xyz"), "id_t");
    }

    #[test]
    fn test_dots_in_host_are_not_an_extension() {
        assert_eq!(url_extension("https://i.redd.it"), "");
    }

    #[test]
    fn test_unparsable_url_uses_raw_text() {
        assert_eq!(url_extension("not a url/photo.PNG"), ".PNG");
        assert_eq!(url_extension(""), "");
    }
}

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\w+)").expect("tag pattern is valid"));

/// Extract hashtags from post content: lowercased, de-duplicated, in
/// first-seen order.
pub fn extract_tags(content: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for capture in TAG_PATTERN.captures_iter(content) {
        let tag = capture[1].to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

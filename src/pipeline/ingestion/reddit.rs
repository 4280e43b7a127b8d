//! Reddit post JSON: endpoint construction and media extraction.

use crate::pipeline::acquisition::resolver::unescape;
use crate::pipeline::processing::{classify, classify_fragment};
use crate::types::{MediaCandidate, MediaKind};
use serde_json::Value;
use url::Url;

pub fn is_reddit_host(host: &str) -> bool {
    host == "reddit.com" || host.ends_with(".reddit.com")
}

/// A permalink to a post (`/r/<sub>/comments/<id>/...`) on a Reddit host.
pub fn is_reddit_post(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            parsed.host_str().map(is_reddit_host).unwrap_or(false)
                && parsed
                    .path_segments()
                    .map(|mut segments| segments.any(|s| s == "comments"))
                    .unwrap_or(false)
        }
        Err(_) => false,
    }
}

/// `https://www.reddit.com/r/pics/comments/abc/title/?utm=x` becomes
/// `https://www.reddit.com/r/pics/comments/abc/title.json?raw_json=1`.
pub fn json_endpoint(permalink: &str) -> Option<String> {
    let mut parsed = Url::parse(permalink.trim()).ok()?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    let path = parsed.path().trim_end_matches('/').to_string();
    let path = path.strip_suffix(".json").unwrap_or(&path).to_string();
    parsed.set_path(&format!("{}.json", path));
    parsed.set_query(Some("raw_json=1"));
    Some(parsed.to_string())
}

/// Subreddit and a title guessed from the slug of `/r/<sub>/comments/<id>/<slug>`.
pub fn provenance_from_permalink(permalink: &str) -> (Option<String>, Option<String>) {
    let Ok(parsed) = Url::parse(permalink) else {
        return (None, None);
    };
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let subreddit = segments
        .iter()
        .position(|s| *s == "r")
        .and_then(|i| segments.get(i + 1))
        .map(|s| s.to_string());
    let title = segments
        .iter()
        .position(|s| *s == "comments")
        .and_then(|i| segments.get(i + 2))
        .map(|slug| slug.replace('_', " "));
    (subreddit, title)
}

/// The post object of a `.json` listing: `[0].data.children[0].data`.
pub fn post_object(listing: &Value) -> Option<&Value> {
    let post = listing
        .get(0)?
        .get("data")?
        .get("children")?
        .get(0)?
        .get("data")?;
    post.is_object().then_some(post)
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().filter(|s| !s.is_empty())
}

pub fn post_field(post: &Value, key: &str) -> Option<String> {
    str_at(post, &[key]).map(str::to_string)
}

fn push(candidates: &mut Vec<MediaCandidate>, url: &str) {
    let candidate = classify(&unescape(url));
    if candidate.kind != MediaKind::Unknown {
        candidates.push(candidate);
    }
}

fn gallery_urls(post: &Value) -> Vec<String> {
    let Some(items) = post.pointer("/gallery_data/items").and_then(Value::as_array) else {
        return Vec::new();
    };
    let metadata = post.get("media_metadata");
    items
        .iter()
        .filter_map(|item| item.get("media_id").and_then(Value::as_str))
        .filter_map(|id| {
            let source = metadata?.get(id)?.get("s")?;
            ["mp4", "gif", "u"]
                .iter()
                .find_map(|key| source.get(*key).and_then(Value::as_str))
                .map(str::to_string)
        })
        .collect()
}

/// The link of a link post, unless it points back at Reddit itself
/// (self posts, galleries, crossposts).
fn outbound_link(post: &Value) -> Option<&str> {
    let link = str_at(post, &["url_overridden_by_dest"]).or_else(|| str_at(post, &["url"]))?;
    let host = Url::parse(link).ok()?.host_str()?.to_string();
    (!is_reddit_host(&host)).then_some(link)
}

fn collect(post: &Value, candidates: &mut Vec<MediaCandidate>, depth: usize) {
    let video = str_at(post, &["secure_media", "reddit_video", "fallback_url"])
        .or_else(|| str_at(post, &["media", "reddit_video", "fallback_url"]));
    if let Some(url) = video {
        push(candidates, url);
    }

    let preview_start = candidates.len();
    if let Some(url) = str_at(post, &["preview", "reddit_video_preview", "fallback_url"]) {
        push(candidates, url);
    }
    let preview_id = candidates[preview_start..]
        .iter()
        .find_map(|c| c.canonical_id.clone());

    for url in gallery_urls(post) {
        push(candidates, &url);
    }

    if let Some(link) = outbound_link(post) {
        push(candidates, link);
    }

    for key in ["secure_media_embed", "media_embed"] {
        if let Some(html) = str_at(post, &[key, "content"]) {
            if let Some(candidate) = classify_fragment(&unescape(html)) {
                candidates.push(candidate);
                break;
            }
        }
    }

    // RedGifs links come with a Reddit transcode; binding them to the same
    // id lets the RedGifs original win deduplication.
    if let Some(id) = preview_id {
        for candidate in candidates.iter_mut() {
            if candidate.kind == MediaKind::RedGifs && candidate.canonical_id.is_none() {
                candidate.canonical_id = Some(id.clone());
            }
        }
    }

    if depth == 0 {
        if let Some(parent) = post.pointer("/crosspost_parent_list/0") {
            collect(parent, candidates, depth + 1);
        }
    }
}

/// Every media candidate of a post, in discovery order, not deduplicated.
/// Self posts without media become a note of their permalink.
pub fn extract_post_media(post: &Value, permalink: &str) -> Vec<MediaCandidate> {
    let mut candidates = Vec::new();
    collect(post, &mut candidates, 0);

    let is_self = post.get("is_self").and_then(Value::as_bool).unwrap_or(false);
    if candidates.is_empty() && is_self {
        candidates.push(MediaCandidate::new(permalink, MediaKind::PlainText));
    }
    candidates
}

//! Ordered provider table used by the classifier.
//!
//! Each entry pairs a matcher with an extractor; the first matching entry
//! decides the candidate. Adding a provider means adding a row here.

use crate::types::{MediaCandidate, MediaKind};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub struct Provider {
    pub name: &'static str,
    pub matches: fn(&Url) -> bool,
    pub extract: fn(&Url, &str) -> MediaCandidate,
}

pub static PROVIDERS: &[Provider] = &[
    Provider {
        name: "reddit_video",
        matches: is_reddit_video_host,
        extract: extract_reddit_video,
    },
    Provider {
        name: "reddit_packaged",
        matches: is_packaged_media_host,
        extract: extract_packaged_media,
    },
    Provider {
        name: "redgifs",
        matches: is_redgifs_host,
        extract: extract_redgifs,
    },
    Provider {
        name: "reddit_preview",
        matches: is_reddit_preview_host,
        extract: extract_reddit_preview,
    },
    Provider {
        name: "direct_video",
        matches: has_video_extension,
        extract: extract_direct_video,
    },
    Provider {
        name: "direct_image",
        matches: has_image_extension,
        extract: extract_direct_image,
    },
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "m4v", "gifv"];
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "webp", "bmp", "avif", "heic", "tif", "tiff",
];

static DASH_RANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)DASH_(\d+)").expect("valid regex"));
static CMAF_RANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)CMAF_(\d+)").expect("valid regex"));
static RES_RANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)res_(\d+)p").expect("valid regex"));
static SUFFIX_RANK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_(\d+)p\b").expect("valid regex"));

fn host(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

fn host_is(url: &Url, domain: &str) -> bool {
    let host = host(url);
    host == domain || host.ends_with(&format!(".{}", domain))
}

fn first_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .find(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Lower-cased extension of the last path segment, if any.
pub fn path_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

fn stem(segment: &str) -> &str {
    segment.split_once('.').map(|(s, _)| s).unwrap_or(segment)
}

/// Resolution token embedded in an adaptive rendition path. Audio tracks and
/// playlists rank lowest.
pub fn quality_from_path(path: &str) -> u32 {
    let lower = path.to_ascii_lowercase();
    if lower.contains("audio") || lower.ends_with(".m3u8") || lower.ends_with(".mpd") {
        return 0;
    }
    for re in [&*DASH_RANK, &*CMAF_RANK, &*RES_RANK, &*SUFFIX_RANK] {
        if let Some(rank) = re
            .captures(path)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
        {
            return rank;
        }
    }
    0
}

fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.into_owned())
}

fn is_reddit_video_host(url: &Url) -> bool {
    host(url) == "v.redd.it"
}

fn extract_reddit_video(url: &Url, raw: &str) -> MediaCandidate {
    let mut candidate = MediaCandidate::new(raw, MediaKind::RedditVideoFallback)
        .with_quality_rank(quality_from_path(url.path()));
    if let Some(id) = first_segment(url) {
        candidate = candidate.with_canonical_id(id);
    }
    candidate
}

fn is_packaged_media_host(url: &Url) -> bool {
    host(url) == "packaged-media.redd.it"
}

fn extract_packaged_media(url: &Url, raw: &str) -> MediaCandidate {
    let mut candidate = MediaCandidate::new(raw, MediaKind::RedditVideoPackaged)
        .with_quality_rank(quality_from_path(url.path()));
    if let Some(id) = first_segment(url) {
        candidate = candidate.with_canonical_id(id);
    }
    candidate
}

fn is_redgifs_host(url: &Url) -> bool {
    host_is(url, "redgifs.com")
}

fn extract_redgifs(_url: &Url, raw: &str) -> MediaCandidate {
    MediaCandidate::new(raw, MediaKind::RedGifs)
}

fn is_reddit_preview_host(url: &Url) -> bool {
    matches!(
        host(url).as_str(),
        "preview.redd.it" | "external-preview.redd.it"
    )
}

fn extract_reddit_preview(url: &Url, raw: &str) -> MediaCandidate {
    let wants_video = query_param(url, "format")
        .map(|f| f.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false);
    let kind = if wants_video {
        MediaKind::DirectVideo
    } else if path_extension(url).as_deref() == Some("gif") {
        MediaKind::DirectGif
    } else {
        MediaKind::DirectImage
    };
    let rank = query_param(url, "width")
        .and_then(|w| w.parse().ok())
        .unwrap_or(0);
    let mut candidate = MediaCandidate::new(raw, kind).with_quality_rank(rank);
    if let Some(segment) = first_segment(url) {
        candidate = candidate.with_canonical_id(format!("preview:{}", stem(&segment)));
    }
    candidate
}

fn has_video_extension(url: &Url) -> bool {
    path_extension(url)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extract_direct_video(url: &Url, raw: &str) -> MediaCandidate {
    MediaCandidate::new(raw, MediaKind::DirectVideo).with_quality_rank(quality_from_path(url.path()))
}

fn has_image_extension(url: &Url) -> bool {
    path_extension(url)
        .map(|ext| ext == "gif" || IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn extract_direct_image(url: &Url, raw: &str) -> MediaCandidate {
    let kind = if path_extension(url).as_deref() == Some("gif") {
        MediaKind::DirectGif
    } else {
        MediaKind::DirectImage
    };
    MediaCandidate::new(raw, kind)
}

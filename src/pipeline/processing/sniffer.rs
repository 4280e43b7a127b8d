//! Decide what a downloaded payload really is.
//!
//! A 2xx status is not proof of media: hosts answer with HTML error or login
//! pages under the media URL. The sniffed kind, not the requested URL, picks
//! the archive folder and extension.

use crate::constants::{READABLE_RATIO_THRESHOLD, SNIFF_WINDOW};
use crate::types::{DetectedKind, MediaKind};

const DOCUMENT_MARKERS: &[&str] = &[
    "<!doctype html",
    "<html",
    "<head",
    "<title>",
    "<script",
    "<style>",
];

/// Sniff with only the declared kind as a hint.
pub fn sniff(payload: &[u8], declared: MediaKind) -> DetectedKind {
    sniff_with_hints(payload, declared, None, None)
}

pub fn sniff_with_hints(
    payload: &[u8],
    declared: MediaKind,
    content_type: Option<&str>,
    url: Option<&str>,
) -> DetectedKind {
    if payload.is_empty() {
        return DetectedKind::Text;
    }

    let sample = &payload[..payload.len().min(SNIFF_WINDOW)];
    if looks_like_document(sample) || readable_ratio(sample) > READABLE_RATIO_THRESHOLD {
        return DetectedKind::Text;
    }

    content_type
        .and_then(kind_from_content_type)
        .or_else(|| url.and_then(kind_from_url))
        .or_else(|| kind_from_magic(payload))
        .unwrap_or_else(|| kind_from_declared(declared))
}

fn looks_like_document(sample: &[u8]) -> bool {
    let lowered = String::from_utf8_lossy(sample).to_ascii_lowercase();
    DOCUMENT_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Share of ASCII letters, digits, whitespace and punctuation in `sample`.
pub fn readable_ratio(sample: &[u8]) -> f64 {
    if sample.is_empty() {
        return 1.0;
    }
    let readable = sample
        .iter()
        .filter(|b| b.is_ascii_alphanumeric() || b.is_ascii_whitespace() || b.is_ascii_punctuation())
        .count();
    readable as f64 / sample.len() as f64
}

fn kind_from_content_type(content_type: &str) -> Option<DetectedKind> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if mime == "image/gif" {
        Some(DetectedKind::Gif)
    } else if mime.starts_with("image/") {
        Some(DetectedKind::Image)
    } else if mime.starts_with("video/") {
        Some(DetectedKind::Video)
    } else {
        None
    }
}

fn kind_from_url(url: &str) -> Option<DetectedKind> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let last = path.rsplit('/').next().unwrap_or_default();
    let (_, ext) = last.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "gif" => Some(DetectedKind::Gif),
        "jpg" | "jpeg" | "png" | "webp" | "bmp" | "avif" | "heic" | "tif" | "tiff" => {
            Some(DetectedKind::Image)
        }
        "mp4" | "webm" | "mov" | "mkv" | "m4v" | "gifv" => Some(DetectedKind::Video),
        _ => None,
    }
}

fn kind_from_magic(payload: &[u8]) -> Option<DetectedKind> {
    let found = infer::get(payload)?;
    match found.matcher_type() {
        infer::MatcherType::Image if found.mime_type() == "image/gif" => Some(DetectedKind::Gif),
        infer::MatcherType::Image => Some(DetectedKind::Image),
        infer::MatcherType::Video => Some(DetectedKind::Video),
        _ => None,
    }
}

fn kind_from_declared(declared: MediaKind) -> DetectedKind {
    match declared {
        MediaKind::DirectGif => DetectedKind::Gif,
        MediaKind::DirectImage => DetectedKind::Image,
        MediaKind::PlainText | MediaKind::Unknown => DetectedKind::Text,
        MediaKind::RedditVideoFallback
        | MediaKind::RedditVideoPackaged
        | MediaKind::RedGifs
        | MediaKind::DirectVideo => DetectedKind::Video,
    }
}

/// File extension for a stored payload: the sniffed kind first, refined by
/// the magic number when it agrees with that kind.
pub fn extension_for(payload: &[u8], detected: DetectedKind) -> &'static str {
    if detected == DetectedKind::Text {
        return "txt";
    }
    match infer::get(payload) {
        Some(found) if kind_from_magic(payload) == Some(detected) => found.extension(),
        _ => detected.default_extension(),
    }
}

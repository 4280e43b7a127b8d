use crate::error::FailureKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What a discovered URL nominally points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    RedditVideoFallback,
    RedditVideoPackaged,
    RedGifs,
    DirectVideo,
    DirectImage,
    DirectGif,
    PlainText,
    Unknown,
}

impl MediaKind {
    /// Formats served as a single file at the best available quality.
    pub fn is_self_contained(&self) -> bool {
        matches!(self, MediaKind::RedGifs)
    }

    pub fn is_downloadable(&self) -> bool {
        !matches!(self, MediaKind::PlainText | MediaKind::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::RedditVideoFallback => "reddit_video_fallback",
            MediaKind::RedditVideoPackaged => "reddit_video_packaged",
            MediaKind::RedGifs => "redgifs",
            MediaKind::DirectVideo => "direct_video",
            MediaKind::DirectImage => "direct_image",
            MediaKind::DirectGif => "direct_gif",
            MediaKind::PlainText => "plain_text",
            MediaKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "reddit_video_fallback" => Ok(MediaKind::RedditVideoFallback),
            "reddit_video_packaged" => Ok(MediaKind::RedditVideoPackaged),
            "redgifs" => Ok(MediaKind::RedGifs),
            "direct_video" => Ok(MediaKind::DirectVideo),
            "direct_image" => Ok(MediaKind::DirectImage),
            "direct_gif" => Ok(MediaKind::DirectGif),
            "plain_text" => Ok(MediaKind::PlainText),
            "unknown" => Ok(MediaKind::Unknown),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// A URL discovered during extraction, annotated by the classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCandidate {
    pub source_url: String,
    pub kind: MediaKind,
    pub canonical_id: Option<String>,
    pub quality_rank: Option<u32>,
}

impl MediaCandidate {
    pub fn new(source_url: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            source_url: source_url.into(),
            kind,
            canonical_id: None,
            quality_rank: None,
        }
    }

    pub fn with_canonical_id(mut self, canonical_id: impl Into<String>) -> Self {
        self.canonical_id = Some(canonical_id.into());
        self
    }

    pub fn with_quality_rank(mut self, rank: u32) -> Self {
        self.quality_rank = Some(rank);
        self
    }

    pub fn quality(&self) -> u32 {
        self.quality_rank.unwrap_or(0)
    }
}

/// What the downloaded bytes actually turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedKind {
    Image,
    Video,
    Gif,
    Text,
}

impl DetectedKind {
    pub fn folder(&self) -> &'static str {
        match self {
            DetectedKind::Image => crate::constants::IMAGES_DIR,
            DetectedKind::Video => crate::constants::VIDEOS_DIR,
            DetectedKind::Gif => crate::constants::GIFS_DIR,
            DetectedKind::Text => crate::constants::NOTES_DIR,
        }
    }

    pub fn default_extension(&self) -> &'static str {
        match self {
            DetectedKind::Image => "jpg",
            DetectedKind::Video => "mp4",
            DetectedKind::Gif => "gif",
            DetectedKind::Text => "txt",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DetectedKind::Image => "image",
            DetectedKind::Video => "video",
            DetectedKind::Gif => "gif",
            DetectedKind::Text => "text",
        }
    }
}

/// One row of the input directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub url: String,
    pub title: Option<String>,
    pub subreddit: Option<String>,
    pub author: Option<String>,
}

impl PostRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            subreddit: None,
            author: None,
        }
    }
}

/// A post after extraction, with every candidate it yielded (not deduplicated).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPost {
    pub post_url: String,
    pub title: String,
    pub subreddit: String,
    pub author: String,
    pub candidates: Vec<MediaCandidate>,
}

impl ExtractedPost {
    pub fn work_items(&self) -> Vec<WorkItem> {
        self.candidates
            .iter()
            .cloned()
            .map(|candidate| WorkItem {
                title: self.title.clone(),
                subreddit: self.subreddit.clone(),
                author: self.author.clone(),
                candidate,
                attempt: 0,
                last_error: None,
                pass: 0,
            })
            .collect()
    }
}

/// A deduplicated media item on its way through the acquisition engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub title: String,
    pub subreddit: String,
    pub author: String,
    pub candidate: MediaCandidate,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub pass: u32,
}

impl WorkItem {
    pub fn new(
        title: impl Into<String>,
        subreddit: impl Into<String>,
        author: impl Into<String>,
        candidate: MediaCandidate,
    ) -> Self {
        Self {
            title: title.into(),
            subreddit: subreddit.into(),
            author: author.into(),
            candidate,
            attempt: 0,
            last_error: None,
            pass: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.candidate.source_url
    }

    pub fn for_pass(mut self, pass: u32) -> Self {
        self.pass = pass;
        self.attempt = 0;
        self
    }
}

/// A work item that failed for the whole pass, with enough provenance to re-enqueue it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDownload {
    pub item: WorkItem,
    pub error: FailureKind,
}

/// A post whose media could not be extracted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPost {
    pub post: PostRef,
    pub error: FailureKind,
}

/// What happened on one attempt of one work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub success: bool,
    pub file_path: Option<PathBuf>,
    pub detected_kind: DetectedKind,
    pub byte_size: u64,
    pub error: Option<FailureKind>,
}

impl DownloadOutcome {
    pub fn stored(path: PathBuf, detected_kind: DetectedKind, byte_size: u64) -> Self {
        Self {
            success: true,
            file_path: Some(path),
            detected_kind,
            byte_size,
            error: None,
        }
    }

    pub fn failed(error: FailureKind, detected_kind: DetectedKind) -> Self {
        Self {
            success: false,
            file_path: None,
            detected_kind,
            byte_size: 0,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_parses_its_own_labels() {
        for kind in [
            MediaKind::RedditVideoFallback,
            MediaKind::RedditVideoPackaged,
            MediaKind::RedGifs,
            MediaKind::DirectVideo,
            MediaKind::DirectImage,
            MediaKind::DirectGif,
            MediaKind::PlainText,
            MediaKind::Unknown,
        ] {
            assert_eq!(kind.as_str().parse::<MediaKind>().unwrap(), kind);
        }
    }

    #[test]
    fn detected_kind_maps_to_archive_folders() {
        assert_eq!(DetectedKind::Image.folder(), "Images");
        assert_eq!(DetectedKind::Video.folder(), "Videos");
        assert_eq!(DetectedKind::Gif.folder(), "Gifs");
        assert_eq!(DetectedKind::Text.folder(), "Notes");
        assert_eq!(DetectedKind::Text.default_extension(), "txt");
    }

    #[test]
    fn extracted_post_expands_to_fresh_work_items() {
        let post = ExtractedPost {
            post_url: "https://www.reddit.com/r/pics/comments/abc/x/".into(),
            title: "A title".into(),
            subreddit: "pics".into(),
            author: "someone".into(),
            candidates: vec![MediaCandidate::new("https://i.redd.it/a.jpg", MediaKind::DirectImage)],
        };
        let items = post.work_items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempt, 0);
        assert_eq!(items[0].subreddit, "pics");
        assert_eq!(items[0].url(), "https://i.redd.it/a.jpg");
    }
}

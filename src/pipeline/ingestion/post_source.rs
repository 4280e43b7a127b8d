//! Reads the input directory of saved-post exports.
//!
//! Every regular, non-hidden file is read in name order. The delimiter
//! (`,`, `;`, tab or `|`) is detected per file from its first non-empty line,
//! and a header row is recognised by known column names. Without a header the
//! first URL-looking field is the post URL and the fields after it are title,
//! subreddit and author.

use crate::error::{ArchiverError, Result};
use crate::types::PostRef;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const URL_COLUMNS: &[&str] = &["url", "permalink", "link", "post_url", "post_link", "href"];
const TITLE_COLUMNS: &[&str] = &["title", "post_title", "name"];
const SUBREDDIT_COLUMNS: &[&str] = &["subreddit", "sub", "community"];
const AUTHOR_COLUMNS: &[&str] = &["author", "user", "username"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Columns {
    url: Option<usize>,
    title: Option<usize>,
    subreddit: Option<usize>,
    author: Option<usize>,
}

impl Columns {
    fn from_header(record: &StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            record
                .iter()
                .position(|field| names.contains(&field.trim().to_ascii_lowercase().as_str()))
        };
        let columns = Self {
            url: find(URL_COLUMNS),
            title: find(TITLE_COLUMNS),
            subreddit: find(SUBREDDIT_COLUMNS),
            author: find(AUTHOR_COLUMNS),
        };
        columns.url.map(|_| columns)
    }
}

/// Pick the delimiter that occurs most often in `line`; `,` wins ties.
pub fn detect_delimiter(line: &str) -> u8 {
    let mut best = b',';
    let mut best_count = 0;
    for delimiter in DELIMITERS {
        let count = line.bytes().filter(|b| *b == delimiter).count();
        if count > best_count {
            best = delimiter;
            best_count = count;
        }
    }
    best
}

fn looks_like_url(field: &str) -> bool {
    let field = field.trim();
    field.starts_with("http://")
        || field.starts_with("https://")
        || field.starts_with("/r/")
        || field.starts_with("r/")
        || field.starts_with("www.")
}

/// Make relative Reddit paths and scheme-less URLs absolute.
pub fn normalize_post_url(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(path) = raw.strip_prefix("/r/") {
        format!("https://www.reddit.com/r/{}", path)
    } else if raw.starts_with("r/") {
        format!("https://www.reddit.com/{}", raw)
    } else if raw.starts_with("www.") {
        format!("https://{}", raw)
    } else {
        raw.to_string()
    }
}

fn non_empty(record: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn post_from_record(record: &StringRecord, columns: Option<Columns>) -> Option<PostRef> {
    let columns = match columns {
        Some(columns) => columns,
        None => {
            let url = record.iter().position(looks_like_url)?;
            Columns {
                url: Some(url),
                title: Some(url + 1),
                subreddit: Some(url + 2),
                author: Some(url + 3),
            }
        }
    };
    let url = non_empty(record, columns.url)?;
    Some(PostRef {
        url: normalize_post_url(&url),
        title: non_empty(record, columns.title),
        subreddit: non_empty(record, columns.subreddit)
            .map(|s| s.trim_start_matches("r/").to_string()),
        author: non_empty(record, columns.author),
    })
}

/// Parse one input file.
pub fn read_post_file(path: &Path) -> Result<Vec<PostRef>> {
    let text = fs::read_to_string(path)?;
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let delimiter = detect_delimiter(first_line);

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut columns = None;
    let mut posts = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record?;
        if index == 0 {
            if let Some(header) = Columns::from_header(&record) {
                debug!("Header detected in {}: {:?}", path.display(), header);
                columns = Some(header);
                continue;
            }
        }
        match post_from_record(&record, columns) {
            Some(post) => posts.push(post),
            None if record.iter().any(|f| !f.trim().is_empty()) => {
                debug!("No post URL in row {} of {}", index + 1, path.display());
            }
            None => {}
        }
    }
    Ok(posts)
}

fn input_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        ArchiverError::Input(format!("cannot read input directory {}: {}", dir.display(), e))
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|name| !name.to_string_lossy().starts_with('.'))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Every post in `dir`, first occurrence of each URL wins.
pub fn load_post_refs(dir: &Path) -> Result<Vec<PostRef>> {
    let files = input_files(dir)?;
    if files.is_empty() {
        warn!("Input directory {} has no files", dir.display());
    }
    let mut seen = HashSet::new();
    let mut posts = Vec::new();
    for file in files {
        let parsed = match read_post_file(&file) {
            Ok(parsed) => parsed,
            Err(ArchiverError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Skipping non-text input file {}", file.display());
                continue;
            }
            Err(e) => return Err(e),
        };
        let before = posts.len();
        posts.extend(parsed.into_iter().filter(|p| seen.insert(p.url.clone())));
        info!(
            "Read {} posts from {}",
            posts.len() - before,
            file.display()
        );
    }
    Ok(posts)
}

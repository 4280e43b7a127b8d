//! Human-readable block files shared by the extraction artifacts and ledgers.
//!
//! ```text
//! # <title>
//! > key: value
//! https://first.url
//! https://second.url
//!
//! # <next title>
//! ...
//! ```
//!
//! Operators are expected to read and hand-edit these, so parsing is lenient:
//! blank lines separate blocks, unknown lines are treated as URLs.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub title: String,
    pub meta: Vec<(String, String)>,
    pub urls: Vec<String>,
}

impl Block {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.meta.push((key.into(), value));
        }
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.urls.push(url.into());
        self
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn render(&self) -> String {
        let mut out = format!("# {}\n", single_line(&self.title));
        for (key, value) in &self.meta {
            out.push_str(&format!("> {}: {}\n", key, single_line(value)));
        }
        for url in &self.urls {
            out.push_str(url);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn render_blocks(blocks: &[Block]) -> String {
    blocks.iter().map(Block::render).collect()
}

pub fn parse_blocks(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut current: Option<Block> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }
        let block = current.get_or_insert_with(Block::default);
        if let Some(title) = line.strip_prefix('#') {
            if block.title.is_empty() && block.meta.is_empty() && block.urls.is_empty() {
                block.title = title.trim().to_string();
                continue;
            }
            // a second header without a blank line starts a new block
            let finished = std::mem::replace(block, Block::new(title.trim()));
            blocks.push(finished);
        } else if let Some(meta) = line.strip_prefix('>') {
            if let Some((key, value)) = meta.split_once(':') {
                block.meta.push((key.trim().to_string(), value.trim().to_string()));
            }
        } else {
            block.urls.push(line.to_string());
        }
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    blocks
}

pub fn read_blocks(path: &Path) -> io::Result<Vec<Block>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse_blocks(&text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub fn append_blocks(path: &Path, blocks: &[Block]) -> io::Result<()> {
    if blocks.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(render_blocks(blocks).as_bytes())?;
    file.flush()?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}

/// Replace `path` in one step so readers never see a half-written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

pub fn write_blocks_atomic(path: &Path, blocks: &[Block]) -> io::Result<()> {
    write_atomic(path, render_blocks(blocks).as_bytes())
}

pub fn write_url_list(path: &Path, urls: &[String]) -> io::Result<()> {
    let mut out = String::new();
    for url in urls {
        out.push_str(url);
        out.push('\n');
    }
    write_atomic(path, out.as_bytes())
}

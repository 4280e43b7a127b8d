//! Extraction artifacts: `all_extracted.txt` (every candidate per post),
//! `deduplicated.txt` (the download queue) and `deduplicated_urls.txt`.

use crate::constants::{ALL_EXTRACTED_FILE, DEDUPLICATED_FILE, DEDUPLICATED_URLS_FILE};
use crate::error::Result;
use crate::gateway::block_file::{append_blocks, read_blocks, write_blocks_atomic, write_url_list, Block};
use crate::pipeline::processing::{classify, dedup};
use crate::types::{ExtractedPost, MediaCandidate, MediaKind, WorkItem};
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

fn post_block(post: &ExtractedPost) -> Block {
    let mut block = Block::new(post.title.clone())
        .with_meta("subreddit", post.subreddit.clone())
        .with_meta("author", post.author.clone())
        .with_meta("post", post.post_url.clone());
    for candidate in &post.candidates {
        block = block.with_url(candidate.source_url.clone());
    }
    block
}

/// Block for one work item; the ledger adds its own bookkeeping on top.
pub fn work_item_block(item: &WorkItem) -> Block {
    let mut block = Block::new(item.title.clone())
        .with_meta("subreddit", item.subreddit.clone())
        .with_meta("author", item.author.clone())
        .with_meta("kind", item.candidate.kind.as_str());
    if let Some(id) = &item.candidate.canonical_id {
        block = block.with_meta("canonical_id", id.clone());
    }
    if let Some(rank) = item.candidate.quality_rank {
        block = block.with_meta("quality", rank.to_string());
    }
    block
}

/// One work item per URL in the block. Blocks without a `kind` (hand
/// written, or a bare URL list) are classified again and lines that are not
/// URLs are dropped.
pub fn work_items_from_block(block: &Block) -> Vec<WorkItem> {
    let declared = block.meta("kind").and_then(|k| k.parse::<MediaKind>().ok());
    block
        .urls
        .iter()
        .filter_map(|url| {
            let candidate = match declared {
                Some(kind) => {
                    let mut candidate = MediaCandidate::new(url.clone(), kind);
                    candidate.canonical_id = block.meta("canonical_id").map(str::to_string);
                    candidate.quality_rank = block.meta("quality").and_then(|q| q.parse().ok());
                    candidate
                }
                None => {
                    let candidate = classify(url);
                    if candidate.kind == MediaKind::Unknown {
                        warn!("Skipping line that is not a URL: {:?}", url);
                        return None;
                    }
                    candidate
                }
            };
            Some(WorkItem::new(
                block.title.clone(),
                block.meta("subreddit").unwrap_or_default(),
                block.meta("author").unwrap_or_default(),
                candidate,
            ))
        })
        .collect()
}

pub fn write_all_extracted(root: &Path, posts: &[ExtractedPost]) -> Result<()> {
    let blocks: Vec<Block> = posts.iter().map(post_block).collect();
    write_blocks_atomic(&root.join(ALL_EXTRACTED_FILE), &blocks)?;
    Ok(())
}

/// Posts recovered by a retry pass are added after the original ones.
pub fn append_extracted(root: &Path, posts: &[ExtractedPost]) -> Result<()> {
    let blocks: Vec<Block> = posts.iter().map(post_block).collect();
    append_blocks(&root.join(ALL_EXTRACTED_FILE), &blocks)?;
    Ok(())
}

/// Number of posts and candidate URLs in `all_extracted.txt`.
pub fn extracted_counts(root: &Path) -> Result<(usize, usize)> {
    let blocks = read_blocks(&root.join(ALL_EXTRACTED_FILE))?;
    let urls = blocks.iter().map(|b| b.urls.len()).sum();
    Ok((blocks.len(), urls))
}

/// Write the deduplicated queue and its flat URL list.
pub fn write_queue(root: &Path, items: &[WorkItem]) -> Result<()> {
    let blocks: Vec<Block> = items
        .iter()
        .map(|item| work_item_block(item).with_url(item.url()))
        .collect();
    write_blocks_atomic(&root.join(DEDUPLICATED_FILE), &blocks)?;
    let urls: Vec<String> = items.iter().map(|item| item.url().to_string()).collect();
    write_url_list(&root.join(DEDUPLICATED_URLS_FILE), &urls)?;
    Ok(())
}

/// Read a queue file back, deduplicated: repeated URLs keep their first
/// occurrence and renditions of one asset collapse to the best one.
pub fn read_queue(path: &Path) -> Result<Vec<WorkItem>> {
    let mut seen = HashSet::new();
    let items: Vec<WorkItem> = read_blocks(path)?
        .iter()
        .flat_map(work_items_from_block)
        .filter(|item| seen.insert(item.url().to_string()))
        .collect();
    Ok(dedup::reduce_by(items, |item| &item.candidate))
}

pub fn default_queue_path(root: &Path) -> std::path::PathBuf {
    root.join(DEDUPLICATED_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn queue_file_keeps_canonical_identity() {
        let dir = tempdir().unwrap();
        let items = vec![
            WorkItem::new("Clip", "videos", "a", classify("https://v.redd.it/abc/DASH_720.mp4")),
            WorkItem::new("Link", "news", "b", classify("https://example.com/story")),
        ];
        write_queue(dir.path(), &items).unwrap();

        let loaded = read_queue(&dir.path().join(DEDUPLICATED_FILE)).unwrap();
        assert_eq!(loaded, items);
        let urls = fs::read_to_string(dir.path().join(DEDUPLICATED_URLS_FILE)).unwrap();
        assert_eq!(urls, "https://v.redd.it/abc/DASH_720.mp4\nhttps://example.com/story\n");
    }

    #[test]
    fn bare_url_list_is_classified() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(&path, "https://i.redd.it/a.png\nhttps://i.redd.it/a.png\nnot a url\n").unwrap();
        let loaded = read_queue(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].candidate.kind, MediaKind::DirectImage);
    }

    #[test]
    fn hand_written_list_keeps_one_rendition_per_asset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.txt");
        fs::write(
            &path,
            "https://v.redd.it/abc/DASH_240.mp4\nhttps://v.redd.it/abc/DASH_720.mp4\nhttps://i.redd.it/x.png\nhttps://v.redd.it/abc/DASH_480.mp4\n",
        )
        .unwrap();
        let urls: Vec<String> = read_queue(&path)
            .unwrap()
            .iter()
            .map(|item| item.url().to_string())
            .collect();
        assert_eq!(urls, vec!["https://v.redd.it/abc/DASH_720.mp4", "https://i.redd.it/x.png"]);
    }

    #[test]
    fn extracted_posts_list_every_candidate() {
        let dir = tempdir().unwrap();
        let post = ExtractedPost {
            post_url: "https://www.reddit.com/r/pics/comments/x/y/".into(),
            title: "Two".into(),
            subreddit: "pics".into(),
            author: "me".into(),
            candidates: vec![
                classify("https://i.redd.it/1.jpg"),
                classify("https://i.redd.it/2.jpg"),
            ],
        };
        write_all_extracted(dir.path(), &[post.clone()]).unwrap();
        append_extracted(dir.path(), &[post]).unwrap();
        assert_eq!(extracted_counts(dir.path()).unwrap(), (2, 4));
    }
}

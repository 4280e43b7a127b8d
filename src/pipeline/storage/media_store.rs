use crate::error::{ArchiverError, Result};
use crate::types::{DetectedKind, WorkItem};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const MAX_SUFFIX: u32 = 10_000;
const PARTIAL_PREFIX: &str = ".partial-";

/// Where a payload ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    /// An identical file was already in the archive and was kept as is.
    pub reused: bool,
}

/// Writes payloads into the per-kind archive folders.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    max_title_len: usize,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, max_title_len: usize) -> Self {
        Self {
            root: root.into(),
            max_title_len: max_title_len.max(1),
        }
    }

    /// `sanitized title + "_" + subreddit`, without extension.
    pub fn base_name(&self, title: &str, subreddit: &str) -> String {
        let truncated: String = title.trim().chars().take(self.max_title_len).collect();
        let mut name = sanitize_name(&truncated);
        if name.is_empty() {
            name = "untitled".to_string();
        }
        let subreddit = sanitize_name(subreddit);
        if !subreddit.is_empty() {
            name.push('_');
            name.push_str(&subreddit);
        }
        name
    }

    /// Store `bytes` under the folder for `kind`. Never overwrites: identical
    /// content is reused, different content gets `_2`, `_3`, ... suffixes.
    /// The payload is written to a hidden temp file in the same folder and
    /// only then linked under its final name, so a failed write leaves
    /// nothing behind under that name.
    pub fn persist(
        &self,
        item: &WorkItem,
        kind: DetectedKind,
        extension: &str,
        bytes: &[u8],
    ) -> Result<StoredFile> {
        let folder = self.root.join(kind.folder());
        fs::create_dir_all(&folder)?;
        let base = self.base_name(&item.title, &item.subreddit);
        let digest = sha256_hex(bytes);
        let mut pending = Some(write_partial(&folder, bytes)?);

        for n in 1..=MAX_SUFFIX {
            let file_name = if n == 1 {
                format!("{}.{}", base, extension)
            } else {
                format!("{}_{}.{}", base, n, extension)
            };
            let path = folder.join(file_name);
            let Some(partial) = pending.take() else { break };
            match partial.persist_noclobber(&path) {
                Ok(_) => {
                    debug!("Stored {} bytes at {}", bytes.len(), path.display());
                    return Ok(StoredFile { path, reused: false });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    if sha256_hex(&fs::read(&path)?) == digest {
                        debug!("Identical file already stored at {}", path.display());
                        return Ok(StoredFile { path, reused: true });
                    }
                    pending = Some(e.file);
                }
                Err(e) => return Err(e.error.into()),
            }
        }
        Err(ArchiverError::Input(format!(
            "no free file name for {} in {}",
            base,
            folder.display()
        )))
    }

    /// Save a text note for an item: its provenance plus, when given, the
    /// body that came back instead of media.
    pub fn write_note(&self, item: &WorkItem, body: Option<&[u8]>) -> Result<StoredFile> {
        let mut note = format!(
            "title: {}\nsubreddit: {}\nauthor: {}\nurl: {}\n",
            item.title,
            item.subreddit,
            item.author,
            item.url()
        );
        if let Some(body) = body.filter(|b| !b.is_empty()) {
            note.push('\n');
            note.push_str(&String::from_utf8_lossy(body));
            if !note.ends_with('\n') {
                note.push('\n');
            }
        }
        self.persist(item, DetectedKind::Text, "txt", note.as_bytes())
    }
}

/// Temp file in `folder` holding `bytes`; removed on drop unless persisted.
fn write_partial(folder: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let mut partial = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(folder)?;
    partial.write_all(bytes)?;
    partial.as_file().sync_all()?;
    Ok(partial)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Keep alphanumerics, `-` and `_`; whitespace becomes `_`; everything else
/// is dropped. Runs of `_` collapse to one.
pub fn sanitize_name(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        let mapped = if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            ch
        } else if ch.is_whitespace() {
            '_'
        } else {
            continue;
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MediaCandidate, MediaKind};
    use tempfile::tempdir;

    fn item(title: &str) -> WorkItem {
        WorkItem::new(
            title,
            "pics",
            "someone",
            MediaCandidate::new("https://i.redd.it/a.jpg", MediaKind::DirectImage),
        )
    }

    #[test]
    fn names_are_sanitized_and_truncated() {
        let store = MediaStore::new("/tmp/unused", 10);
        assert_eq!(store.base_name("Hello, World!  (OC)", "pics"), "Hello_Wor_pics");
        assert_eq!(store.base_name("???", ""), "untitled");
        assert_eq!(sanitize_name(" a / b \\ c "), "a_b_c");
        assert_eq!(sanitize_name("Ünïcode title"), "Ünïcode_title");
    }

    #[test]
    fn identical_bytes_reuse_the_existing_file() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 80);
        let first = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"same").unwrap();
        let again = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"same").unwrap();
        assert!(!first.reused);
        assert!(again.reused);
        assert_eq!(first.path, again.path);
        assert_eq!(first.path, dir.path().join("Images").join("Cat_pics.jpg"));
    }

    #[test]
    fn different_bytes_get_numeric_suffixes() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 80);
        store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"one").unwrap();
        let second = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"two").unwrap();
        let third = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"three").unwrap();
        assert!(second.path.ends_with("Images/Cat_pics_2.jpg"));
        assert!(third.path.ends_with("Images/Cat_pics_3.jpg"));
        assert_eq!(fs::read(&third.path).unwrap(), b"three");
    }

    #[test]
    fn repeated_stores_leave_one_file_per_payload_and_no_partials() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 80);
        let first = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"one").unwrap();
        let other = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"two").unwrap();
        // a retry of either payload lands on the file it already has
        let first_again = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"one").unwrap();
        let other_again = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"two").unwrap();
        assert_eq!(first_again.path, first.path);
        assert_eq!(other_again.path, other.path);
        assert!(first_again.reused && other_again.reused);

        let mut names: Vec<String> = fs::read_dir(dir.path().join("Images"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["Cat_pics.jpg", "Cat_pics_2.jpg"]);
    }

    #[test]
    fn leftover_partial_does_not_take_the_final_name() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 80);
        let images = dir.path().join("Images");
        fs::create_dir_all(&images).unwrap();
        fs::write(images.join(".partial-abc123"), b"trunc").unwrap();

        let stored = store.persist(&item("Cat"), DetectedKind::Image, "jpg", b"whole payload").unwrap();
        assert_eq!(stored.path, images.join("Cat_pics.jpg"));
        assert_eq!(fs::read(&stored.path).unwrap(), b"whole payload");
    }

    #[test]
    fn notes_carry_provenance_and_body() {
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path(), 80);
        let stored = store
            .write_note(&item("Cat"), Some(&b"<html>blocked</html>"[..]))
            .unwrap();
        assert!(stored.path.ends_with("Notes/Cat_pics.txt"));
        let text = fs::read_to_string(&stored.path).unwrap();
        assert!(text.contains("url: https://i.redd.it/a.jpg"));
        assert!(text.contains("<html>blocked</html>"));
    }
}

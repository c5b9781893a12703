use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::settings::Settings;

/// Text encodings tried in order when reading a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Utf8,
    Latin1,
}

/// One document found under the corpus root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub path: PathBuf,
    /// Path relative to the corpus root, `/`-separated
    pub relpath: String,
}

pub struct Corpus {
    root: PathBuf,
    skip_dirs: Vec<String>,
    /// Backup and report roots; whatever the tool writes is never re-read
    output_dirs: Vec<PathBuf>,
    extensions: Vec<String>,
}

impl Corpus {
    pub fn new(root: PathBuf, settings: &Settings) -> Self {
        Self {
            output_dirs: vec![settings.backup_root(&root), settings.report_root(&root)],
            root,
            skip_dirs: settings.skip_dirs.clone(),
            extensions: settings
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All matching documents in sorted traversal order. Any directory whose
    /// name is on the skip-list excludes its whole subtree.
    pub fn scan(&self) -> Result<Vec<CorpusEntry>> {
        info!("🔍 Scanning corpus: {}", self.root.display());

        if !self.root.is_dir() {
            anyhow::bail!("Corpus root is not a directory: {}", self.root.display());
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !self.is_skipped(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.has_extension(entry.path()) {
                continue;
            }

            let relpath = relative_path(&self.root, entry.path());
            debug!("Found document: {}", relpath);
            entries.push(CorpusEntry {
                path: entry.into_path(),
                relpath,
            });
        }

        info!("Found {} documents", entries.len());
        Ok(entries)
    }

    fn is_skipped(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() {
            return false;
        }
        if self.output_dirs.iter().any(|dir| dir == entry.path()) {
            debug!("Skipping output directory {}", entry.path().display());
            return true;
        }
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| self.skip_dirs.iter().any(|s| s == name))
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }
}

/// `path` relative to `root` with `/` separators, for reports and backups
pub fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// A document as read from disk: the exact bytes and their decoded text
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub bytes: Vec<u8>,
    pub text: String,
    pub encoding: Encoding,
}

/// Decode bytes as UTF-8, falling back to Latin-1. Never fails: every byte
/// sequence is valid Latin-1. A UTF-8 byte-order mark stays in the text so a
/// rewrite reproduces it.
pub fn decode(bytes: &[u8]) -> (String, Encoding) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), Encoding::Utf8),
        Err(_) => (
            bytes.iter().map(|&b| char::from(b)).collect(),
            Encoding::Latin1,
        ),
    }
}

/// Read and decode one document
pub fn read_document(path: &Path) -> Result<SourceFile> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let (text, encoding) = decode(&bytes);
    if encoding == Encoding::Latin1 {
        debug!("Decoded {} as latin-1", path.display());
    }
    Ok(SourceFile {
        bytes,
        text,
        encoding,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "<html></html>").unwrap();
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for rel in [
            "zh/index.html",
            "about.HTM",
            "en/index.html",
            "en/style.css",
            "node_modules/pkg/readme.html",
            "backups/run_1/index.html",
            "en/vendor/x.html",
            "index.html",
        ] {
            touch(dir.path(), rel);
        }

        let corpus = Corpus::new(dir.path().to_path_buf(), &Settings::default());
        let found: Vec<String> = corpus.scan().unwrap().into_iter().map(|e| e.relpath).collect();
        assert_eq!(
            found,
            vec!["about.HTM", "en/index.html", "index.html", "zh/index.html"]
        );
    }

    #[test]
    fn test_custom_output_dirs_are_not_scanned() {
        let dir = tempfile::tempdir().unwrap();
        for rel in [
            "site-backups/full_1/index.html",
            "audit/out/report.html",
            "audit/page.html",
            "index.html",
        ] {
            touch(dir.path(), rel);
        }

        let settings = Settings {
            backup_dir: PathBuf::from("site-backups"),
            report_dir: PathBuf::from("audit/out"),
            ..Settings::default()
        };
        let corpus = Corpus::new(dir.path().to_path_buf(), &settings);
        let found: Vec<String> = corpus.scan().unwrap().into_iter().map(|e| e.relpath).collect();
        assert_eq!(found, vec!["audit/page.html", "index.html"]);
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = Corpus::new(dir.path().join("nope"), &Settings::default());
        assert!(corpus.scan().is_err());
    }

    #[test]
    fn test_decode_utf8_keeps_bom() {
        let (text, encoding) = decode("\u{feff}<p>héllo</p>".as_bytes());
        assert_eq!(encoding, Encoding::Utf8);
        assert!(text.starts_with('\u{feff}'));
    }

    #[test]
    fn test_decode_falls_back_to_latin1() {
        let (text, encoding) = decode(&[b'<', b'p', b'>', 0xE9, b'<']);
        assert_eq!(encoding, Encoding::Latin1);
        assert_eq!(text, "<p>é<");
    }

    #[test]
    fn test_read_document_keeps_raw_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caf.html");
        let raw = vec![b'<', b'p', b'>', b'c', b'a', b'f', 0xE9, b'<', b'/', b'p', b'>'];
        fs::write(&path, &raw).unwrap();

        let source = read_document(&path).unwrap();
        assert_eq!(source.bytes, raw);
        assert_eq!(source.text, "<p>café</p>");
        assert_eq!(source.encoding, Encoding::Latin1);
    }

    #[test]
    fn test_relative_path_uses_slashes() {
        let root = Path::new("/srv/site");
        assert_eq!(
            relative_path(root, &root.join("en").join("index.html")),
            "en/index.html"
        );
    }
}

// Apply pipeline - run rules over one document, back up, then write atomically
use chrono::Local;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::discovery::SourceFile;
use crate::rules::RuleSet;

/// A document as handed to the pipeline
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub relpath: String,
    pub text: String,
    /// Bytes exactly as read from disk; backups store these
    pub original: Vec<u8>,
}

impl Document {
    pub fn new(path: PathBuf, relpath: String, source: SourceFile) -> Self {
        Self {
            path,
            relpath,
            text: source.text,
            original: source.bytes,
        }
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Could not create backup directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Could not write backup {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Could not stage {path}: {source}")]
    Stage { path: PathBuf, source: io::Error },
    #[error("Could not replace {path}: {source}")]
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

/// Keeps a copy of a document before it is rewritten
pub trait BackupStore: Send + Sync {
    /// Store the original bytes, returning where it went
    fn backup(&self, document: &Document) -> Result<PathBuf, BackupError>;
}

/// Receives rewritten documents
pub trait DocumentSink: Send + Sync {
    fn write(&self, path: &Path, text: &str) -> Result<(), WriteError>;
}

/// Run-scoped backup directory `<root>/<label>_<YYYYmmdd_HHMMSS>/` mirroring
/// the corpus layout
pub struct FsBackupStore {
    dir: PathBuf,
}

impl FsBackupStore {
    /// Create the run directory. Failing here aborts the run before any
    /// document is touched.
    pub fn create(backup_root: &Path, label: &str) -> Result<Self, BackupError> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let dir = backup_root.join(format!("{}_{}", label, stamp));
        fs::create_dir_all(&dir).map_err(|source| BackupError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl BackupStore for FsBackupStore {
    fn backup(&self, document: &Document) -> Result<PathBuf, BackupError> {
        let target = self.dir.join(&document.relpath);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| BackupError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let write = || -> io::Result<()> {
            let mut file = File::create(&target)?;
            file.write_all(&document.original)?;
            file.sync_all()
        };
        write().map_err(|source| BackupError::Write {
            path: target.clone(),
            source,
        })?;

        Ok(target)
    }
}

/// Writes through a temp file in the target directory and renames it over
/// the original, so readers see either the old or the new document
pub struct AtomicFileSink;

impl DocumentSink for AtomicFileSink {
    fn write(&self, path: &Path, text: &str) -> Result<(), WriteError> {
        let stage_err = |source| WriteError::Stage {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut tmp = NamedTempFile::new_in(dir).map_err(stage_err)?;
        tmp.write_all(text.as_bytes()).map_err(stage_err)?;
        tmp.as_file().sync_all().map_err(stage_err)?;
        if let Ok(meta) = fs::metadata(path) {
            tmp.as_file()
                .set_permissions(meta.permissions())
                .map_err(stage_err)?;
        }

        tmp.persist(path).map_err(|source| WriteError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    Unchanged,
    Written,
    DryRun,
    BackupFailed,
    WriteFailed,
}

/// Changes one rule made to one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleCount {
    pub rule: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub relpath: String,
    pub changed: bool,
    /// One entry per rule, in rule order
    pub counts: Vec<RuleCount>,
    pub backup: Option<PathBuf>,
    pub status: ApplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Writer<'a> {
    backups: &'a dyn BackupStore,
    sink: &'a dyn DocumentSink,
}

pub struct Pipeline<'a> {
    rules: &'a RuleSet,
    writer: Option<Writer<'a>>,
}

impl<'a> Pipeline<'a> {
    /// Backs up and rewrites every changed document
    pub fn new(
        rules: &'a RuleSet,
        backups: &'a dyn BackupStore,
        sink: &'a dyn DocumentSink,
    ) -> Self {
        Self {
            rules,
            writer: Some(Writer { backups, sink }),
        }
    }

    /// Computes outcomes without touching the filesystem
    pub fn dry_run(rules: &'a RuleSet) -> Self {
        Self {
            rules,
            writer: None,
        }
    }

    /// Run every rule in order over `text`
    pub fn run_rules(&self, text: &str) -> (String, Vec<RuleCount>) {
        let mut current = text.to_string();
        let mut counts = Vec::with_capacity(self.rules.len());

        for rule in self.rules.rules() {
            let result = rule.apply(&current);
            counts.push(RuleCount {
                rule: rule.name().to_string(),
                count: result.count,
            });
            if result.changed {
                current = result.text;
            }
        }

        (current, counts)
    }

    pub fn apply(&self, document: &Document) -> ApplyOutcome {
        let (text, counts) = self.run_rules(&document.text);
        let changed = text != document.text;
        let mut outcome = ApplyOutcome {
            relpath: document.relpath.clone(),
            changed,
            counts,
            backup: None,
            status: ApplyStatus::Unchanged,
            error: None,
        };

        if !changed {
            return outcome;
        }
        let Some(writer) = &self.writer else {
            outcome.status = ApplyStatus::DryRun;
            return outcome;
        };

        match writer.backups.backup(document) {
            Ok(path) => outcome.backup = Some(path),
            Err(e) => {
                warn!("Leaving {} untouched: {}", document.relpath, e);
                outcome.status = ApplyStatus::BackupFailed;
                outcome.error = Some(e.to_string());
                return outcome;
            }
        }

        match writer.sink.write(&document.path, &text) {
            Ok(()) => {
                debug!("Rewrote {}", document.relpath);
                outcome.status = ApplyStatus::Written;
            }
            Err(e) => {
                warn!("Write failed for {}: {}", document.relpath, e);
                outcome.status = ApplyStatus::WriteFailed;
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }
}

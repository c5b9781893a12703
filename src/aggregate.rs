// Aggregates - per-worker statistics folded per document, merged in order
use chrono::Local;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::classifier::{Finding, Note};
use crate::patterns::{TAG_INCLUDE, TAG_STORAGE_KEYS};
use crate::pipeline::{ApplyOutcome, ApplyStatus};

pub const TOP_INCLUDE_PATHS: usize = 20;
pub const TOP_STORAGE_KEYS: usize = 30;

fn push_capped(samples: &mut Vec<String>, value: &str, cap: usize) {
    if samples.len() < cap {
        samples.push(value.to_string());
    }
}

fn extend_capped(samples: &mut Vec<String>, more: Vec<String>, cap: usize) {
    let room = cap.saturating_sub(samples.len());
    samples.extend(more.into_iter().take(room));
}

fn add_counts<K: Ord>(into: &mut BTreeMap<K, usize>, from: BTreeMap<K, usize>) {
    for (key, count) in from {
        *into.entry(key).or_insert(0) += count;
    }
}

fn extend_sample_map<K: Ord>(
    into: &mut BTreeMap<K, Vec<String>>,
    from: BTreeMap<K, Vec<String>>,
    cap: usize,
) {
    for (key, samples) in from {
        extend_capped(into.entry(key).or_default(), samples, cap);
    }
}

/// Most frequent values first, ties broken alphabetically
fn top_n(counts: &HashMap<String, usize>, n: usize) -> Vec<Frequency> {
    let mut sorted: Vec<(&String, &usize)> = counts.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .take(n)
        .map(|(value, count)| Frequency {
            value: value.clone(),
            count: *count,
        })
        .collect()
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Read,
    Backup,
    Write,
}

#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub relpath: String,
    pub stage: FailureStage,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frequency {
    pub value: String,
    pub count: usize,
}

/// Totals for one rule across the corpus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub rule: String,
    /// Sum of change counts
    pub changes: usize,
    /// Documents the rule changed at least once
    pub documents: usize,
    /// First documents the rule changed, in traversal order
    pub samples: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FixAggregate {
    sample_cap: usize,
    scanned: usize,
    changed: usize,
    written: usize,
    rules: Vec<RuleStats>,
    failures: Vec<Failure>,
}

impl FixAggregate {
    pub fn new(rule_names: &[String], sample_cap: usize) -> Self {
        Self {
            sample_cap,
            scanned: 0,
            changed: 0,
            written: 0,
            rules: rule_names
                .iter()
                .map(|name| RuleStats {
                    rule: name.clone(),
                    ..RuleStats::default()
                })
                .collect(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &ApplyOutcome) {
        self.scanned += 1;

        for (stats, count) in self.rules.iter_mut().zip(&outcome.counts) {
            if count.count > 0 {
                stats.changes += count.count;
                stats.documents += 1;
                push_capped(&mut stats.samples, &outcome.relpath, self.sample_cap);
            }
        }

        if outcome.changed {
            self.changed += 1;
        }
        let stage = match outcome.status {
            ApplyStatus::Written => {
                self.written += 1;
                return;
            }
            ApplyStatus::Unchanged | ApplyStatus::DryRun => return,
            ApplyStatus::BackupFailed => FailureStage::Backup,
            ApplyStatus::WriteFailed => FailureStage::Write,
        };
        self.failures.push(Failure {
            relpath: outcome.relpath.clone(),
            stage,
            error: outcome.error.clone().unwrap_or_default(),
        });
    }

    pub fn record_read_failure(&mut self, relpath: &str, error: &str) {
        self.scanned += 1;
        self.failures.push(Failure {
            relpath: relpath.to_string(),
            stage: FailureStage::Read,
            error: error.to_string(),
        });
    }

    /// Combine with the aggregate of the documents that come after this one
    pub fn merge(mut self, later: FixAggregate) -> Self {
        self.scanned += later.scanned;
        self.changed += later.changed;
        self.written += later.written;
        for (stats, other) in self.rules.iter_mut().zip(later.rules) {
            stats.changes += other.changes;
            stats.documents += other.documents;
            extend_capped(&mut stats.samples, other.samples, self.sample_cap);
        }
        self.failures.extend(later.failures);
        self
    }

    pub fn finish(self, label: &str, dry_run: bool, backup_dir: Option<String>) -> FixReport {
        FixReport {
            label: label.to_string(),
            generated_at: timestamp(),
            dry_run,
            backup_dir,
            scanned: self.scanned,
            changed: self.changed,
            written: self.written,
            rules: self.rules,
            failures: self.failures,
        }
    }
}

/// Final, immutable result of a fix run
#[derive(Debug, Clone, Serialize)]
pub struct FixReport {
    pub label: String,
    pub generated_at: String,
    pub dry_run: bool,
    pub backup_dir: Option<String>,
    pub scanned: usize,
    pub changed: usize,
    pub written: usize,
    pub rules: Vec<RuleStats>,
    pub failures: Vec<Failure>,
}

/// One document with anything worth reporting
#[derive(Debug, Clone, Serialize)]
pub struct AuditHit {
    pub file: String,
    #[serde(flatten)]
    pub finding: Finding,
}

#[derive(Debug, Clone)]
pub struct AuditAggregate {
    sample_cap: usize,
    scanned: usize,
    tag_docs: BTreeMap<String, usize>,
    tag_samples: BTreeMap<String, Vec<String>>,
    note_docs: BTreeMap<Note, usize>,
    note_samples: BTreeMap<Note, Vec<String>>,
    include_paths: HashMap<String, usize>,
    storage_keys: HashMap<String, usize>,
    hits: Vec<AuditHit>,
    unreadable: Vec<Failure>,
}

impl AuditAggregate {
    pub fn new(sample_cap: usize) -> Self {
        Self {
            sample_cap,
            scanned: 0,
            tag_docs: BTreeMap::new(),
            tag_samples: BTreeMap::new(),
            note_docs: BTreeMap::new(),
            note_samples: BTreeMap::new(),
            include_paths: HashMap::new(),
            storage_keys: HashMap::new(),
            hits: Vec::new(),
            unreadable: Vec::new(),
        }
    }

    pub fn record(&mut self, relpath: &str, finding: Finding) {
        self.scanned += 1;

        for tag in &finding.tags {
            *self.tag_docs.entry(tag.clone()).or_insert(0) += 1;
            push_capped(
                self.tag_samples.entry(tag.clone()).or_default(),
                relpath,
                self.sample_cap,
            );
        }
        for note in &finding.notes {
            *self.note_docs.entry(*note).or_insert(0) += 1;
            push_capped(
                self.note_samples.entry(*note).or_default(),
                relpath,
                self.sample_cap,
            );
        }
        for path in finding.captured(TAG_INCLUDE) {
            *self.include_paths.entry(path.clone()).or_insert(0) += 1;
        }
        for key in finding.captured(TAG_STORAGE_KEYS) {
            *self.storage_keys.entry(key.clone()).or_insert(0) += 1;
        }

        if !finding.is_empty() {
            self.hits.push(AuditHit {
                file: relpath.to_string(),
                finding,
            });
        }
    }

    pub fn record_read_failure(&mut self, relpath: &str, error: &str) {
        self.scanned += 1;
        self.unreadable.push(Failure {
            relpath: relpath.to_string(),
            stage: FailureStage::Read,
            error: error.to_string(),
        });
    }

    /// Combine with the aggregate of the documents that come after this one
    pub fn merge(mut self, later: AuditAggregate) -> Self {
        let cap = self.sample_cap;
        self.scanned += later.scanned;
        add_counts(&mut self.tag_docs, later.tag_docs);
        extend_sample_map(&mut self.tag_samples, later.tag_samples, cap);
        add_counts(&mut self.note_docs, later.note_docs);
        extend_sample_map(&mut self.note_samples, later.note_samples, cap);
        for (path, count) in later.include_paths {
            *self.include_paths.entry(path).or_insert(0) += count;
        }
        for (key, count) in later.storage_keys {
            *self.storage_keys.entry(key).or_insert(0) += count;
        }
        self.hits.extend(later.hits);
        self.unreadable.extend(later.unreadable);
        self
    }

    pub fn finish(mut self) -> AuditReport {
        let mut tags: Vec<TagStats> = self
            .tag_docs
            .iter()
            .map(|(tag, documents)| TagStats {
                tag: tag.clone(),
                documents: *documents,
                samples: self.tag_samples.remove(tag).unwrap_or_default(),
            })
            .collect();
        tags.sort_by(|a, b| b.documents.cmp(&a.documents).then_with(|| a.tag.cmp(&b.tag)));

        let notes = self
            .note_docs
            .iter()
            .map(|(note, documents)| NoteStats {
                note: *note,
                documents: *documents,
                samples: self.note_samples.remove(note).unwrap_or_default(),
            })
            .collect();

        AuditReport {
            generated_at: timestamp(),
            scanned: self.scanned,
            documents_with_hits: self.hits.len(),
            tags,
            notes,
            top_include_paths: top_n(&self.include_paths, TOP_INCLUDE_PATHS),
            top_storage_keys: top_n(&self.storage_keys, TOP_STORAGE_KEYS),
            hits: self.hits,
            unreadable: self.unreadable,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TagStats {
    pub tag: String,
    pub documents: usize,
    pub samples: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteStats {
    pub note: Note,
    pub documents: usize,
    pub samples: Vec<String>,
}

/// Final, immutable result of an audit run
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub generated_at: String,
    pub scanned: usize,
    pub documents_with_hits: usize,
    /// Most common tags first
    pub tags: Vec<TagStats>,
    pub notes: Vec<NoteStats>,
    pub top_include_paths: Vec<Frequency>,
    pub top_storage_keys: Vec<Frequency>,
    pub hits: Vec<AuditHit>,
    pub unreadable: Vec<Failure>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::patterns::PatternRegistry;
    use crate::pipeline::RuleCount;
    use crate::settings::Settings;

    fn outcome(relpath: &str, counts: &[usize], status: ApplyStatus) -> ApplyOutcome {
        ApplyOutcome {
            relpath: relpath.to_string(),
            changed: counts.iter().any(|c| *c > 0),
            counts: counts
                .iter()
                .enumerate()
                .map(|(i, c)| RuleCount {
                    rule: format!("r{}", i),
                    count: *c,
                })
                .collect(),
            backup: None,
            status,
            error: (status == ApplyStatus::BackupFailed).then(|| "disk full".to_string()),
        }
    }

    fn names() -> Vec<String> {
        vec!["r0".to_string(), "r1".to_string()]
    }

    #[test]
    fn test_fix_totals_and_failures() {
        let mut agg = FixAggregate::new(&names(), 30);
        agg.record(&outcome("a.html", &[2, 0], ApplyStatus::Written));
        agg.record(&outcome("b.html", &[0, 0], ApplyStatus::Unchanged));
        agg.record(&outcome("c.html", &[1, 1], ApplyStatus::BackupFailed));
        agg.record_read_failure("d.html", "permission denied");

        let report = agg.finish("full", false, None);
        assert_eq!(report.scanned, 4);
        assert_eq!(report.changed, 2);
        assert_eq!(report.written, 1);
        assert_eq!(report.rules[0].changes, 3);
        assert_eq!(report.rules[0].documents, 2);
        assert_eq!(report.rules[1].samples, vec!["c.html"]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].stage, FailureStage::Backup);
        assert_eq!(report.failures[1].stage, FailureStage::Read);
    }

    #[test]
    fn test_fix_merge_matches_sequential_fold() {
        let docs: Vec<ApplyOutcome> = (0..10)
            .map(|i| outcome(&format!("p{}.html", i), &[1, i % 2], ApplyStatus::Written))
            .collect();

        let mut sequential = FixAggregate::new(&names(), 3);
        for doc in &docs {
            sequential.record(doc);
        }

        let mut left = FixAggregate::new(&names(), 3);
        let mut right = FixAggregate::new(&names(), 3);
        for doc in &docs[..4] {
            left.record(doc);
        }
        for doc in &docs[4..] {
            right.record(doc);
        }
        let merged = left.merge(right);

        let a = sequential.finish("x", false, None);
        let b = merged.finish("x", false, None);
        assert_eq!(a.rules, b.rules);
        assert_eq!(b.rules[0].samples, vec!["p0.html", "p1.html", "p2.html"]);
        assert_eq!(b.rules[1].samples, vec!["p1.html", "p3.html", "p5.html"]);
    }

    #[test]
    fn test_audit_aggregate() {
        let registry = PatternRegistry::new(&Settings::default()).unwrap();
        let classifier = Classifier::new(&registry);
        let pages = [
            ("a.html", r#"<div id="cookie-banner"></div><script src="/assets/js/cookie-consent.js"></script>"#),
            ("b.html", "<p>clean</p>"),
            ("c.html", r#"<script src="../assets/js/cookie-consent.js"></script><script>localStorage.setItem('consent', 1); localStorage.setItem('consent', 2);</script>"#),
            ("d.html", r#"<script src="/assets/js/cookie-consent.js"></script>"#),
        ];

        let mut first = AuditAggregate::new(1);
        let mut second = AuditAggregate::new(1);
        for (i, (path, text)) in pages.iter().enumerate() {
            let target = if i < 2 { &mut first } else { &mut second };
            target.record(path, classifier.classify(text));
        }
        let report = first.merge(second).finish();

        assert_eq!(report.scanned, 4);
        assert_eq!(report.documents_with_hits, 3);
        assert_eq!(report.tags[0].tag, TAG_INCLUDE);
        assert_eq!(report.tags[0].documents, 3);
        assert_eq!(report.tags[0].samples, vec!["a.html"]);
        assert_eq!(
            report.top_include_paths[0],
            Frequency {
                value: "/assets/js/cookie-consent.js".to_string(),
                count: 2
            }
        );
        assert_eq!(report.top_storage_keys[0].count, 2);
        assert_eq!(report.notes[0].note, Note::LikelyDuplicateBanner);
        assert_eq!(report.hits[0].file, "a.html");
    }

    #[test]
    fn test_top_n_ties_are_alphabetical() {
        let counts: HashMap<String, usize> = [("b", 2), ("a", 2), ("c", 5), ("d", 1)]
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        let top: Vec<String> = top_n(&counts, 3).into_iter().map(|f| f.value).collect();
        assert_eq!(top, vec!["c", "a", "b"]);
    }
}

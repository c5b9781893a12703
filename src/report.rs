// Report rendering - text and JSON files under the report directory, console tables
use anyhow::{Context, Result};
use chrono::Local;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Table};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::aggregate::{AuditReport, FixReport, TOP_INCLUDE_PATHS, TOP_STORAGE_KEYS};
use crate::classifier::Note;

const RULE: &str = "========================================================================";

pub const AUDIT_SUMMARY_FILE: &str = "audit_summary.txt";
pub const AUDIT_HITS_FILE: &str = "audit_hits.json";

/// Plain-text audit summary
pub fn render_audit_text(report: &AuditReport, root: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CONSENT AUDIT REPORT");
    let _ = writeln!(out, "Root: {}", root.display());
    let _ = writeln!(out, "Generated: {}", report.generated_at);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out);
    let _ = writeln!(out, "Documents scanned: {}", report.scanned);
    let _ = writeln!(out, "Documents with findings: {}", report.documents_with_hits);
    if !report.unreadable.is_empty() {
        let _ = writeln!(out, "Unreadable documents: {}", report.unreadable.len());
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "A) TAG COUNTS (documents)");
    for stats in &report.tags {
        let _ = writeln!(out, "- {}: {}", stats.tag, stats.documents);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "B) NOTES (documents)");
    for stats in &report.notes {
        let _ = writeln!(out, "- {}: {}", stats.note.code(), stats.documents);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "C) Consent script include paths (top {})", TOP_INCLUDE_PATHS);
    for freq in &report.top_include_paths {
        let _ = writeln!(out, "- {:>4} x {}", freq.count, freq.value);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "D) localStorage keys (top {})", TOP_STORAGE_KEYS);
    for freq in &report.top_storage_keys {
        let _ = writeln!(out, "- {:>4} x {}", freq.count, freq.value);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "E) FIRST FILES PER TAG");
    let mut by_name: Vec<_> = report.tags.iter().collect();
    by_name.sort_by(|a, b| a.tag.cmp(&b.tag));
    for stats in by_name {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}]", stats.tag);
        for path in &stats.samples {
            let _ = writeln!(out, "  - {}", path);
        }
    }
    for stats in &report.notes {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}]", stats.note.code());
        for path in &stats.samples {
            let _ = writeln!(out, "  - {}", path);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "F) LEGEND");
    for note in Note::ALL {
        let _ = writeln!(out, "- {}", note);
    }
    let _ = writeln!(
        out,
        "- page_view is flagged only for a real gtag('event', 'page_view') call or send_page_view: true outside comments"
    );
    let _ = writeln!(out, "- gtag('config', ...) presence is informational only");
    out
}

/// Plain-text fix log
pub fn render_fix_text(report: &FixReport, root: &Path) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CONSENT FIX LOG ({})", report.label);
    let _ = writeln!(out, "Root: {}", root.display());
    let _ = writeln!(out, "Generated: {}", report.generated_at);
    match (&report.backup_dir, report.dry_run) {
        (_, true) => {
            let _ = writeln!(out, "Mode: dry run, nothing written");
        }
        (Some(dir), false) => {
            let _ = writeln!(out, "Backup dir: {}", dir);
        }
        (None, false) => {}
    }
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "Documents scanned: {}", report.scanned);
    let _ = writeln!(out, "Documents changed: {}", report.changed);
    let _ = writeln!(out, "Documents written: {}", report.written);

    let _ = writeln!(out);
    let _ = writeln!(out, "Totals:");
    for stats in &report.rules {
        let _ = writeln!(
            out,
            "- {}: {} changes in {} documents",
            stats.rule, stats.changes, stats.documents
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Samples:");
    for stats in report.rules.iter().filter(|s| !s.samples.is_empty()) {
        let _ = writeln!(out);
        let _ = writeln!(out, "[{}]", stats.rule);
        for path in &stats.samples {
            let _ = writeln!(out, "  - {}", path);
        }
    }

    if !report.failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Failures (documents left untouched):");
        for failure in &report.failures {
            let _ = writeln!(
                out,
                "  - {} [{:?}] {}",
                failure.relpath, failure.stage, failure.error
            );
        }
    }
    out
}

pub fn audit_table(report: &AuditReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Tag / note", "Documents", "First file"]);

    for stats in &report.tags {
        table.add_row(vec![
            Cell::new(&stats.tag),
            Cell::new(stats.documents),
            Cell::new(stats.samples.first().map(String::as_str).unwrap_or("")),
        ]);
    }
    for stats in &report.notes {
        table.add_row(vec![
            Cell::new(stats.note.code()),
            Cell::new(stats.documents),
            Cell::new(stats.samples.first().map(String::as_str).unwrap_or("")),
        ]);
    }
    table
}

pub fn fix_table(report: &FixReport) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Rule", "Changes", "Documents"]);

    for stats in &report.rules {
        table.add_row(vec![
            Cell::new(&stats.rule),
            Cell::new(stats.changes),
            Cell::new(stats.documents),
        ]);
    }
    table
}

/// Writes report files into one directory
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    /// Create the report directory up front so a bad path fails before any
    /// document is read
    pub fn create(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write_audit(&self, report: &AuditReport, root: &Path) -> Result<(PathBuf, PathBuf)> {
        let text_path = self.dir.join(AUDIT_SUMMARY_FILE);
        let json_path = self.dir.join(AUDIT_HITS_FILE);
        self.write_text(&text_path, &render_audit_text(report, root))?;
        self.write_json(&json_path, report)?;
        info!("📄 Audit report written to {}", self.dir.display());
        Ok((text_path, json_path))
    }

    pub fn write_fix(&self, report: &FixReport, root: &Path) -> Result<(PathBuf, PathBuf)> {
        let stem = format!(
            "fix_{}_{}",
            report.label,
            Local::now().format("%Y%m%d_%H%M%S")
        );
        let text_path = self.dir.join(format!("{}.log", stem));
        let json_path = self.dir.join(format!("{}.json", stem));
        self.write_text(&text_path, &render_fix_text(report, root))?;
        self.write_json(&json_path, report)?;
        info!("📄 Fix log written to {}", text_path.display());
        Ok((text_path, json_path))
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<()> {
        fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AuditAggregate, FixAggregate};
    use crate::classifier::Classifier;
    use crate::patterns::PatternRegistry;
    use crate::pipeline::{ApplyOutcome, ApplyStatus, RuleCount};
    use crate::settings::Settings;

    fn audit_report() -> AuditReport {
        let registry = PatternRegistry::new(&Settings::default()).unwrap();
        let classifier = Classifier::new(&registry);
        let mut agg = AuditAggregate::new(20);
        agg.record(
            "en/index.html",
            classifier.classify(
                r#"<div id="cookie-banner"></div><script src="/assets/js/cookie-consent.js"></script>"#,
            ),
        );
        agg.record("en/clean.html", classifier.classify("<p>clean</p>"));
        agg.finish()
    }

    #[test]
    fn test_audit_text_sections() {
        let text = render_audit_text(&audit_report(), Path::new("/srv/site"));
        assert!(text.contains("Documents scanned: 2"));
        assert!(text.contains("- legacy_div_cookie_banner: 1"));
        assert!(text.contains("- LIKELY_DUPLICATE_BANNER: 1"));
        assert!(text.contains("-    1 x /assets/js/cookie-consent.js"));
        assert!(text.contains("[legacy_div_cookie_banner]\n  - en/index.html"));
        assert!(text.contains("HARD_NO: inline consent handler definitions"));
    }

    #[test]
    fn test_fix_text_lists_failures() {
        let mut agg = FixAggregate::new(&["normalize-include".to_string()], 30);
        agg.record(&ApplyOutcome {
            relpath: "a.html".to_string(),
            changed: true,
            counts: vec![RuleCount {
                rule: "normalize-include".to_string(),
                count: 2,
            }],
            backup: None,
            status: ApplyStatus::BackupFailed,
            error: Some("disk full".to_string()),
        });
        let report = agg.finish("full", false, Some("backups/full_1".to_string()));
        let text = render_fix_text(&report, Path::new("/srv/site"));

        assert!(text.starts_with("CONSENT FIX LOG (full)"));
        assert!(text.contains("Backup dir: backups/full_1"));
        assert!(text.contains("- normalize-include: 2 changes in 1 documents"));
        assert!(text.contains("  - a.html [Backup] disk full"));
    }

    #[test]
    fn test_writer_creates_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReportWriter::create(dir.path().join("reports")).unwrap();
        let (text, json) = writer.write_audit(&audit_report(), dir.path()).unwrap();

        assert!(text.ends_with(AUDIT_SUMMARY_FILE));
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(parsed["scanned"], 2);
        assert_eq!(parsed["hits"][0]["file"], "en/index.html");
        assert_eq!(parsed["hits"][0]["notes"][0], "LIKELY_DUPLICATE_BANNER");
    }

    #[test]
    fn test_tables_have_a_row_per_entry() {
        let table = audit_table(&audit_report());
        // two tags and one note
        assert_eq!(table.row_iter().count(), 3);
    }
}

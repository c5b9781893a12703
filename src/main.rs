use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod aggregate;
mod classifier;
mod cli_output;
mod discovery;
mod inspect;
mod locator;
mod patterns;
mod pipeline;
mod report;
mod rules;
mod settings;

use aggregate::{AuditAggregate, FixAggregate};
use classifier::Classifier;
use cli_output::{format_duration, OutputMode, OutputWriter};
use discovery::{read_document, relative_path, Corpus, CorpusEntry};
use inspect::{needle_context, InspectOptions, Inspector};
use patterns::PatternRegistry;
use pipeline::{AtomicFileSink, Document, FsBackupStore, Pipeline};
use report::ReportWriter;
use rules::{Profile, RuleId, RuleSet};
use settings::Settings;

#[derive(Parser)]
#[command(name = "consentfix")]
#[command(
    about = "Audit and rewrite static HTML so every page carries exactly one canonical consent script",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: <root>/.consentfix.json, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus root directory
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Machine-readable JSON output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify every document and write the audit report
    Audit {
        /// Worker threads (default: one per core)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Print the summary only, do not write report files
        #[arg(long)]
        no_report: bool,
    },

    /// Apply a rule profile to every document, backing up what changes
    Fix {
        /// Rule profile (full, inline-cleanup, page-view, dedupe, mass)
        #[arg(short, long, default_value = "full")]
        profile: String,

        /// Comma-separated rule ids, overriding the profile
        #[arg(long)]
        rules: Option<String>,

        /// Report what would change without backing up or writing
        #[arg(long)]
        dry_run: bool,

        /// Worker threads (default: one per core)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Name used for the backup directory and fix log (default: profile name)
        #[arg(long)]
        label: Option<String>,
    },

    /// Show tags and surrounding lines for specific files
    Inspect {
        /// Files, relative to the root unless absolute
        #[arg(required_unless_present = "from")]
        files: Vec<PathBuf>,

        /// Read the file list from a text file, one path per line
        #[arg(long)]
        from: Option<PathBuf>,

        /// Show every line containing this string instead of tag context
        #[arg(long)]
        needle: Option<String>,

        /// Lines of context around each hit
        #[arg(long, default_value = "2")]
        context: usize,

        /// Hits shown per tag
        #[arg(long, default_value = "2")]
        max_hits: usize,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List rule ids and profiles
    Rules,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let output = OutputWriter::new(OutputMode::detect(cli.json));
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Corpus root not found: {}", cli.root.display()))?;
    let settings = Settings::resolve(cli.config.as_deref(), &root)?;

    match cli.command {
        Commands::Audit { jobs, no_report } => {
            info!("🔎 Auditing {}", root.display());
            run_audit(&root, &settings, jobs, no_report, &output)
        }

        Commands::Fix {
            profile,
            rules,
            dry_run,
            jobs,
            label,
        } => {
            let (ids, default_label) = match &rules {
                Some(list) => (RuleSet::parse_list(list)?, "custom".to_string()),
                None => {
                    let profile: Profile = profile.parse()?;
                    (profile.rule_ids(&settings), profile.name().to_string())
                }
            };
            let label = label.unwrap_or(default_label);
            info!("🔧 Fixing {} with `{}`", root.display(), label);
            run_fix(&root, &settings, &ids, &label, dry_run, jobs, &output)
        }

        Commands::Inspect {
            files,
            from,
            needle,
            context,
            max_hits,
            output: out_path,
        } => {
            let mut files = files;
            if let Some(list) = from {
                let content = fs::read_to_string(&list)
                    .with_context(|| format!("Failed to read file list {}", list.display()))?;
                files.extend(
                    content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with('#'))
                        .map(PathBuf::from),
                );
            }
            let options = InspectOptions { context, max_hits };
            let text = run_inspect(&root, &settings, &files, needle.as_deref(), options)?;

            match out_path {
                Some(path) => {
                    fs::write(&path, &text)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    output.success(&format!("Inspection written to {}", path.display()));
                }
                None => {
                    output.block(&text);
                    output.emit_json(&InspectPayload { files: &files, text: &text });
                }
            }
            Ok(())
        }

        Commands::Rules => {
            print_rules(&settings, &output);
            Ok(())
        }
    }
}

fn build_pool(jobs: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(jobs) = jobs {
        builder = builder.num_threads(jobs);
    }
    builder.build().context("Failed to start worker pool")
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed}] {bar:40.cyan/blue} {pos}/{len} documents {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

fn scan_corpus(root: &Path, settings: &Settings) -> Result<Vec<CorpusEntry>> {
    Corpus::new(root.to_path_buf(), settings).scan()
}

fn run_audit(
    root: &Path,
    settings: &Settings,
    jobs: Option<usize>,
    no_report: bool,
    output: &OutputWriter,
) -> Result<()> {
    let started = Instant::now();
    let registry = PatternRegistry::new(settings)?;
    let writer = if no_report {
        None
    } else {
        Some(ReportWriter::create(settings.report_root(root))?)
    };
    let entries = scan_corpus(root, settings)?;
    let pool = build_pool(jobs)?;

    let classifier = Classifier::new(&registry);
    let cap = settings.audit_sample_cap;
    let pb = progress_bar(entries.len(), output.is_human());

    let aggregate = pool.install(|| {
        entries
            .par_iter()
            .fold(
                || AuditAggregate::new(cap),
                |mut agg, entry| {
                    match read_document(&entry.path) {
                        Ok(source) => agg.record(&entry.relpath, classifier.classify(&source.text)),
                        Err(e) => {
                            warn!("{:#}", e);
                            agg.record_read_failure(&entry.relpath, &format!("{:#}", e));
                        }
                    }
                    pb.inc(1);
                    agg
                },
            )
            .reduce(|| AuditAggregate::new(cap), AuditAggregate::merge)
    });
    pb.finish_and_clear();
    let report = aggregate.finish();

    output.section("Consent audit");
    output.table(&[
        ("Documents scanned", report.scanned.to_string()),
        ("With findings", report.documents_with_hits.to_string()),
        ("Unreadable", report.unreadable.len().to_string()),
        ("Elapsed", format_duration(started.elapsed())),
    ]);
    if !report.tags.is_empty() {
        output.block(&report::audit_table(&report).to_string());
    }

    if let Some(writer) = writer {
        let (text, json) = writer.write_audit(&report, root)?;
        output.success(&format!("Text report: {}", text.display()));
        output.success(&format!("JSON report: {}", json.display()));
    }
    output.emit_json(&report);
    Ok(())
}

fn run_fix(
    root: &Path,
    settings: &Settings,
    ids: &[RuleId],
    label: &str,
    dry_run: bool,
    jobs: Option<usize>,
    output: &OutputWriter,
) -> Result<()> {
    let started = Instant::now();
    let rule_set = RuleSet::from_ids(ids, settings)?;
    let writer = ReportWriter::create(settings.report_root(root))?;
    let store = if dry_run {
        None
    } else {
        let store = FsBackupStore::create(&settings.backup_root(root), label)
            .context("Backup directory is required before any document is rewritten")?;
        info!("💾 Backups go to {}", store.dir().display());
        Some(store)
    };
    let sink = AtomicFileSink;
    let pipeline = match &store {
        Some(store) => Pipeline::new(&rule_set, store, &sink),
        None => Pipeline::dry_run(&rule_set),
    };

    let entries = scan_corpus(root, settings)?;
    let pool = build_pool(jobs)?;
    let names = rule_set.names();
    let cap = settings.fix_sample_cap;
    let pb = progress_bar(entries.len(), output.is_human());

    let aggregate = pool.install(|| {
        entries
            .par_iter()
            .fold(
                || FixAggregate::new(&names, cap),
                |mut agg, entry| {
                    match read_document(&entry.path) {
                        Ok(source) => {
                            let outcome = pipeline.apply(&Document::new(
                                entry.path.clone(),
                                entry.relpath.clone(),
                                source,
                            ));
                            agg.record(&outcome);
                        }
                        Err(e) => {
                            warn!("{:#}", e);
                            agg.record_read_failure(&entry.relpath, &format!("{:#}", e));
                        }
                    }
                    pb.inc(1);
                    agg
                },
            )
            .reduce(|| FixAggregate::new(&names, cap), FixAggregate::merge)
    });
    pb.finish_and_clear();

    let backup_dir = store.as_ref().map(|s| s.dir().display().to_string());
    let report = aggregate.finish(label, dry_run, backup_dir);
    let (log, _) = writer.write_fix(&report, root)?;

    output.section(if dry_run {
        "Consent fix (dry run)"
    } else {
        "Consent fix"
    });
    output.table(&[
        ("Rules", rule_set.names().join(", ")),
        ("Documents scanned", report.scanned.to_string()),
        ("Changed", report.changed.to_string()),
        ("Written", report.written.to_string()),
        ("Elapsed", format_duration(started.elapsed())),
    ]);
    output.block(&report::fix_table(&report).to_string());
    if dry_run {
        output.info("Dry run: nothing was backed up or written");
    }

    for failure in &report.failures {
        output.warning(&format!(
            "{} left untouched ({:?}): {}",
            failure.relpath, failure.stage, failure.error
        ));
    }
    if let Some(dir) = &report.backup_dir {
        output.success(&format!("Backups: {}", dir));
    }
    output.success(&format!("Fix log: {}", log.display()));
    output.emit_json(&report);
    Ok(())
}

fn run_inspect(
    root: &Path,
    settings: &Settings,
    files: &[PathBuf],
    needle: Option<&str>,
    options: InspectOptions,
) -> Result<String> {
    let registry = PatternRegistry::new(settings)?;
    let inspector = Inspector::new(&registry, options);
    let mut out = String::new();

    for file in files {
        let path = if file.is_absolute() {
            file.clone()
        } else {
            root.join(file)
        };
        let relpath = relative_path(root, &path);

        if !path.is_file() {
            out.push_str(&inspector.missing(&relpath));
            continue;
        }
        let text = read_document(&path)?.text;
        let section = match needle {
            Some(needle) => needle_context(&relpath, &text, needle, options.context),
            None => inspector.document(&relpath, &text),
        };
        out.push_str(&section);
    }
    Ok(out)
}

#[derive(Serialize)]
struct InspectPayload<'a> {
    files: &'a [PathBuf],
    text: &'a str,
}

#[derive(Serialize)]
struct RulesPayload {
    rules: Vec<RuleEntry>,
    profiles: Vec<ProfileEntry>,
}

#[derive(Serialize)]
struct RuleEntry {
    id: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct ProfileEntry {
    name: &'static str,
    rules: Vec<String>,
}

fn print_rules(settings: &Settings, output: &OutputWriter) {
    let payload = RulesPayload {
        rules: RuleId::CATALOG
            .iter()
            .map(|&(id, description)| RuleEntry { id, description })
            .collect(),
        profiles: Profile::ALL
            .iter()
            .map(|profile| ProfileEntry {
                name: profile.name(),
                rules: profile
                    .rule_ids(settings)
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect(),
    };

    output.section("Rules");
    let rows: Vec<(&str, String)> = payload
        .rules
        .iter()
        .map(|r| (r.id, r.description.to_string()))
        .collect();
    output.table(&rows);

    output.section("Profiles");
    let rows: Vec<(&str, String)> = payload
        .profiles
        .iter()
        .map(|p| (p.name, p.rules.join(", ")))
        .collect();
    output.table(&rows);

    output.emit_json(&payload);
}

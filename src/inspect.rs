// Inspect - per-file tag listing with surrounding source lines
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::classifier::Classifier;
use crate::patterns::PatternRegistry;

const WIDE_RULE: usize = 100;

/// Distinct captured values shown per capturing tag
const MAX_CAPTURED_VALUES: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct InspectOptions {
    /// Lines shown above and below a hit
    pub context: usize,
    /// Hits shown per tag
    pub max_hits: usize,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            context: 2,
            max_hits: 2,
        }
    }
}

pub struct Inspector<'a> {
    registry: &'a PatternRegistry,
    options: InspectOptions,
}

impl<'a> Inspector<'a> {
    pub fn new(registry: &'a PatternRegistry, options: InspectOptions) -> Self {
        Self { registry, options }
    }

    /// Section for a file that could not be read
    pub fn missing(&self, relpath: &str) -> String {
        let mut out = header(relpath);
        out.push_str("MISSING FILE\n");
        out
    }

    /// Tags, captured values and context lines for one document
    pub fn document(&self, relpath: &str, text: &str) -> String {
        let mut out = header(relpath);
        let finding = Classifier::new(self.registry).classify(text);

        if finding.is_empty() {
            out.push_str("NO TAGS FOUND\n");
            return out;
        }

        out.push_str("TAGS:\n");
        for tag in &finding.tags {
            let values: BTreeSet<&str> = finding.captured(tag).iter().map(String::as_str).collect();
            if values.is_empty() {
                let _ = writeln!(out, "- {}", tag);
            } else {
                let shown: Vec<&str> = values.into_iter().take(MAX_CAPTURED_VALUES).collect();
                let _ = writeln!(out, "- {}: {}", tag, shown.join(", "));
            }
        }
        for note in &finding.notes {
            let _ = writeln!(out, "- NOTE {}", note);
        }
        for info in &finding.info {
            let _ = writeln!(out, "- INFO {}", info);
        }

        let lines: Vec<&str> = text.lines().collect();
        let _ = writeln!(out, "\nCONTEXT (first hits per tag):");
        for tag in &finding.tags {
            if !finding.captured(tag).is_empty() {
                continue;
            }
            let Some(pattern) = self.registry.get(tag) else {
                continue;
            };
            let _ = writeln!(out, "\n[{}]", tag);
            for block in context_blocks(&lines, &pattern.regex, self.options) {
                out.push_str(&block);
            }
        }
        out
    }
}

/// Every line containing `needle`, with `radius` lines around it
pub fn needle_context(relpath: &str, text: &str, needle: &str, radius: usize) -> String {
    let mut out = header(relpath);
    let lines: Vec<&str> = text.lines().collect();
    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(needle))
        .map(|(i, _)| i)
        .collect();

    if hits.is_empty() {
        let _ = writeln!(out, "`{}` not present", needle);
        return out;
    }

    for idx in hits {
        let _ = writeln!(out, "\n--- Hit at line {} ---", idx + 1);
        let start = idx.saturating_sub(radius);
        let end = (idx + radius + 1).min(lines.len());
        for (j, line) in lines.iter().enumerate().take(end).skip(start) {
            let prefix = if j == idx { ">> " } else { "   " };
            let _ = writeln!(out, "{}{:>5}: {}", prefix, j + 1, line.trim_end());
        }
    }
    out
}

fn header(relpath: &str) -> String {
    format!(
        "{}\n{}\n{}\n",
        "=".repeat(WIDE_RULE),
        relpath,
        "-".repeat(WIDE_RULE)
    )
}

/// Numbered line blocks around the first `max_hits` lines matching `regex`
fn context_blocks(lines: &[&str], regex: &Regex, options: InspectOptions) -> Vec<String> {
    lines
        .iter()
        .enumerate()
        .filter(|(_, line)| regex.is_match(line))
        .take(options.max_hits)
        .map(|(i, _)| {
            let start = i.saturating_sub(options.context);
            let end = (i + options.context + 1).min(lines.len());
            let mut block = String::new();
            for (j, line) in lines.iter().enumerate().take(end).skip(start) {
                let _ = writeln!(block, "{:>5}: {}", j + 1, line);
            }
            block
        })
        .collect()
}

// Canonical include normalization
use regex::Regex;
use tracing::debug;

use super::{splice_out, widen_to_lines, MutationResult, MutationRule, RuleError};
use crate::locator::{comment_ranges, find_ci};
use crate::patterns;
use crate::settings::Settings;

/// `normalize-include` - every reference to the consent script is removed and
/// one canonical tag is inserted right before `</head>`.
///
/// A document that already holds exactly one live reference, written exactly
/// as the canonical tag, is left alone wherever that reference sits. A document
/// without `</head>` has no safe insertion point and is left alone too.
pub struct NormalizeInclude {
    element: Regex,
    canonical_tag: String,
}

impl NormalizeInclude {
    pub fn new(settings: &Settings) -> Result<Self, RuleError> {
        Ok(Self {
            element: patterns::include_element(&settings.include_marker)?,
            canonical_tag: settings.canonical_tag(),
        })
    }
}

impl MutationRule for NormalizeInclude {
    fn name(&self) -> &str {
        "normalize-include"
    }

    fn apply(&self, text: &str) -> MutationResult {
        // Commented-out references are neither live nor worth rewriting
        let comments = comment_ranges(text);
        let found: Vec<(usize, usize)> = self
            .element
            .find_iter(text)
            .filter(|m| !comments.iter().any(|c| c.contains(&m.start())))
            .map(|m| (m.start(), m.end()))
            .collect();

        if let [(start, end)] = found.as_slice() {
            if text[*start..*end].eq_ignore_ascii_case(&self.canonical_tag) {
                return MutationResult::unchanged(text);
            }
        }

        if find_ci(text, 0, "</head").is_none() {
            debug!("normalize-include: no </head>, document left as is");
            return MutationResult::unchanged(text);
        }

        let ranges: Vec<(usize, usize)> = found
            .iter()
            .map(|&(start, end)| widen_to_lines(text, start, end))
            .collect();
        let mut out = splice_out(text, &ranges);

        // Removal only deletes script elements, so the head close is still there
        let Some(head_close) = find_ci(&out, 0, "</head") else {
            return MutationResult::unchanged(text);
        };
        let line_start = out[..head_close].rfind('\n').map_or(0, |nl| nl + 1);
        let own_line = out[line_start..head_close]
            .bytes()
            .all(|b| b == b' ' || b == b'\t');

        if own_line {
            out.insert_str(line_start, &format!("  {}\n", self.canonical_tag));
        } else {
            out.insert_str(head_close, &self.canonical_tag);
        }

        MutationResult::new(text, out, found.len() + 1)
    }
}

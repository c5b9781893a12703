// Script-level removals inside inline script bodies
use regex::Regex;
use tracing::debug;

use super::{
    rewrite_inline_scripts, skip_whitespace, splice_out, MutationResult, MutationRule, RuleError,
};
use crate::locator::{js, locate_balanced, Delimiter};
use crate::patterns::{self, RX_PAGE_VIEW_EVENT, RX_STORAGE_SET};

/// `remove-function:<name>` - drop `function name(...) { ... }` declarations
/// through the balanced closing brace and the whitespace after it
pub struct RemoveFunctionByName {
    name: String,
    header: Regex,
}

impl RemoveFunctionByName {
    pub fn new(function: &str) -> Result<Self, RuleError> {
        Ok(Self {
            name: format!("remove-function:{}", function),
            header: patterns::function_header(function)?,
        })
    }

    fn remove_from(&self, body: &str) -> Option<(String, usize)> {
        let comments = js::comment_ranges(body);
        let mut ranges = Vec::new();
        let mut search = 0;

        while let Some(m) = self.header.find_at(body, search) {
            search = m.end();
            if comments.iter().any(|c| c.contains(&m.start())) {
                continue;
            }

            match locate_balanced(body, m.end(), Delimiter::Brace) {
                Ok(span) => {
                    ranges.push((m.start(), skip_whitespace(body, span.end)));
                    search = span.end;
                }
                Err(e) => debug!("{}: leaving declaration untouched: {}", self.name, e),
            }
        }

        if ranges.is_empty() {
            return None;
        }
        Some((splice_out(body, &ranges), ranges.len()))
    }
}

impl MutationRule for RemoveFunctionByName {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str) -> MutationResult {
        rewrite_inline_scripts(text, |body| self.remove_from(body))
    }
}

/// Line-based removal of inline script lines matching a fixed call pattern
pub struct DropScriptLines {
    name: &'static str,
    needle: &'static Regex,
}

impl DropScriptLines {
    /// `drop-page-view-events`
    pub fn page_view_events() -> Self {
        Self {
            name: "drop-page-view-events",
            needle: &RX_PAGE_VIEW_EVENT,
        }
    }

    /// `drop-inline-storage-writes`
    pub fn storage_writes() -> Self {
        Self {
            name: "drop-inline-storage-writes",
            needle: &RX_STORAGE_SET,
        }
    }
}

impl MutationRule for DropScriptLines {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, text: &str) -> MutationResult {
        rewrite_inline_scripts(text, |body| {
            let mut removed = 0;
            let kept: String = body
                .split_inclusive('\n')
                .filter(|line| {
                    let hit = self.needle.is_match(line);
                    if hit {
                        removed += 1;
                    }
                    !hit
                })
                .collect();
            (removed > 0).then_some((kept, removed))
        })
    }
}

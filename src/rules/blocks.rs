// Element-level removals: legacy banner containers and legacy script elements
use regex::Regex;
use tracing::debug;

use super::{splice_out, widen_to_lines, MutationResult, MutationRule, RuleError};
use std::ops::Range;

use crate::locator::{
    comment_ranges, enclosing_open_tag, locate_balanced, open_tag_name, script_regions, Delimiter,
};
use crate::patterns;
use crate::settings::Settings;

/// `remove-block:<id>` - drop every element whose opening tag carries
/// `id="<id>"`, through its balanced close tag
pub struct RemoveBlockByMarker {
    name: String,
    marker: Regex,
}

impl RemoveBlockByMarker {
    pub fn new(id: &str) -> Result<Self, RuleError> {
        Ok(Self {
            name: format!("remove-block:{}", id),
            marker: patterns::id_marker(id)?,
        })
    }
}

impl MutationRule for RemoveBlockByMarker {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, text: &str) -> MutationResult {
        let inert = inert_ranges(text);
        let mut ranges = Vec::new();
        let mut search = 0;

        while let Some(m) = self.marker.find_at(text, search) {
            search = m.end();

            if inert.iter().any(|r| r.contains(&m.start())) {
                continue;
            }
            // Marker text outside a tag (prose, attribute values) is not a container
            let Some(open) = enclosing_open_tag(text, m.range()) else {
                continue;
            };
            let Some(element) = open_tag_name(text, open) else {
                continue;
            };

            match locate_balanced(text, open, Delimiter::Tag(element)) {
                Ok(span) if span.start == open => {
                    ranges.push(widen_to_lines(text, span.start, span.end));
                    search = span.end;
                }
                Ok(_) => {}
                Err(e) => debug!("{}: leaving site at {} untouched: {}", self.name, open, e),
            }
        }

        if ranges.is_empty() {
            return MutationResult::unchanged(text);
        }
        let count = ranges.len();
        MutationResult::new(text, splice_out(text, &ranges), count)
    }
}

/// HTML comments and script bodies: markup written there is not live
fn inert_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = comment_ranges(text);
    ranges.extend(
        script_regions(text)
            .into_iter()
            .map(|r| r.body_start..r.body_end),
    );
    ranges
}

/// `strip-legacy-libraries` - external scripts loading a competing consent library
pub struct StripLegacyLibraries {
    /// `None` when no library signatures are configured
    element: Option<Regex>,
}

impl StripLegacyLibraries {
    pub fn new(settings: &Settings) -> Result<Self, RuleError> {
        let element = if settings.legacy_libraries.is_empty() {
            None
        } else {
            Some(patterns::legacy_library_element(&settings.legacy_libraries)?)
        };
        Ok(Self { element })
    }
}

impl MutationRule for StripLegacyLibraries {
    fn name(&self) -> &str {
        "strip-legacy-libraries"
    }

    fn apply(&self, text: &str) -> MutationResult {
        let Some(element) = &self.element else {
            return MutationResult::unchanged(text);
        };
        let ranges: Vec<(usize, usize)> = element
            .find_iter(text)
            .map(|m| widen_to_lines(text, m.start(), m.end()))
            .collect();

        if ranges.is_empty() {
            return MutationResult::unchanged(text);
        }
        let count = ranges.len();
        MutationResult::new(text, splice_out(text, &ranges), count)
    }
}

/// `strip-legacy-inline-scripts` - inline scripts carrying legacy consent wiring
pub struct StripLegacyInlineScripts {
    keywords: Regex,
}

impl StripLegacyInlineScripts {
    pub fn new(settings: &Settings) -> Result<Self, RuleError> {
        Ok(Self {
            keywords: patterns::legacy_inline_keywords(settings)?,
        })
    }
}

impl MutationRule for StripLegacyInlineScripts {
    fn name(&self) -> &str {
        "strip-legacy-inline-scripts"
    }

    fn apply(&self, text: &str) -> MutationResult {
        let ranges: Vec<(usize, usize)> = script_regions(text)
            .into_iter()
            .filter(|r| r.is_inline() && self.keywords.is_match(r.body(text)))
            .map(|r| widen_to_lines(text, r.start, r.end))
            .collect();

        if ranges.is_empty() {
            return MutationResult::unchanged(text);
        }
        let count = ranges.len();
        MutationResult::new(text, splice_out(text, &ranges), count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remove_banner(text: &str) -> MutationResult {
        RemoveBlockByMarker::new("cookie-banner").unwrap().apply(text)
    }

    #[test]
    fn test_removes_nested_block_and_its_line() {
        let text = "<body>\n  <div id=\"cookie-banner\" class=\"b\">\n    <div><p>We use cookies</p></div>\n    <button>OK</button>\n  </div>\n  <main>x</main>\n</body>";
        let result = remove_banner(text);
        assert_eq!(result.text, "<body>\n  <main>x</main>\n</body>");
        assert_eq!(result.count, 1);
        assert!(result.changed);
    }

    #[test]
    fn test_removes_every_occurrence() {
        let text = "<div id='cookie-banner'>a</div><section id=\"cookie-banner\"><div>b</div></section>z";
        let result = remove_banner(text);
        assert_eq!(result.text, "z");
        assert_eq!(result.count, 2);
    }

    #[test]
    fn test_unbalanced_site_is_left_untouched() {
        let text = "<div id=\"cookie-banner\"><div>never closed</div>";
        let result = remove_banner(text);
        assert_eq!(result.text, text);
        assert_eq!(result.count, 0);
        assert!(!result.changed);
    }

    #[test]
    fn test_commented_out_marker_keeps_live_markup() {
        let text = "<div class=\"wrap\">\n<!-- <div id=\"cookie-banner\"> -->\n<p>Important</p>\n</div>\n<footer>f</footer>";
        let result = remove_banner(text);
        assert_eq!(result.text, text);
        assert_eq!(result.count, 0);
    }

    #[test]
    fn test_commented_block_does_not_hide_live_one() {
        let text = "<!-- <div id=\"cookie-banner\">old</div> -->\n<div id=\"cookie-banner\">new</div>\n<main>x</main>";
        let result = remove_banner(text);
        assert_eq!(
            result.text,
            "<!-- <div id=\"cookie-banner\">old</div> -->\n<main>x</main>"
        );
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_marker_inside_script_text_is_left_alone() {
        let text = r#"<script>el.innerHTML = '<div id="cookie-banner">x</div>';</script>"#;
        let result = remove_banner(text);
        assert_eq!(result.text, text);
        assert!(!result.changed);
    }

    #[test]
    fn test_remove_block_is_idempotent() {
        let text = "<div id=\"cookie-banner\">a</div>\n<div id=\"cookie-banner\"><div>";
        let once = remove_banner(text);
        let twice = remove_banner(&once.text);
        assert!(once.changed);
        assert_eq!(twice.text, once.text);
        assert_eq!(twice.count, 0);
    }

    #[test]
    fn test_strip_legacy_libraries() {
        let rule = StripLegacyLibraries::new(&Settings::default()).unwrap();
        let text = "<head>\n  <script src=\"https://cdn.example/cookieconsent.min.js\"></script>\n  <script src=\"/app.js\"></script>\n</head>";
        let result = rule.apply(text);
        assert_eq!(result.text, "<head>\n  <script src=\"/app.js\"></script>\n</head>");
        assert_eq!(result.count, 1);
        assert!(!rule.apply(&result.text).changed);
    }

    #[test]
    fn test_strip_legacy_inline_scripts_keeps_unrelated() {
        let rule = StripLegacyInlineScripts::new(&Settings::default()).unwrap();
        let text = "<script>\nfunction acceptConsent() { localStorage.setItem('cookie_consent', 'yes'); }\n</script>\n<script>console.log('ok');</script>\n<script src=\"/acceptConsent.js\"></script>";
        let result = rule.apply(text);
        assert_eq!(
            result.text,
            "<script>console.log('ok');</script>\n<script src=\"/acceptConsent.js\"></script>"
        );
        assert_eq!(result.count, 1);
    }
}

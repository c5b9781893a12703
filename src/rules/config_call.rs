// gtag('config', ...) rewrites: force a safe property value, collapse duplicates
use regex::{Captures, Regex};
use tracing::debug;

use super::{
    rewrite_inline_scripts, skip_whitespace, splice_out, MutationResult, MutationRule, RuleError,
};
use crate::locator::{js, locate_balanced, Delimiter, Span};
use crate::patterns::{self, RX_CALL_TAIL, RX_GTAG_CONFIG_HEAD};
use crate::settings::Settings;

/// One `gtag('config', 'G-...' ...)` call inside a script body
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigCall {
    start: usize,
    measurement_id: String,
    /// Options object, when the call has one
    object: Option<Span>,
    /// Offset past `)` and an optional `;`
    end: usize,
}

/// Config calls outside comments whose shape is fully understood: either no
/// options argument or a literal `{...}` object. Anything else is skipped.
fn config_calls(body: &str) -> Vec<ConfigCall> {
    let comments = js::comment_ranges(body);
    let mut calls = Vec::new();
    let mut search = 0;

    while search < body.len() {
        let Some(caps) = RX_GTAG_CONFIG_HEAD.captures(&body[search..]) else {
            break;
        };
        let (Some(head), Some(id)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let start = search + head.start();
        let after = search + head.end();
        search = after;

        if comments.iter().any(|c| c.contains(&start)) {
            continue;
        }

        let rest = &body[after..];
        if let Some(tail) = RX_CALL_TAIL.find(rest) {
            search = after + tail.end();
            calls.push(ConfigCall {
                start,
                measurement_id: id.as_str().to_string(),
                object: None,
                end: search,
            });
            continue;
        }

        if !rest.starts_with(',') {
            continue;
        }
        let brace = skip_whitespace(body, after + 1);
        if body.as_bytes().get(brace) != Some(&b'{') {
            continue;
        }
        let span = match locate_balanced(body, brace, Delimiter::Brace) {
            Ok(span) => span,
            Err(e) => {
                debug!("Skipping config call at {}: {}", start, e);
                continue;
            }
        };
        let Some(tail) = RX_CALL_TAIL.find(&body[span.end..]) else {
            continue;
        };

        search = span.end + tail.end();
        calls.push(ConfigCall {
            start,
            measurement_id: id.as_str().to_string(),
            object: Some(span),
            end: search,
        });
    }

    calls
}

/// `patch-config` - make sure every config call carries the property with
/// its safe value
pub struct PatchConfigProperty {
    property: String,
    safe_value: String,
    pair: Regex,
}

impl PatchConfigProperty {
    pub fn new(settings: &Settings) -> Result<Self, RuleError> {
        Ok(Self {
            property: settings.config_property.clone(),
            safe_value: settings.config_safe_value.clone(),
            pair: patterns::property_pair(&settings.config_property)?,
        })
    }

    fn entry(&self) -> String {
        format!("'{}': {}", self.property, self.safe_value)
    }

    /// Patched copy of a `{...}` object, or `None` when it is already safe
    fn patch_object(&self, object: &str) -> Option<String> {
        let pairs = live_pairs(&self.pair, object);
        let values: Vec<(usize, usize)> = pairs
            .iter()
            .filter_map(|caps| caps.get(1))
            .filter(|value| value.as_str() != self.safe_value)
            .map(|value| (value.start(), value.end()))
            .collect();

        if !pairs.is_empty() {
            if values.is_empty() {
                return None;
            }
            let mut out = String::with_capacity(object.len());
            let mut cursor = 0;
            for (start, end) in values {
                out.push_str(&object[cursor..start]);
                out.push_str(&self.safe_value);
                cursor = end;
            }
            out.push_str(&object[cursor..]);
            return Some(out);
        }

        let inner = &object[1..object.len() - 1];
        if inner.trim().is_empty() {
            return Some(format!("{{ {} }}", self.entry()));
        }
        let lead = &inner[..inner.len() - inner.trim_start().len()];
        if lead.is_empty() {
            Some(format!("{{{}, {}", self.entry(), &object[1..]))
        } else {
            Some(format!("{{{}{},{}", lead, self.entry(), &object[1..]))
        }
    }

    fn patch_body(&self, body: &str) -> Option<(String, usize)> {
        let mut out = String::with_capacity(body.len());
        let mut cursor = 0;
        let mut count = 0;

        for call in config_calls(body) {
            match call.object {
                None => {
                    out.push_str(&body[cursor..call.start]);
                    out.push_str(&format!(
                        "gtag('config', '{}', {{ {} }});",
                        call.measurement_id,
                        self.entry()
                    ));
                    cursor = call.end;
                    count += 1;
                }
                Some(span) => {
                    if let Some(patched) = self.patch_object(span.slice(body)) {
                        out.push_str(&body[cursor..span.start]);
                        out.push_str(&patched);
                        cursor = span.end;
                        count += 1;
                    }
                }
            }
        }

        if count == 0 {
            return None;
        }
        out.push_str(&body[cursor..]);
        Some((out, count))
    }
}

impl MutationRule for PatchConfigProperty {
    fn name(&self) -> &str {
        "patch-config"
    }

    fn apply(&self, text: &str) -> MutationResult {
        rewrite_inline_scripts(text, |body| self.patch_body(body))
    }
}

/// `dedupe-property` - keep the first occurrence of the property in each
/// config object and drop the rest with their separators
pub struct DedupeProperty {
    pair: Regex,
}

impl DedupeProperty {
    pub fn new(settings: &Settings) -> Result<Self, RuleError> {
        Ok(Self {
            pair: patterns::property_pair(&settings.config_property)?,
        })
    }

    fn dedupe_object(&self, object: &str) -> Option<(String, usize)> {
        let pairs: Vec<(usize, usize)> = live_pairs(&self.pair, object)
            .iter()
            .filter_map(|caps| caps.get(0))
            .map(|m| (m.start(), m.end()))
            .collect();
        if pairs.len() < 2 {
            return None;
        }

        let bytes = object.as_bytes();
        let ranges: Vec<(usize, usize)> = pairs[1..]
            .iter()
            .map(|&(start, end)| {
                let before = object[..start].trim_end();
                if before.ends_with(',') {
                    return (before.len() - 1, end);
                }
                let after = skip_whitespace(object, end);
                if bytes.get(after) == Some(&b',') {
                    (start, skip_whitespace(object, after + 1))
                } else {
                    (start, end)
                }
            })
            .collect();

        let removed = ranges.len();
        Some((tidy_separators(&splice_out(object, &ranges)), removed))
    }

    fn dedupe_body(&self, body: &str) -> Option<(String, usize)> {
        let mut out = String::with_capacity(body.len());
        let mut cursor = 0;
        let mut count = 0;

        for span in config_calls(body).into_iter().filter_map(|call| call.object) {
            if let Some((object, removed)) = self.dedupe_object(span.slice(body)) {
                out.push_str(&body[cursor..span.start]);
                out.push_str(&object);
                cursor = span.end;
                count += removed;
            }
        }

        if count == 0 {
            return None;
        }
        out.push_str(&body[cursor..]);
        Some((out, count))
    }
}

impl MutationRule for DedupeProperty {
    fn name(&self) -> &str {
        "dedupe-property"
    }

    fn apply(&self, text: &str) -> MutationResult {
        rewrite_inline_scripts(text, |body| self.dedupe_body(body))
    }
}

/// Property pairs that are object members, not text inside a string value.
/// A quoted key is its own string literal and still counts.
fn live_pairs<'t>(pair: &Regex, object: &'t str) -> Vec<Captures<'t>> {
    let literals = js::literals(object);
    pair.captures_iter(object)
        .filter(|caps| {
            caps.get(0).is_some_and(|m| {
                let colon = m.as_str().find(':').map_or(m.end(), |c| m.start() + c);
                !literals.in_string(m.start())
                    && !literals
                        .strings
                        .iter()
                        .any(|r| r.start == m.start() && r.end > colon)
            })
        })
        .collect()
}

/// Collapse `, ,`, drop a comma right after `{` and a comma right before `}`.
/// Only commas in code count; string contents and comments are left as written.
fn tidy_separators(object: &str) -> String {
    let literals = js::literals(object);
    let bytes = object.as_bytes();
    let is_code = |i: usize| {
        !literals.strings.iter().any(|r| r.contains(&i))
            && !literals.comments.iter().any(|r| r.contains(&i))
    };
    // Significant code bytes: everything but whitespace and comments
    let significant: Vec<usize> = (0..bytes.len())
        .filter(|&i| {
            !bytes[i].is_ascii_whitespace() && !literals.comments.iter().any(|r| r.contains(&i))
        })
        .collect();

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    let mut kept: Vec<usize> = Vec::new();
    let mut previous: Option<usize> = None;

    for &i in &significant {
        if bytes[i] == b',' && is_code(i) {
            match previous.map(|p| bytes[p]) {
                Some(b',') => {
                    // `a,  ,b` -> `a,b`
                    if let Some(p) = previous {
                        ranges.push((p + 1, i + 1));
                    }
                    continue;
                }
                Some(b'{') => {
                    ranges.push((i, skip_whitespace(object, i + 1)));
                    continue;
                }
                _ => kept.push(i),
            }
        } else if bytes[i] == b'}' && is_code(i) {
            if let Some(p) = previous.filter(|&p| bytes[p] == b',' && kept.last() == Some(&p)) {
                ranges.push((p, p + 1));
                kept.pop();
            }
        }
        previous = Some(i);
    }

    if ranges.is_empty() {
        return object.to_string();
    }
    ranges.sort_unstable();
    splice_out(object, &ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(text: &str) -> MutationResult {
        PatchConfigProperty::new(&Settings::default())
            .unwrap()
            .apply(text)
    }

    fn dedupe(text: &str) -> MutationResult {
        DedupeProperty::new(&Settings::default()).unwrap().apply(text)
    }

    #[test]
    fn test_simple_call_gets_options_object() {
        let text = "<script>\n  gtag('config','G-ABC123')\n  gtag('event', 'x');\n</script>";
        let result = patch(text);
        assert_eq!(
            result.text,
            "<script>\n  gtag('config', 'G-ABC123', { 'send_page_view': false });\n  gtag('event', 'x');\n</script>"
        );
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_object_without_property_gets_it_injected() {
        let text = "<script>gtag('config', 'G-ABC123', {\n    anonymize_ip: true\n  });</script>";
        let result = patch(text);
        assert_eq!(
            result.text,
            "<script>gtag('config', 'G-ABC123', {\n    'send_page_view': false,\n    anonymize_ip: true\n  });</script>"
        );

        let empty = patch("<script>gtag('config', 'G-X1', {});</script>");
        assert_eq!(
            empty.text,
            "<script>gtag('config', 'G-X1', { 'send_page_view': false });</script>"
        );

        let tight = patch("<script>gtag('config', 'G-X1', {a: 1});</script>");
        assert_eq!(
            tight.text,
            "<script>gtag('config', 'G-X1', {'send_page_view': false, a: 1});</script>"
        );
    }

    #[test]
    fn test_unsafe_value_is_rewritten() {
        let text = r#"<script>gtag('config', 'G-ABC123', { "send_page_view": true, 'anonymize_ip': true });</script>"#;
        let result = patch(text);
        assert_eq!(
            result.text,
            r#"<script>gtag('config', 'G-ABC123', { "send_page_view": false, 'anonymize_ip': true });</script>"#
        );
    }

    #[test]
    fn test_patch_is_idempotent() {
        let text = "<script>gtag('config','G-A1');\ngtag('config', 'G-B2', { send_page_view: true });</script>";
        let once = patch(text);
        assert_eq!(once.count, 2);
        let twice = patch(&once.text);
        assert!(!twice.changed);
        assert_eq!(twice.text, once.text);
    }

    #[test]
    fn test_patch_skips_comments_and_external_scripts() {
        let text = "<script src=\"/gtag.js\">gtag('config','G-A1');</script><script>// gtag('config','G-A1');\n</script>";
        assert!(!patch(text).changed);
    }

    #[test]
    fn test_patch_skips_unparsed_shapes() {
        let text = "<script>gtag('config', 'G-A1', opts);</script>";
        assert!(!patch(text).changed);
    }

    #[test]
    fn test_dedupe_keeps_first_value() {
        let text = "<script>gtag('config', 'G-A1', { 'send_page_view': false, 'send_page_view': true, anonymize_ip: true, send_page_view: false });</script>";
        let result = dedupe(text);
        assert_eq!(
            result.text,
            "<script>gtag('config', 'G-A1', { 'send_page_view': false, anonymize_ip: true });</script>"
        );
        assert_eq!(result.count, 2);
        assert!(!dedupe(&result.text).changed);
    }

    #[test]
    fn test_dedupe_leaves_no_stray_separators() {
        let text = "<script>gtag('config', 'G-A1', {\n  send_page_view: true,\n  send_page_view: false,\n});</script>";
        let result = dedupe(text);
        assert_eq!(
            result.text,
            "<script>gtag('config', 'G-A1', {\n  send_page_view: true\n});</script>"
        );
    }

    #[test]
    fn test_tidy_separators() {
        assert_eq!(tidy_separators("{ , a: 1,, b: 2, }"), "{ a: 1, b: 2 }");
        assert_eq!(tidy_separators("{ a: 1, , , b: 2 }"), "{ a: 1, b: 2 }");
        assert_eq!(tidy_separators("{ a: 'x,, y', }"), "{ a: 'x,, y' }");
    }

    #[test]
    fn test_dedupe_leaves_string_values_alone() {
        let text = "<script>gtag('config', 'G-A1', { send_page_view: false, page_title: 'Q&A,, FAQ', send_page_view: true });</script>";
        let result = dedupe(text);
        assert_eq!(
            result.text,
            "<script>gtag('config', 'G-A1', { send_page_view: false, page_title: 'Q&A,, FAQ' });</script>"
        );
        assert_eq!(result.count, 1);
    }

    #[test]
    fn test_property_text_inside_strings_is_not_a_pair() {
        let text = "<script>gtag('config', 'G-A1', { send_page_view: false, note: 'send_page_view: true' });</script>";
        assert!(!dedupe(text).changed);
        assert!(!patch(text).changed);
    }

    #[test]
    fn test_config_calls_shapes() {
        let body = "gtag('config', 'G-A1');\ngtag('config', 'G-B2', { a: '}' });\ngtag('config', 'G-C3', x);";
        let calls = config_calls(body);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].measurement_id, "G-A1");
        assert!(calls[0].object.is_none());
        assert_eq!(
            calls[1].object.map(|s| s.slice(body)),
            Some("{ a: '}' }")
        );
    }
}

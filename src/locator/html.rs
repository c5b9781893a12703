//! Tag-level scanning over raw markup.
//!
//! All offsets are byte offsets into the original `&str`. Every delimiter the
//! scanner stops on is ASCII, so returned offsets are always char boundaries.

use regex::Regex;
use std::ops::Range;

use super::js;

lazy_static::lazy_static! {
    static ref RX_SRC_ATTR: Regex = Regex::new(r"(?i)\ssrc\s*=").expect("valid src regex");
}

/// Elements whose content is raw text; tags inside them are not markup
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// One `<script>` element located in a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptRegion {
    /// Offset of `<script`
    pub start: usize,
    /// Offset just past the opening tag's `>`
    pub body_start: usize,
    /// Offset of `</script`
    pub body_end: usize,
    /// Offset just past the closing tag's `>`
    pub end: usize,
    /// Opening tag carries a `src` attribute
    pub external: bool,
}

impl ScriptRegion {
    pub fn body<'a>(&self, text: &'a str) -> &'a str {
        &text[self.body_start..self.body_end]
    }

    pub fn open_tag<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.body_start]
    }

    pub fn is_inline(&self) -> bool {
        !self.external
    }
}

pub(crate) fn starts_with_ci(text: &str, at: usize, needle: &str) -> bool {
    text.as_bytes()
        .get(at..at + needle.len())
        .is_some_and(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

pub(crate) fn find_ci(text: &str, from: usize, needle: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let n = needle.len();
    if n == 0 || from > bytes.len() {
        return None;
    }
    (from..=bytes.len().saturating_sub(n)).find(|&i| starts_with_ci(text, i, needle))
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b':'
}

fn name_ends_at(text: &str, at: usize) -> bool {
    match text.as_bytes().get(at) {
        None => true,
        Some(&b) => !is_name_byte(b),
    }
}

/// Element name of the opening tag starting at `at` (which must hold `<`)
pub(crate) fn open_tag_name(text: &str, at: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(at) != Some(&b'<') || !bytes.get(at + 1).is_some_and(u8::is_ascii_alphabetic) {
        return None;
    }
    let mut end = at + 1;
    while end < bytes.len() && is_name_byte(bytes[end]) {
        end += 1;
    }
    Some(&text[at + 1..end])
}

pub(crate) fn is_open_of(text: &str, at: usize, name: &str) -> bool {
    text.as_bytes().get(at) == Some(&b'<')
        && starts_with_ci(text, at + 1, name)
        && name_ends_at(text, at + 1 + name.len())
}

pub(crate) fn is_close_of(text: &str, at: usize, name: &str) -> bool {
    starts_with_ci(text, at, "</")
        && starts_with_ci(text, at + 2, name)
        && name_ends_at(text, at + 2 + name.len())
}

/// Offset just past the `>` closing the tag that starts at `at`.
///
/// Quotes only open an attribute value when they directly follow `=`, so a
/// stray apostrophe in an unquoted value does not swallow the document.
pub(crate) fn tag_end(text: &str, at: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = at + 1;
    let mut after_eq = false;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'>' => return Some(i + 1),
            b'=' => after_eq = true,
            b'"' | b'\'' if after_eq => {
                let close = bytes[i + 1..].iter().position(|&c| c == b)?;
                i += close + 1;
                after_eq = false;
            }
            b' ' | b'\t' | b'\n' | b'\r' => {}
            _ => after_eq = false,
        }
        i += 1;
    }

    None
}

/// Offset just past `-->` for a comment opening at `at`
pub(crate) fn comment_end(text: &str, at: usize) -> Option<usize> {
    text[at + 4..].find("-->").map(|pos| at + 4 + pos + 3)
}

/// If an opening tag for a raw-text element starts at `at`, the offset just
/// past its closing tag (or `None` when it never closes).
fn skip_raw_text(text: &str, at: usize, open_end: usize) -> Option<Option<usize>> {
    let name = open_tag_name(text, at)?;
    let raw = RAW_TEXT_ELEMENTS
        .iter()
        .find(|raw| raw.eq_ignore_ascii_case(name))?;
    let close_tag = format!("</{}", raw);
    let skipped = find_ci(text, open_end, &close_tag)
        .and_then(|close| text[close..].find('>').map(|gt| close + gt + 1));
    Some(skipped)
}

/// Depth-counted scan for the element `name` starting at or after `from`.
///
/// Returns `Ok((open_at, end))` or `Err(Some(open_at))` when the element never
/// closes and `Err(None)` when no opening tag exists.
pub(crate) fn balanced_element(
    text: &str,
    from: usize,
    name: &str,
) -> Result<(usize, usize), Option<usize>> {
    let bytes = text.as_bytes();
    let mut i = from;
    let mut depth = 0usize;
    let mut open_at: Option<usize> = None;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if starts_with_ci(text, i, "<!--") {
            match comment_end(text, i) {
                Some(end) => {
                    i = end;
                    continue;
                }
                None => break,
            }
        }

        if is_close_of(text, i, name) {
            let Some(end) = tag_end(text, i) else { break };
            if depth > 0 {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = open_at {
                        return Ok((start, end));
                    }
                }
            }
            i = end;
            continue;
        }

        if open_tag_name(text, i).is_some() {
            let Some(end) = tag_end(text, i) else {
                i += 1;
                continue;
            };

            if is_open_of(text, i, name) {
                let self_closing = end >= 2 && bytes[end - 2] == b'/';
                if self_closing {
                    if depth == 0 {
                        return Ok((i, end));
                    }
                } else {
                    depth += 1;
                    open_at.get_or_insert(i);
                }
            }

            if !RAW_TEXT_ELEMENTS.iter().any(|raw| raw.eq_ignore_ascii_case(name)) {
                match skip_raw_text(text, i, end) {
                    Some(Some(after)) => {
                        i = after;
                        continue;
                    }
                    Some(None) => break,
                    None => {}
                }
            }

            i = end;
            continue;
        }

        i += 1;
    }

    Err(open_at)
}

/// Offset of the opening tag that contains the attribute text at `attr`.
///
/// Returns `None` when `attr` is not inside a tag (e.g. it sits in script
/// text or element content).
pub(crate) fn enclosing_open_tag(text: &str, attr: Range<usize>) -> Option<usize> {
    let head = &text[..attr.start];
    let lt = head.rfind('<')?;
    // A `>` between the candidate `<` and the attribute means we are not in a tag
    // (quoted `>` inside attribute values is rare enough to accept a miss here)
    if head[lt..].contains('>') {
        return None;
    }
    open_tag_name(text, lt)?;
    let end = tag_end(text, lt)?;
    (end >= attr.end).then_some(lt)
}

/// All `<script>` elements outside HTML comments, in document order.
/// A script that never closes ends the scan.
pub fn script_regions(text: &str) -> Vec<ScriptRegion> {
    let bytes = text.as_bytes();
    let mut regions = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }

        if starts_with_ci(text, i, "<!--") {
            match comment_end(text, i) {
                Some(end) => {
                    i = end;
                    continue;
                }
                None => break,
            }
        }

        if !is_open_of(text, i, "script") {
            i += 1;
            continue;
        }

        let Some(body_start) = tag_end(text, i) else { break };
        let Some(body_end) = find_ci(text, body_start, "</script") else { break };
        let Some(end) = text[body_end..].find('>').map(|gt| body_end + gt + 1) else { break };

        regions.push(ScriptRegion {
            start: i,
            body_start,
            body_end,
            end,
            external: RX_SRC_ATTR.is_match(&text[i..body_start]),
        });
        i = end;
    }

    regions
}

/// Byte ranges of `<!-- ... -->` comments. An unterminated comment runs to
/// the end of the text.
pub fn comment_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut i = 0usize;
    while let Some(pos) = text[i..].find("<!--") {
        let start = i + pos;
        let end = comment_end(text, start).unwrap_or(text.len());
        ranges.push(start..end);
        i = end;
    }
    ranges
}

/// Copy of `text` with HTML comments and comments inside inline scripts
/// blanked out. Byte offsets and line breaks are preserved.
pub fn mask_comments(text: &str) -> String {
    let mut ranges = comment_ranges(text);

    for region in script_regions(text).iter().filter(|r| r.is_inline()) {
        ranges.extend(
            js::comment_ranges(region.body(text))
                .into_iter()
                .map(|r| r.start + region.body_start..r.end + region.body_start),
        );
    }

    if ranges.is_empty() {
        return text.to_string();
    }

    let mut bytes = text.as_bytes().to_vec();
    for range in ranges {
        for b in &mut bytes[range] {
            if *b != b'\n' && *b != b'\r' {
                *b = b' ';
            }
        }
    }

    // Ranges start and end on ASCII delimiters, so whole characters were replaced
    String::from_utf8(bytes).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_end_respects_quoted_values() {
        let text = r#"<div title="a > b" id='x'>body"#;
        assert_eq!(&text[tag_end(text, 0).unwrap()..], "body");
    }

    #[test]
    fn test_apostrophe_in_unquoted_value() {
        let text = "<div class=it's>body</div>";
        assert_eq!(&text[tag_end(text, 0).unwrap()..], "body</div>");
    }

    #[test]
    fn test_open_and_close_need_name_boundary() {
        let text = "<divider></div>";
        assert!(!is_open_of(text, 0, "div"));
        assert!(is_close_of(text, 9, "div"));
        assert!(is_open_of("<DIV id=a>", 0, "div"));
    }

    #[test]
    fn test_script_regions() {
        let text = r#"<head><script src="/a.js"></script><script>var x = 1;</script></head>"#;
        let regions = script_regions(text);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].external);
        assert!(regions[1].is_inline());
        assert_eq!(regions[1].body(text), "var x = 1;");
    }

    #[test]
    fn test_script_in_html_comment_is_ignored() {
        let text = "<!-- <script>old()</script> --><script>now()</script>";
        let regions = script_regions(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].body(text), "now()");
    }

    #[test]
    fn test_data_src_is_not_src() {
        let text = r#"<script data-src="x.js">inline()</script>"#;
        assert!(script_regions(text)[0].is_inline());
    }

    #[test]
    fn test_mask_comments_preserves_offsets() {
        let text = "<!-- page_view -->\n<script>// page_view\nrun();</script>";
        let masked = mask_comments(text);
        assert_eq!(masked.len(), text.len());
        assert!(!masked.contains("page_view"));
        assert!(masked.contains("run();"));
        assert_eq!(masked.matches('\n').count(), 2);
    }

    #[test]
    fn test_mask_comments_keeps_non_ascii() {
        let text = "<p>página</p><!-- comentário -->";
        let masked = mask_comments(text);
        assert!(masked.starts_with("<p>página</p>"));
        assert_eq!(masked.len(), text.len());
    }

    #[test]
    fn test_comment_ranges() {
        let text = "a<!-- x -->b<!-- open";
        assert_eq!(comment_ranges(text), vec![1..11, 12..text.len()]);
    }

    #[test]
    fn test_enclosing_open_tag() {
        let text = r#"<p>x</p><div class="a" id="cookie-banner">"#;
        let attr = text.find("id=").unwrap();
        assert_eq!(enclosing_open_tag(text, attr..attr + 18), Some(8));

        let script = r#"<script>el.id = "cookie-banner";</script>"#;
        let attr = script.find("id =").unwrap();
        assert_eq!(enclosing_open_tag(script, attr..attr + 20), None);
    }
}

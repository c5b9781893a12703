//! Balanced-delimiter block locator.
//!
//! Every piece of structural reasoning about markup and script text lives in
//! this module. Rules ask it for spans and never count delimiters themselves,
//! so swapping the scanners for a real lexer only touches this directory.

mod html;
pub(crate) mod js;

pub use html::{comment_ranges, mask_comments, script_regions, ScriptRegion};
pub(crate) use html::{enclosing_open_tag, find_ci, open_tag_name};

use thiserror::Error;

/// Delimiter family for [`locate_balanced`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter<'a> {
    /// `<name ...>` / `</name>` element pairs
    Tag(&'a str),
    /// `{` / `}` in script code
    Brace,
}

/// Half-open byte range `[start, end)` of a located block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateError {
    #[error("no opening delimiter at or after offset {from}")]
    NoOpenDelimiter { from: usize },
    #[error("block opened at offset {open_at} is never closed")]
    Unbalanced { open_at: usize },
}

/// Find the balanced block that starts with the first opening delimiter at
/// or after `start`.
///
/// For [`Delimiter::Tag`] the span runs from `<name` through the `>` of the
/// close that brings depth back to zero. For [`Delimiter::Brace`] it runs from
/// the opening `{` through its matching `}`. Text that ends before depth
/// returns to zero yields [`LocateError::Unbalanced`]; callers must leave that
/// site untouched.
pub fn locate_balanced(
    text: &str,
    start: usize,
    delimiter: Delimiter<'_>,
) -> Result<Span, LocateError> {
    if start > text.len() {
        return Err(LocateError::NoOpenDelimiter { from: start });
    }

    match delimiter {
        Delimiter::Tag(name) => match html::balanced_element(text, start, name) {
            Ok((open_at, end)) => Ok(Span::new(open_at, end)),
            Err(Some(open_at)) => Err(LocateError::Unbalanced { open_at }),
            Err(None) => Err(LocateError::NoOpenDelimiter { from: start }),
        },
        Delimiter::Brace => {
            let open = js::find_open_brace(text, start)
                .ok_or(LocateError::NoOpenDelimiter { from: start })?;
            let end = js::match_brace(text, open)
                .ok_or(LocateError::Unbalanced { open_at: open })?;
            Ok(Span::new(open, end))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_same_name_elements() {
        let text = "<div id=a><div><div></div></div><p>x</p></div><footer/>";
        let span = locate_balanced(text, 0, Delimiter::Tag("div")).unwrap();
        assert_eq!(span.start, 0);
        assert_eq!(&text[span.end..], "<footer/>");
    }

    #[test]
    fn test_siblings_are_located_in_turn() {
        let text = "<div>a<div>b</div></div>\n<div>c</div>";
        let first = locate_balanced(text, 0, Delimiter::Tag("div")).unwrap();
        assert_eq!(first.slice(text), "<div>a<div>b</div></div>");

        let second = locate_balanced(text, first.end, Delimiter::Tag("div")).unwrap();
        assert_eq!(second.slice(text), "<div>c</div>");

        assert_eq!(
            locate_balanced(text, second.end, Delimiter::Tag("div")),
            Err(LocateError::NoOpenDelimiter { from: second.end })
        );
    }

    #[test]
    fn test_truncated_element_is_unbalanced() {
        let text = "<body><div id=x><div>inner</div>";
        assert_eq!(
            locate_balanced(text, 0, Delimiter::Tag("div")),
            Err(LocateError::Unbalanced { open_at: 6 })
        );
    }

    #[test]
    fn test_close_tag_in_attribute_value_is_ignored() {
        let text = r#"<div data-tpl="</div>">x</div>rest"#;
        let span = locate_balanced(text, 0, Delimiter::Tag("div")).unwrap();
        assert_eq!(&text[span.end..], "rest");
    }

    #[test]
    fn test_tags_inside_comments_and_scripts_are_ignored() {
        let text = "<div><!-- </div> --><script>h = '</div><div>';</script></div>rest";
        let span = locate_balanced(text, 0, Delimiter::Tag("div")).unwrap();
        assert_eq!(&text[span.end..], "rest");
    }

    #[test]
    fn test_case_insensitive_tags() {
        let text = "<DIV class=x>y</Div>z";
        let span = locate_balanced(text, 0, Delimiter::Tag("div")).unwrap();
        assert_eq!(&text[span.end..], "z");
    }

    #[test]
    fn test_brace_pair() {
        let text = "function acceptConsent() { if (a) { b('}'); } }\nnext();";
        let span = locate_balanced(text, 0, Delimiter::Brace).unwrap();
        assert_eq!(span.start, text.find('{').unwrap());
        assert_eq!(&text[span.end..], "\nnext();");
    }

    #[test]
    fn test_brace_failures() {
        assert_eq!(
            locate_balanced("function f()", 0, Delimiter::Brace),
            Err(LocateError::NoOpenDelimiter { from: 0 })
        );
        assert_eq!(
            locate_balanced("function f() { if (x) {", 0, Delimiter::Brace),
            Err(LocateError::Unbalanced { open_at: 13 })
        );
    }

    #[test]
    fn test_start_past_end() {
        assert_eq!(
            locate_balanced("abc", 10, Delimiter::Brace),
            Err(LocateError::NoOpenDelimiter { from: 10 })
        );
    }
}

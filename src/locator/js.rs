//! Minimal script lexer: tells code bytes apart from string literals and comments.
//!
//! Regex literals are not recognized; a `/` followed by anything other than
//! `/` or `*` is plain code.

use std::ops::{ControlFlow, Range};

#[derive(Clone, Copy)]
enum State {
    Code,
    AfterSlash,
    InString(u8),
    InStringEscape(u8),
    InLineComment,
    InBlockComment,
    InBlockCommentEnd,
}

/// Walk `text[from..]`, calling `visit` with the offset of every byte that is
/// script code (outside strings and comments). Stops early when `visit` breaks.
pub(crate) fn scan_code<B>(
    text: &str,
    from: usize,
    mut visit: impl FnMut(usize, u8) -> ControlFlow<B>,
) -> Option<B> {
    let bytes = text.as_bytes();
    let mut state = State::Code;
    let mut i = from;

    while i < bytes.len() {
        let b = bytes[i];
        match state {
            State::Code => match b {
                b'"' | b'\'' | b'`' => state = State::InString(b),
                b'/' => state = State::AfterSlash,
                _ => {
                    if let ControlFlow::Break(out) = visit(i, b) {
                        return Some(out);
                    }
                }
            },
            State::AfterSlash => match b {
                b'/' => state = State::InLineComment,
                b'*' => state = State::InBlockComment,
                _ => {
                    // The slash was code after all (division or a regex literal)
                    if let ControlFlow::Break(out) = visit(i - 1, b'/') {
                        return Some(out);
                    }
                    state = State::Code;
                    continue;
                }
            },
            State::InString(quote) => {
                if b == b'\\' {
                    state = State::InStringEscape(quote);
                } else if b == quote {
                    state = State::Code;
                }
            }
            State::InStringEscape(quote) => state = State::InString(quote),
            State::InLineComment => {
                if b == b'\n' || b == b'\r' {
                    state = State::Code;
                }
            }
            State::InBlockComment => {
                if b == b'*' {
                    state = State::InBlockCommentEnd;
                }
            }
            State::InBlockCommentEnd => {
                if b == b'/' {
                    state = State::Code;
                } else if b != b'*' {
                    state = State::InBlockComment;
                }
            }
        }
        i += 1;
    }

    None
}

/// Offset of the first `{` that is script code at or after `from`
pub(crate) fn find_open_brace(text: &str, from: usize) -> Option<usize> {
    scan_code(text, from, |i, b| {
        if b == b'{' {
            ControlFlow::Break(i)
        } else {
            ControlFlow::Continue(())
        }
    })
}

/// Offset just past the `}` that balances the `{` at `open`
pub(crate) fn match_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    scan_code(text, open, |i, b| {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return ControlFlow::Break(i + 1);
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    })
}

/// Comment and string literal ranges of a script, in source order
#[derive(Debug, Default)]
pub(crate) struct Literals {
    pub comments: Vec<Range<usize>>,
    /// String literals, quotes included
    pub strings: Vec<Range<usize>>,
}

impl Literals {
    /// True when `at` falls inside a string literal, past its opening quote
    pub fn in_string(&self, at: usize) -> bool {
        self.strings.iter().any(|r| r.start < at && at < r.end)
    }
}

pub(crate) fn literals(text: &str) -> Literals {
    let bytes = text.as_bytes();
    let mut found = Literals::default();
    let mut state = State::Code;
    let mut start = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        state = match state {
            State::Code | State::AfterSlash => match b {
                b'/' if matches!(state, State::AfterSlash) => {
                    start = i - 1;
                    State::InLineComment
                }
                b'*' if matches!(state, State::AfterSlash) => {
                    start = i - 1;
                    State::InBlockComment
                }
                b'"' | b'\'' | b'`' => {
                    start = i;
                    State::InString(b)
                }
                b'/' => State::AfterSlash,
                _ => State::Code,
            },
            State::InString(quote) => {
                if b == b'\\' {
                    State::InStringEscape(quote)
                } else if b == quote {
                    found.strings.push(start..i + 1);
                    State::Code
                } else {
                    State::InString(quote)
                }
            }
            State::InStringEscape(quote) => State::InString(quote),
            State::InLineComment => {
                if b == b'\n' || b == b'\r' {
                    found.comments.push(start..i);
                    State::Code
                } else {
                    State::InLineComment
                }
            }
            State::InBlockComment => {
                if b == b'*' {
                    State::InBlockCommentEnd
                } else {
                    State::InBlockComment
                }
            }
            State::InBlockCommentEnd => match b {
                b'/' => {
                    found.comments.push(start..i + 1);
                    State::Code
                }
                b'*' => State::InBlockCommentEnd,
                _ => State::InBlockComment,
            },
        };
    }

    match state {
        State::InLineComment | State::InBlockComment | State::InBlockCommentEnd => {
            found.comments.push(start..bytes.len())
        }
        State::InString(_) | State::InStringEscape(_) => found.strings.push(start..bytes.len()),
        State::Code | State::AfterSlash => {}
    }

    found
}

/// Byte ranges of `//` and `/* */` comments in `text`
pub(crate) fn comment_ranges(text: &str) -> Vec<Range<usize>> {
    literals(text).comments
}

//! Redis glob patterns (`KEYS user:*`) translated to anchored regexes.

use regex::Regex;

use crate::error::{StoreError, StoreResult};

/// Compile a Redis-style glob into an anchored [`Regex`].
///
/// Supported syntax: `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\x` escapes.
pub fn glob_to_regex(pattern: &str) -> StoreResult<Regex> {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'^') {
                    chars.next();
                    out.push('^');
                }
                let mut closed = false;
                for class_char in chars.by_ref() {
                    match class_char {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            out.push('\\');
                            out.push(class_char);
                        }
                        other => out.push(other),
                    }
                }
                if !closed {
                    return Err(StoreError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "unterminated character class".into(),
                    });
                }
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| StoreError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

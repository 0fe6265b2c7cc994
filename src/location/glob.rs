use regex::Regex;

use crate::types::error::S3bulkError;

const GLOB_METACHARACTERS: &[char] = &['*', '?', '['];
const ESCAPABLE_CHARACTERS: &[char] = &['*', '?', '[', ']', '\\'];

/// Compiled wildcard matcher. `*` and `?` also match the delimiter, so a
/// pattern is always applied to the full key, never to single path segments.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Result<Self, S3bulkError> {
        let regex_string = translate(pattern)?;
        let regex = Regex::new(&regex_string).map_err(|e| S3bulkError::InvalidLocation {
            location: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Byte index of the first unescaped metacharacter.
pub fn find_first_metacharacter(s: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if c == '\\' {
            escaped = true;
            continue;
        }
        if GLOB_METACHARACTERS.contains(&c) {
            return Some(index);
        }
    }

    None
}

pub fn has_glob_metacharacter(s: &str) -> bool {
    find_first_metacharacter(s).is_some()
}

/// Drops the backslash in front of escaped metacharacters.
pub fn unescape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if ESCAPABLE_CHARACTERS.contains(&next) {
                    result.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        result.push(c);
    }

    result
}

fn translate(pattern: &str) -> Result<String, S3bulkError> {
    let mut regex = String::from("(?s)^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some(&next) if ESCAPABLE_CHARACTERS.contains(&next) => {
                    push_literal(&mut regex, next);
                    chars.next();
                }
                _ => push_literal(&mut regex, c),
            },
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            '[' => {
                let mut class = String::from("[");
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    class.push('^');
                    chars.next();
                }

                let mut closed = false;
                let mut first = true;
                while let Some(class_char) = chars.next() {
                    match class_char {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let escaped = chars.next().unwrap_or('\\');
                            class.push('\\');
                            class.push(escaped);
                        }
                        '[' | ']' | '&' | '~' | '^' => {
                            class.push('\\');
                            class.push(class_char);
                        }
                        _ => class.push(class_char),
                    }
                    first = false;
                }

                if !closed {
                    return Err(S3bulkError::InvalidLocation {
                        location: pattern.to_string(),
                        reason: "unterminated character class".to_string(),
                    });
                }

                class.push(']');
                regex.push_str(&class);
            }
            _ => push_literal(&mut regex, c),
        }
    }

    regex.push('$');
    Ok(regex)
}

fn push_literal(regex: &mut String, c: char) {
    let mut buffer = [0u8; 4];
    regex.push_str(&regex::escape(c.encode_utf8(&mut buffer)));
}

//! Glob patterns for key scanning and bulk invalidation
//!
//! Follows the Redis `SCAN MATCH` dialect: `*`, `?`, `[abc]`, `[^a]`,
//! `[a-z]` and `\` escapes. Matching is anchored on both ends.

use regex::Regex;

use crate::domain::DomainError;

/// A compiled glob pattern
#[derive(Debug, Clone)]
pub struct GlobPattern {
    glob: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compiles a glob into a matcher
    pub fn new(glob: impl Into<String>) -> Result<Self, DomainError> {
        let glob = glob.into();

        if glob.is_empty() {
            return Err(DomainError::validation("Glob pattern cannot be empty"));
        }

        let regex = Regex::new(&Self::translate(&glob))
            .map_err(|e| DomainError::validation(format!("Invalid pattern '{}': {}", glob, e)))?;

        Ok(Self { glob, regex })
    }

    /// Returns the original glob text
    pub fn as_str(&self) -> &str {
        &self.glob
    }

    pub fn is_match(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    fn translate(glob: &str) -> String {
        let chars: Vec<char> = glob.chars().collect();
        let mut out = String::with_capacity(glob.len() * 2 + 2);
        out.push('^');

        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                '\\' if i + 1 < chars.len() => {
                    i += 1;
                    out.push_str(&regex::escape(&chars[i].to_string()));
                }
                '[' => match chars[i + 1..].iter().position(|c| *c == ']') {
                    Some(offset) if offset > 0 => {
                        let class = &chars[i + 1..i + 1 + offset];
                        out.push('[');
                        for (pos, c) in class.iter().enumerate() {
                            match c {
                                '^' if pos == 0 => out.push('^'),
                                '-' if pos > 0 && pos + 1 < class.len() => out.push('-'),
                                '\\' | '[' | ']' | '^' | '-' | '&' | '~' => {
                                    out.push('\\');
                                    out.push(*c);
                                }
                                other => out.push(*other),
                            }
                        }
                        out.push(']');
                        i += offset + 1;
                    }
                    _ => out.push_str("\\["),
                },
                c => out.push_str(&regex::escape(&c.to_string())),
            }
            i += 1;
        }

        out.push('$');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_suffix() {
        let pattern = GlobPattern::new("ns:*").unwrap();
        assert!(pattern.is_match("ns:1"));
        assert!(pattern.is_match("ns:"));
        assert!(!pattern.is_match("other:1"));
        assert!(!pattern.is_match("xns:1"));
    }

    #[test]
    fn test_question_mark_matches_one_char() {
        let pattern = GlobPattern::new("user:?").unwrap();
        assert!(pattern.is_match("user:1"));
        assert!(!pattern.is_match("user:12"));
    }

    #[test]
    fn test_character_class() {
        let pattern = GlobPattern::new("user:[12]").unwrap();
        assert!(pattern.is_match("user:1"));
        assert!(pattern.is_match("user:2"));
        assert!(!pattern.is_match("user:3"));

        let negated = GlobPattern::new("user:[^1]").unwrap();
        assert!(!negated.is_match("user:1"));
        assert!(negated.is_match("user:3"));

        let range = GlobPattern::new("user:[a-c]").unwrap();
        assert!(range.is_match("user:b"));
        assert!(!range.is_match("user:d"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = GlobPattern::new("exposed.users:(1)+").unwrap();
        assert!(pattern.is_match("exposed.users:(1)+"));
        assert!(!pattern.is_match("exposedxusers:(1)+"));
    }

    #[test]
    fn test_escaped_star_is_literal() {
        let pattern = GlobPattern::new(r"a\*b").unwrap();
        assert!(pattern.is_match("a*b"));
        assert!(!pattern.is_match("axb"));
    }

    #[test]
    fn test_unclosed_bracket_is_literal() {
        let pattern = GlobPattern::new("a[b").unwrap();
        assert!(pattern.is_match("a[b"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(GlobPattern::new("").is_err());
    }
}

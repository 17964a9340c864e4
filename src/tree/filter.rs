//! Key filtering
//!
//! A filter is a glob handed to the store's native cursor scan plus an
//! optional regex evaluated on this side. The wire format is
//! `"<glob>[,<regex>]"`; everything after the first comma is the regex.

use crate::error::ConfigError;
use regex::Regex;

/// Glob matching every key
pub const MATCH_ALL: &str = "*";

/// Immutable per-request key filter
#[derive(Debug, Clone)]
pub struct Filter {
    glob: String,
    regex: Option<Regex>,
}

impl Filter {
    /// Filter that only applies a server-side glob
    pub fn glob(glob: impl Into<String>) -> Self {
        let glob = glob.into();
        Self {
            glob: if glob.is_empty() {
                MATCH_ALL.to_string()
            } else {
                glob
            },
            regex: None,
        }
    }

    /// Filter accepting every key
    pub fn match_all() -> Self {
        Self::glob(MATCH_ALL)
    }

    /// Parse `"<glob>[,<regex>]"`
    ///
    /// Both parts are taken verbatim; whitespace is significant since keys
    /// may contain it. An empty glob means `*`; an empty regex part is
    /// ignored.
    pub fn parse(filter: &str) -> Result<Self, ConfigError> {
        let (glob, regex) = match filter.split_once(',') {
            Some((glob, regex)) => (glob, Some(regex)),
            None => (filter, None),
        };

        let regex = match regex {
            Some(pattern) if !pattern.is_empty() => {
                Some(Regex::new(pattern).map_err(|e| ConfigError::InvalidFilter {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?)
            }
            _ => None,
        };

        Ok(Self {
            regex,
            ..Self::glob(glob)
        })
    }

    /// Glob pattern for the store-side scan
    pub fn glob_pattern(&self) -> &str {
        &self.glob
    }

    /// Secondary regex, if any
    pub fn regex(&self) -> Option<&Regex> {
        self.regex.as_ref()
    }

    /// Check a key returned by the store-side scan against the regex.
    ///
    /// Keys reaching this point already matched the glob.
    pub fn accepts(&self, key: &str) -> bool {
        self.regex.as_ref().map_or(true, |re| re.is_match(key))
    }
}

/// Escape glob metacharacters so `literal` only matches itself
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        match c {
            '*' | '?' | '[' | ']' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

impl Default for Filter {
    fn default() -> Self {
        Self::match_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("app:users"), "app:users");
        assert_eq!(escape_glob("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn test_parse_glob_only() {
        let filter = Filter::parse("group-*").unwrap();
        assert_eq!(filter.glob_pattern(), "group-*");
        assert!(filter.regex().is_none());
        assert!(filter.accepts("anything"));
    }

    #[test]
    fn test_parse_glob_and_regex() {
        let filter = Filter::parse("group-*,.*bolt.*").unwrap();
        assert_eq!(filter.glob_pattern(), "group-*");
        assert!(filter.accepts("group-bolton:12"));
        assert!(!filter.accepts("group-atom:12"));
    }

    #[test]
    fn test_regex_may_contain_commas() {
        let filter = Filter::parse("*,^a{1,2}$").unwrap();
        assert!(filter.accepts("aa"));
        assert!(!filter.accepts("aaa"));
    }

    #[test]
    fn test_empty_parts_default() {
        let filter = Filter::parse("").unwrap();
        assert_eq!(filter.glob_pattern(), MATCH_ALL);

        let filter = Filter::parse("a*,").unwrap();
        assert!(filter.regex().is_none());
    }

    #[test]
    fn test_whitespace_is_kept() {
        let filter = Filter::parse(" padded *").unwrap();
        assert_eq!(filter.glob_pattern(), " padded *");

        let filter = Filter::parse("k *, x$").unwrap();
        assert_eq!(filter.glob_pattern(), "k *");
        assert!(filter.accepts("k 1 x"));
        assert!(!filter.accepts("k 1x"));
    }

    #[test]
    fn test_invalid_regex() {
        let err = Filter::parse("*,(unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFilter { .. }));
    }
}

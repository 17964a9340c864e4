//! Key tokenizer
//!
//! Splits a flat key into path segments on `:`. Spans delimited by `{` and
//! `}` are hash tags and are never split, even when they contain the
//! delimiter. Braces nest; a closing brace without an opening one is plain
//! text, and an unclosed `{` makes the rest of the key a single segment.

/// Path separator between segments
pub const PATH_SEPARATOR: char = ':';

const OPENING_BRACKET: u8 = b'{';
const CLOSING_BRACKET: u8 = b'}';

/// Split a key into its ordered path segments.
///
/// Segments borrow from `key`. An empty key yields no segment; a leading or
/// trailing delimiter yields an empty first or last segment, so joining the
/// segments with [`PATH_SEPARATOR`] always gives back the key.
pub fn tokenize(key: &str) -> Vec<&str> {
    let bytes = key.as_bytes();
    let mut segments = Vec::new();
    if bytes.is_empty() {
        return segments;
    }

    let separator = PATH_SEPARATOR as u8;
    let mut open_brackets = 0usize;
    let mut start = 0;

    for (index, &b) in bytes.iter().enumerate() {
        if b == separator && open_brackets == 0 {
            segments.push(&key[start..index]);
            start = index + 1;
        } else if b == OPENING_BRACKET {
            open_brackets += 1;
        } else if b == CLOSING_BRACKET && open_brackets > 0 {
            open_brackets -= 1;
        }
    }
    segments.push(&key[start..]);

    segments
}

/// Join a run of segments back into a path.
pub fn join(segments: &[&str]) -> String {
    let capacity = segments.iter().map(|s| s.len() + 1).sum::<usize>();
    let mut path = String::with_capacity(capacity);
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            path.push(PATH_SEPARATOR);
        }
        path.push_str(segment);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_simple_split() {
        assert_eq!(tokenize("group-atom:1"), vec!["group-atom", "1"]);
        assert_eq!(tokenize("a:b:c"), vec!["a", "b", "c"]);
        assert_eq!(tokenize("single"), vec!["single"]);
    }

    #[test]
    fn test_empty_key() {
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_hash_tag_is_atomic() {
        assert_eq!(tokenize("user:{a:b}:name"), vec!["user", "{a:b}", "name"]);
        assert_eq!(tokenize("{tenant:1}"), vec!["{tenant:1}"]);
    }

    #[test]
    fn test_nested_braces() {
        assert_eq!(
            tokenize("x:{a:{b:c}:d}:y"),
            vec!["x", "{a:{b:c}:d}", "y"]
        );
    }

    #[test]
    fn test_unclosed_brace_is_literal() {
        assert_eq!(tokenize("a:{b:c:d"), vec!["a", "{b:c:d"]);
    }

    #[test]
    fn test_stray_closing_brace() {
        assert_eq!(tokenize("a}:b"), vec!["a}", "b"]);
    }

    #[test]
    fn test_edge_delimiters() {
        assert_eq!(tokenize(":a"), vec!["", "a"]);
        assert_eq!(tokenize("a:"), vec!["a", ""]);
        assert_eq!(tokenize("a::b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_multibyte_keys() {
        assert_eq!(tokenize("café:naïve:{ü:ö}"), vec!["café", "naïve", "{ü:ö}"]);
    }

    #[test]
    fn test_join() {
        assert_eq!(join(&["a", "b", "c"]), "a:b:c");
        assert_eq!(join(&["a"]), "a");
        assert_eq!(join(&[]), "");
    }

    proptest! {
        #[test]
        fn test_join_restores_key(key in "[a-z:{}]{0,24}") {
            prop_assert_eq!(join(&tokenize(&key)), key);
        }

        #[test]
        fn test_single_brace_span_is_one_segment(inner in "[a-z:]{0,16}") {
            let key = format!("{{{}}}", inner);
            prop_assert_eq!(tokenize(&key), vec![key.as_str()]);
        }
    }
}

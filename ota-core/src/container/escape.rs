//! Quoting of path bytes inside manifest lines.
//!
//! A path is written as `'…'`. An embedded `'` becomes `'\''`, so inside a
//! quoted field every raw quote byte either starts that 4-byte sequence or
//! closes the field.

pub const QUOTE: u8 = b'\'';
pub const ESCAPED_QUOTE: &[u8] = b"'\\''";

pub fn quote(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + 2);
    out.push(QUOTE);
    for &b in raw {
        if b == QUOTE {
            out.extend_from_slice(ESCAPED_QUOTE);
        } else {
            out.push(b);
        }
    }
    out.push(QUOTE);
    out
}

/// Split one quoted field off the front of `input`.
///
/// Returns the unescaped content and the bytes after the closing quote, or
/// `None` when `input` does not start with a quote or the field is unterminated.
pub fn take_quoted(input: &[u8]) -> Option<(Vec<u8>, &[u8])> {
    if input.first() != Some(&QUOTE) {
        return None;
    }
    let mut out = Vec::new();
    let mut i = 1;
    while i < input.len() {
        if input[i..].starts_with(ESCAPED_QUOTE) {
            out.push(QUOTE);
            i += ESCAPED_QUOTE.len();
        } else if input[i] == QUOTE {
            return Some((out, &input[i + 1..]));
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    None
}

/// Unescape a field that must consist of exactly one quoted path.
pub fn unquote(field: &[u8]) -> Option<Vec<u8>> {
    match take_quoted(field)? {
        (raw, []) => Some(raw),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_plain() {
        assert_eq!(quote(b"usr/bin"), b"'usr/bin'");
    }

    #[test]
    fn test_quote_escapes_single_quote() {
        assert_eq!(quote(b"it's"), b"'it'\\''s'");
        assert_eq!(unquote(b"'it'\\''s'").unwrap(), b"it's");
    }

    #[test]
    fn test_trailing_quote_in_content() {
        // content ends in a quote: the escaped run is directly followed by the closing quote
        let q = quote(b"a'");
        assert_eq!(q, b"'a'\\'''");
        let (raw, rest) = take_quoted(&q).unwrap();
        assert_eq!(raw, b"a'");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_take_quoted_leaves_rest() {
        let (raw, rest) = take_quoted(b"'a,b','c'").unwrap();
        assert_eq!(raw, b"a,b");
        assert_eq!(rest, b",'c'");
    }

    #[test]
    fn test_unterminated_field() {
        assert!(take_quoted(b"'abc").is_none());
        assert!(take_quoted(b"abc'").is_none());
        assert!(unquote(b"'abc'x").is_none());
    }
}

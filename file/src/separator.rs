//! Finding byte positions at which a ninja file may be split without
//! breaking a statement.
//!
//! A newline ends a statement unless it is escaped by `$`, and a statement
//! keeps going as long as the following lines are indented (rule bodies and
//! build-edge bindings). So the only safe split points are newlines that are
//! not escaped and whose next line starts with a non-whitespace byte.

/// Returns true if the newline at `nl` is escaped by a `$` line
/// continuation. `$$` escapes the dollar itself, so only an odd-length run
/// of dollars before the newline escapes it. A `\r` between the run and the
/// newline is ignored.
pub fn newline_is_escaped(data: &[u8], nl: usize) -> bool {
    debug_assert_eq!(data[nl], b'\n');
    let mut i = nl;
    if i > 0 && data[i - 1] == b'\r' {
        i -= 1;
    }
    let mut dollars = 0;
    while i > 0 && data[i - 1] == b'$' {
        dollars += 1;
        i -= 1;
    }
    dollars % 2 == 1
}

/// Finds the first statement separator at or after `from`: the index of an
/// unescaped `\n` that is not followed by indentation. Returns `None` when
/// the rest of the buffer holds no such newline.
pub fn find_separator(data: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < data.len() {
        if data[i] != b'\n' {
            i += 1;
            continue;
        }
        if newline_is_escaped(data, i) {
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(b' ') | Some(b'\t') => i += 1,
            _ => return Some(i),
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_plain_newline() {
        assert_eq!(find_separator(b"a = b\nc = d\n", 0), Some(5));
        assert_eq!(find_separator(b"a = b\nc = d\n", 6), Some(11));
    }

    #[test]
    fn test_escaped_newline_is_not_a_separator() {
        // `a = b $<nl>continued` is one statement.
        assert_eq!(find_separator(b"a = b $\n  c\nd = e\n", 0), Some(11));
    }

    #[test]
    fn test_double_dollar_does_not_escape() {
        // `$$` is a literal dollar; the newline still ends the statement.
        assert_eq!(find_separator(b"a = b$$\nc = d\n", 0), Some(7));
        // Three dollars: literal dollar plus continuation.
        assert_eq!(find_separator(b"a = b$$$\nc = d\n", 0), Some(13));
    }

    #[test]
    fn test_indented_continuation() {
        // The rule body belongs to the `rule` statement.
        let data = b"rule cc\n  command = gcc\nx = 1\n";
        assert_eq!(find_separator(data, 0), Some(23));
    }

    #[test]
    fn test_crlf() {
        assert_eq!(find_separator(b"a = b\r\nc = d\r\n", 0), Some(6));
        assert_eq!(find_separator(b"a = b $\r\nc\r\nd = e\r\n", 0), Some(11));
    }

    #[test]
    fn test_trailing_newline_at_eof() {
        assert_eq!(find_separator(b"a = b\n", 0), Some(5));
        assert_eq!(find_separator(b"a = b", 0), None);
    }
}

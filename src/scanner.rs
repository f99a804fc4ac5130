//! Comment- and string-aware source scanning.
//!
//! Everything the parser and rewriter do starts here: pattern search and
//! brace matching that never trip over `// line comments`, `/* block
//! comments */` or string literals. An unterminated comment or string just
//! consumes to end-of-input; real syntax errors are the GPU compiler's job
//! to report.

/// If `i` sits at the start of a comment or string literal, return the
/// index one past its end. Returns `None` when `i` points at plain code.
fn skip_non_code(src: &[u8], i: usize) -> Option<usize> {
    match src[i] {
        b'/' if i + 1 < src.len() && src[i + 1] == b'/' => {
            let mut j = i + 2;
            while j < src.len() && src[j] != b'\n' {
                j += 1;
            }
            // Keep the newline: callers that track lines still see it.
            Some(j)
        }
        b'/' if i + 1 < src.len() && src[i + 1] == b'*' => {
            let mut j = i + 2;
            while j + 1 < src.len() {
                if src[j] == b'*' && src[j + 1] == b'/' {
                    return Some(j + 2);
                }
                j += 1;
            }
            Some(src.len())
        }
        b'"' => {
            let mut j = i + 1;
            while j < src.len() {
                match src[j] {
                    b'\\' => j += 2,
                    b'"' => return Some(j + 1),
                    _ => j += 1,
                }
            }
            Some(src.len())
        }
        _ => None,
    }
}

/// Find the first occurrence of `pattern` at or after `from`, ignoring
/// matches inside comments and string literals.
pub fn find_pattern_from(src: &str, pattern: &str, from: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let pat = pattern.as_bytes();
    if pat.is_empty() {
        return None;
    }
    let mut i = from;
    while i < bytes.len() {
        if let Some(next) = skip_non_code(bytes, i) {
            i = next.max(i + 1);
            continue;
        }
        if bytes[i..].starts_with(pat) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Find the first occurrence of `pattern` outside comments and strings.
pub fn find_pattern(src: &str, pattern: &str) -> Option<usize> {
    find_pattern_from(src, pattern, 0)
}

/// Like [`find_pattern_from`], but the match must be a whole identifier:
/// not preceded or followed by an identifier character.
pub fn find_identifier_from(src: &str, ident: &str, from: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    let mut at = from;
    while let Some(pos) = find_pattern_from(src, ident, at) {
        let before_ok = pos == 0 || !is_ident_char(bytes[pos - 1]);
        let end = pos + ident.len();
        let after_ok = end >= bytes.len() || !is_ident_char(bytes[end]);
        if before_ok && after_ok {
            return Some(pos);
        }
        at = pos + 1;
    }
    None
}

#[inline]
pub(crate) fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Starting at a function signature, return the offset one past the `}`
/// closing its body. Brace counting only begins at the first `{`, so the
/// parameter list is skipped. Unterminated bodies consume to end-of-input.
pub fn find_function_end(src: &str, start: usize) -> usize {
    let bytes = src.as_bytes();
    let mut i = start;
    let mut depth = 0usize;
    let mut in_body = false;
    while i < bytes.len() {
        if let Some(next) = skip_non_code(bytes, i) {
            i = next.max(i + 1);
            continue;
        }
        match bytes[i] {
            b'{' => {
                in_body = true;
                depth += 1;
            }
            b'}' if in_body => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    src.len()
}

/// Byte offset of the start of the line containing `offset`.
pub fn line_start(src: &str, offset: usize) -> usize {
    src.as_bytes()[..offset.min(src.len())]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |p| p + 1)
}

/// Byte offset one past the end of the line containing `offset` (excludes
/// the newline itself).
pub fn line_end(src: &str, offset: usize) -> usize {
    src.as_bytes()[offset.min(src.len())..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(src.len(), |p| offset + p)
}

/// The full text of the line containing `offset`.
pub fn line_at(src: &str, offset: usize) -> &str {
    &src[line_start(src, offset)..line_end(src, offset)]
}

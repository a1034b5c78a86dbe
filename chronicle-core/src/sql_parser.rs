//! Statement splitting for ClickHouse SQL scripts.
//!
//! The HTTP interface accepts one statement per request, so script sections
//! are cut on `;` outside string literals, quoted identifiers and comments.

/// Split SQL into individual statements, respecting quotes and comments.
///
/// Chunks made only of comments and whitespace are dropped.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'-' if i + 1 < len && bytes[i + 1] == b'-' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'#' if i + 1 < len && bytes[i + 1] == b'!' => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < len && bytes[i + 1] == b'*' => {
                i += 2;
                let mut depth = 1;
                while i < len && depth > 0 {
                    if i + 1 < len && bytes[i] == b'/' && bytes[i + 1] == b'*' {
                        depth += 1;
                        i += 2;
                    } else if i + 1 < len && bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        depth -= 1;
                        i += 2;
                    } else {
                        i += 1;
                    }
                }
                continue;
            }
            // String literals and quoted identifiers share escaping rules:
            // backslash escapes, and a doubled quote is a literal quote.
            quote @ (b'\'' | b'"' | b'`') => {
                i += 1;
                while i < len {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        if i + 1 < len && bytes[i + 1] == quote {
                            i += 2;
                        } else {
                            i += 1;
                            break;
                        }
                    } else {
                        i += 1;
                    }
                }
                continue;
            }
            b';' => {
                push_statement(&mut statements, &sql[start..i]);
                i += 1;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    push_statement(&mut statements, &sql[start.min(len)..]);
    statements
}

fn push_statement<'a>(statements: &mut Vec<&'a str>, chunk: &'a str) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() && !is_comment_only(trimmed) {
        statements.push(trimmed);
    }
}

/// Whether `sql` holds nothing but comments and whitespace.
pub fn is_comment_only(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if rest.is_empty() {
            return true;
        }
        if rest.starts_with("--") || rest.starts_with("#!") {
            match rest.find('\n') {
                Some(pos) => rest = rest[pos + 1..].trim_start(),
                None => return true,
            }
        } else if let Some(body) = rest.strip_prefix("/*") {
            match body.find("*/") {
                Some(pos) => rest = body[pos + 2..].trim_start(),
                None => return true,
            }
        } else {
            return false;
        }
    }
}

/// Lexical region a byte of SQL text belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    Code,
    Literal,
    Comment,
}

#[derive(Clone)]
enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

fn starts_with_at(bytes: &[u8], idx: usize, pat: &[u8]) -> bool {
    bytes.get(idx..idx + pat.len()) == Some(pat)
}

/// `$tag$` opener at `start`; returns the tag and the index of its closing `$`.
fn dollar_tag_at(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut idx = start + 1;
    while idx < bytes.len() && bytes[idx] != b'$' {
        let b = bytes[idx];
        if !(b.is_ascii_alphanumeric() || b == b'_') || (idx == start + 1 && b.is_ascii_digit()) {
            return None;
        }
        idx += 1;
    }
    if idx < bytes.len() {
        let tag = std::str::from_utf8(&bytes[start + 1..idx]).ok()?.to_string();
        Some((tag, idx))
    } else {
        None
    }
}

/// Walk `sql` and report the region of every byte, in order.
///
/// Quote characters and comment markers are reported with the region they open or close.
pub(crate) fn scan(sql: &str, mut visit: impl FnMut(usize, u8, Region)) {
    let bytes = sql.as_bytes();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => {
                    state = State::SingleQuoted;
                    visit(idx, b, Region::Literal);
                }
                b'"' => {
                    state = State::DoubleQuoted;
                    visit(idx, b, Region::Literal);
                }
                b'-' if starts_with_at(bytes, idx, b"--") => {
                    state = State::LineComment;
                    visit(idx, b, Region::Comment);
                }
                b'/' if starts_with_at(bytes, idx, b"/*") => {
                    state = State::BlockComment(1);
                    visit(idx, b, Region::Comment);
                    visit(idx + 1, b'*', Region::Comment);
                    idx += 1;
                }
                b'$' => {
                    if let Some((tag, close)) = dollar_tag_at(bytes, idx) {
                        for (i, &c) in bytes.iter().enumerate().take(close + 1).skip(idx) {
                            visit(i, c, Region::Literal);
                        }
                        state = State::DollarQuoted(tag);
                        idx = close;
                    } else {
                        visit(idx, b, Region::Code);
                    }
                }
                _ => visit(idx, b, Region::Code),
            },
            State::SingleQuoted | State::DoubleQuoted => {
                let quote = if matches!(state, State::SingleQuoted) {
                    b'\''
                } else {
                    b'"'
                };
                visit(idx, b, Region::Literal);
                if b == quote {
                    if bytes.get(idx + 1) == Some(&quote) {
                        visit(idx + 1, quote, Region::Literal);
                        idx += 1;
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                visit(idx, b, Region::Comment);
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                visit(idx, b, Region::Comment);
                if starts_with_at(bytes, idx, b"/*") {
                    visit(idx + 1, b'*', Region::Comment);
                    idx += 1;
                    state = State::BlockComment(depth + 1);
                } else if starts_with_at(bytes, idx, b"*/") {
                    visit(idx + 1, b'/', Region::Comment);
                    idx += 1;
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                }
            }
            State::DollarQuoted(ref tag) => {
                visit(idx, b, Region::Literal);
                if b == b'$' {
                    let closing = format!("{tag}$");
                    if starts_with_at(bytes, idx + 1, closing.as_bytes()) {
                        for i in idx + 1..=idx + closing.len() {
                            visit(i, bytes[i], Region::Literal);
                        }
                        idx += closing.len();
                        state = State::Normal;
                    }
                }
            }
        }
        idx += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(sql: &str) -> String {
        let mut out = String::new();
        scan(sql, |_, _, r| {
            out.push(match r {
                Region::Code => 'c',
                Region::Literal => 'l',
                Region::Comment => '#',
            });
        });
        out
    }

    #[test]
    fn every_byte_is_visited_once() {
        let sql = "select 'a''b', $q$ x $q$ /* c /* d */ */ -- e\n1";
        assert_eq!(regions(sql).len(), sql.len());
    }

    #[test]
    fn classifies_quotes_and_comments() {
        assert_eq!(regions("a'b'c"), "clllc");
        assert_eq!(regions("a--b\nc"), "c####c");
        assert_eq!(regions("$$x$$;"), "lllllc");
        assert_eq!(regions("/*/**/*/x"), "########c");
    }

    #[test]
    fn positional_parameters_are_code() {
        assert_eq!(regions("$1"), "cc");
    }
}

//! Quote- and comment-aware inspection of SQL text.
//!
//! The executor splices caller text into compound commands, so it needs to know where a statement
//! really ends (a trailing `-- comment` would swallow anything appended after it) and what the
//! leading keyword is. Dollar-quoted bodies, nested block comments and doubled quotes are honoured.

use std::sync::LazyLock;

use regex::Regex;

mod scanner;

pub(crate) use scanner::{Region, scan};

static ROLLBACK_TO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^ROLLBACK\s+(?:WORK\s+|TRANSACTION\s+)?TO\b").ok());

static FORWARD_FETCH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^FETCH\s+(?:FORWARD\s+(\d+|ALL)\b|(\d+|ALL)\b|(?:NEXT|FORWARD)\b)").ok()
});

/// Split a multi-statement text at top-level semicolons. Blank statements are dropped.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    scan(sql, |idx, b, region| {
        if b == b';' && region == Region::Code {
            push_statement(&mut out, &sql[start..idx]);
            start = idx + 1;
        }
    });
    push_statement(&mut out, &sql[start..]);
    out
}

fn push_statement<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let stmt = trim_terminators(piece);
    if !stmt.is_empty() {
        out.push(stmt);
    }
}

/// Strip leading comments/whitespace and trailing comments, whitespace and semicolons.
///
/// The result can be followed by `;` and more text without the appended text landing in a comment.
#[must_use]
pub fn trim_terminators(sql: &str) -> &str {
    let mut first = None;
    let mut end = 0;
    scan(sql, |idx, b, region| {
        let significant = match region {
            Region::Literal => true,
            Region::Comment => false,
            Region::Code => !(b.is_ascii_whitespace() || b == b';'),
        };
        if significant {
            first.get_or_insert(idx);
            end = idx + 1;
        }
    });
    match first {
        Some(start) => &sql[start..end],
        None => "",
    }
}

/// Uppercased first keyword of the statement, skipping leading comments.
#[must_use]
pub fn leading_keyword(sql: &str) -> Option<String> {
    let body = trim_terminators(sql);
    let word: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic() || *c == '_')
        .collect();
    if word.is_empty() {
        None
    } else {
        Some(word.to_ascii_uppercase())
    }
}

/// True for `ROLLBACK TO [SAVEPOINT] x` and its `WORK`/`TRANSACTION` spellings.
#[must_use]
pub fn is_rollback_to(sql: &str) -> bool {
    ROLLBACK_TO
        .as_ref()
        .is_some_and(|re| re.is_match(trim_terminators(sql)))
}

/// Row count a leading forward `FETCH` asks for; `ALL` is `usize::MAX`.
///
/// `None` for other statements, other directions and the bare `FETCH name` form.
#[must_use]
pub fn fetch_count(sql: &str) -> Option<usize> {
    let caps = FORWARD_FETCH.as_ref()?.captures(trim_terminators(sql))?;
    match caps.get(1).or_else(|| caps.get(2)) {
        Some(count) if count.as_str().eq_ignore_ascii_case("ALL") => Some(usize::MAX),
        Some(count) => count.as_str().parse().ok(),
        None => Some(1),
    }
}

/// Add `column` to the select list of a single SELECT, just before its top-level `FROM`.
///
/// Text without a top-level `FROM` is returned unchanged.
#[must_use]
pub fn append_select_column(sql: &str, column: &str) -> String {
    let body = trim_terminators(sql);
    let bytes = body.as_bytes();
    let mut code = vec![false; bytes.len()];
    let mut depth = vec![0u32; bytes.len()];
    let mut level = 0u32;
    scan(body, |idx, b, region| {
        if region == Region::Code {
            match b {
                b'(' => level += 1,
                b')' => level = level.saturating_sub(1),
                _ => {}
            }
            code[idx] = true;
        }
        depth[idx] = level;
    });
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_' || b == b'$';
    let found = (0..bytes.len().saturating_sub(3)).find(|&i| {
        bytes[i..i + 4].eq_ignore_ascii_case(b"from")
            && code[i..i + 4].iter().all(|c| *c)
            && depth[i] == 0
            && (i == 0 || !is_word(bytes[i - 1]))
            && bytes.get(i + 4).is_none_or(|b| !is_word(*b))
    });
    match found {
        Some(at) => {
            let head = body[..at].trim_end();
            format!("{head}, {column} {}", &body[at..])
        }
        None => body.to_string(),
    }
}

/// Quote an identifier for use in generated commands.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for use in generated commands.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_outside_literals_and_comments() {
        let sql = "insert into t values ('a;b'); -- c;d\nselect $x$;$x$; ; select 1";
        assert_eq!(
            split_statements(sql),
            vec!["insert into t values ('a;b')", "select $x$;$x$", "select 1"]
        );
    }

    #[test]
    fn trims_trailing_comment_and_terminators() {
        assert_eq!(trim_terminators("  select 1 ;; -- done"), "select 1");
        assert_eq!(trim_terminators("/* lead */ select ';'"), "select ';'");
        assert_eq!(trim_terminators(" ; -- nothing"), "");
    }

    #[test]
    fn leading_keyword_skips_comments() {
        assert_eq!(
            leading_keyword("-- hi\n  begin;").as_deref(),
            Some("BEGIN")
        );
        assert_eq!(leading_keyword("   ").as_deref(), None);
    }

    #[test]
    fn detects_rollback_to_spellings() {
        assert!(is_rollback_to("ROLLBACK TO SAVEPOINT s1"));
        assert!(is_rollback_to("rollback work to s1"));
        assert!(!is_rollback_to("ROLLBACK"));
        assert!(!is_rollback_to("ROLLBACK PREPARED 'x'"));
    }

    #[test]
    fn reads_forward_fetch_counts() {
        assert_eq!(fetch_count("FETCH FORWARD 10 IN \"SQL_CUR1\""), Some(10));
        assert_eq!(fetch_count("fetch 3 from c;"), Some(3));
        assert_eq!(fetch_count("FETCH NEXT IN c"), Some(1));
        assert_eq!(fetch_count("FETCH FORWARD FROM c"), Some(1));
        assert_eq!(fetch_count("FETCH FORWARD ALL IN c"), Some(usize::MAX));
        assert_eq!(fetch_count("-- page\nFETCH ALL IN c"), Some(usize::MAX));
        assert_eq!(fetch_count("FETCH BACKWARD 2 IN c"), None);
        assert_eq!(fetch_count("FETCH c"), None);
        assert_eq!(fetch_count("SELECT 1"), None);
    }

    #[test]
    fn appends_before_top_level_from() {
        assert_eq!(
            append_select_column("select id, name from t where id > 1;", "ctid"),
            "select id, name, ctid from t where id > 1"
        );
        assert_eq!(
            append_select_column(
                "select (select max(x) from u), 'from' from t",
                "ctid"
            ),
            "select (select max(x) from u), 'from', ctid from t"
        );
        assert_eq!(append_select_column("select 1", "ctid"), "select 1");
        assert_eq!(
            append_select_column("select fromage FROM t", "ctid"),
            "select fromage, ctid FROM t"
        );
    }

    #[test]
    fn quoting_doubles_delimiters() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}

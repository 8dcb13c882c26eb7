use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// A single column value as delivered by the server.
///
/// An absent value is SQL NULL. Cells are owned by the row cache and replaced wholesale when the
/// cache grows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell(Option<Vec<u8>>);

impl Cell {
    #[must_use]
    pub fn null() -> Self {
        Cell(None)
    }

    #[must_use]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Cell(Some(bytes.into()))
    }

    #[must_use]
    pub fn text(value: &str) -> Self {
        Cell(Some(value.as_bytes().to_vec()))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Length in bytes; `None` for NULL.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        self.0.as_ref().map(Vec::len)
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Parse the textual value, returning `None` for NULL or unparsable text.
    #[must_use]
    pub fn parse<T: FromStr>(&self) -> Option<T> {
        self.as_str().and_then(|s| s.parse().ok())
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::text(value)
    }
}

impl From<Option<&str>> for Cell {
    fn from(value: Option<&str>) -> Self {
        value.map_or_else(Cell::null, Cell::text)
    }
}

/// Metadata for one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_oid: u32,
    /// Declared size, or -1 when variable.
    pub type_size: i16,
    pub type_modifier: i32,
}

impl ColumnDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
            type_size: -1,
            type_modifier: -1,
        }
    }
}

/// Column metadata shared by every row of a result, with a name lookup index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Columns {
    descriptors: Vec<ColumnDescriptor>,
    index: HashMap<String, usize>,
}

impl Columns {
    #[must_use]
    pub fn new(descriptors: Vec<ColumnDescriptor>) -> Self {
        let mut index = HashMap::with_capacity(descriptors.len());
        for (i, col) in descriptors.iter().enumerate() {
            // first occurrence wins for duplicated names
            index.entry(col.name.clone()).or_insert(i);
        }
        Self { descriptors, index }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&ColumnDescriptor> {
        self.descriptors.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.descriptors.iter()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Options for a single submission. Combine with `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryFlags(u8);

impl QueryFlags {
    pub const NONE: QueryFlags = QueryFlags(0);
    /// Issue an implicit BEGIN when no transaction is open.
    pub const GO_INTO_TRANSACTION: QueryFlags = QueryFlags(1);
    /// Undo only this statement on failure, through a per-statement savepoint.
    pub const ROLLBACK_ON_ERROR: QueryFlags = QueryFlags(1 << 1);
    /// Keep a failure call-local: do not record it as the session's sticky error.
    pub const IGNORE_ABORT_ON_CONN: QueryFlags = QueryFlags(1 << 2);
    /// Append COMMIT to the compound command.
    pub const END_WITH_COMMIT: QueryFlags = QueryFlags(1 << 3);

    #[must_use]
    pub fn contains(self, other: QueryFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn without(self, other: QueryFlags) -> QueryFlags {
        QueryFlags(self.0 & !other.0)
    }
}

impl BitOr for QueryFlags {
    type Output = QueryFlags;

    fn bitor(self, rhs: QueryFlags) -> QueryFlags {
        QueryFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryFlags {
    fn bitor_assign(&mut self, rhs: QueryFlags) {
        self.0 |= rhs.0;
    }
}

/// A parsed command-completion tag such as `INSERT 0 1` or `FETCH 10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTag {
    raw: String,
}

impl CommandTag {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The command word(s) without the trailing row count.
    #[must_use]
    pub fn command(&self) -> &str {
        let trimmed = self.raw.trim();
        match trimmed.rfind(' ') {
            Some(pos) if trimmed[pos + 1..].bytes().all(|b| b.is_ascii_digit()) => {
                let head = trimmed[..pos].trim_end();
                // INSERT carries an oid before the count
                match head.rfind(' ') {
                    Some(p)
                        if head.starts_with("INSERT")
                            && head[p + 1..].bytes().all(|b| b.is_ascii_digit()) =>
                    {
                        head[..p].trim_end()
                    }
                    _ => head,
                }
            }
            _ => trimmed,
        }
    }

    /// Trailing row count, if the tag carries one.
    #[must_use]
    pub fn rows(&self) -> Option<u64> {
        let trimmed = self.raw.trim();
        let (_, last) = trimmed.rsplit_once(' ')?;
        last.parse().ok()
    }

    #[must_use]
    pub fn is(&self, command: &str) -> bool {
        self.command().eq_ignore_ascii_case(command)
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_cells_have_no_length() {
        assert!(Cell::null().is_null());
        assert_eq!(Cell::null().len(), None);
        assert_eq!(Cell::text("").len(), Some(0));
        assert_eq!(Cell::text("42").parse::<i64>(), Some(42));
    }

    #[test]
    fn command_tags_split_counts() {
        let tag = CommandTag::new("INSERT 0 3");
        assert_eq!(tag.command(), "INSERT");
        assert_eq!(tag.rows(), Some(3));

        let tag = CommandTag::new("FETCH 10");
        assert!(tag.is("fetch"));
        assert_eq!(tag.rows(), Some(10));

        let tag = CommandTag::new("CREATE TABLE");
        assert_eq!(tag.command(), "CREATE TABLE");
        assert_eq!(tag.rows(), None);
    }

    #[test]
    fn flags_combine() {
        let flags = QueryFlags::GO_INTO_TRANSACTION | QueryFlags::ROLLBACK_ON_ERROR;
        assert!(flags.contains(QueryFlags::ROLLBACK_ON_ERROR));
        assert!(!flags.contains(QueryFlags::END_WITH_COMMIT));
        assert!(!flags
            .without(QueryFlags::GO_INTO_TRANSACTION)
            .contains(QueryFlags::GO_INTO_TRANSACTION));
    }

    #[test]
    fn column_lookup_by_name() {
        let cols = Columns::new(vec![
            ColumnDescriptor::new("id", 23),
            ColumnDescriptor::new("name", 25),
        ]);
        assert_eq!(cols.position("name"), Some(1));
        assert_eq!(cols.position("missing"), None);
        assert_eq!(cols.names(), vec!["id", "name"]);
    }
}

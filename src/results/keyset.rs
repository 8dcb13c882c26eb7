use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Cell, Columns};

pub(crate) const TUPLE_COLUMN: &str = "ctid";
const SURROGATE_COLUMN: &str = "oid";

/// Physical location of a row version on the server: block number and line pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId {
    pub block: u32,
    pub offset: u16,
}

impl TupleId {
    /// Parse the `(block,offset)` text form.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
        let (block, offset) = inner.split_once(',')?;
        Some(Self {
            block: block.trim().parse().ok()?,
            offset: offset.trim().parse().ok()?,
        })
    }
}

/// Local edit state of one cached row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowStatus {
    #[default]
    Clean,
    Updated,
    Deleted,
    Added,
}

/// Identity recorded for one cached row of an updatable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeysetEntry {
    pub tuple: Option<TupleId>,
    pub surrogate: Option<u32>,
    pub status: RowStatus,
}

impl KeysetEntry {
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status == RowStatus::Deleted
    }
}

/// Where the hidden identity columns sit in a raw server row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct KeyColumns {
    pub tuple: Option<usize>,
    pub surrogate: Option<usize>,
}

impl KeyColumns {
    /// Locate identity columns the driver appended after the caller's select list.
    pub(crate) fn detect(columns: &Columns) -> Self {
        let trailing = |name: &str| {
            columns
                .position(name)
                .filter(|&i| i + 2 >= columns.len())
        };
        Self {
            tuple: trailing(TUPLE_COLUMN),
            surrogate: trailing(SURROGATE_COLUMN),
        }
    }

    /// The caller-visible columns.
    pub(crate) fn visible(self, columns: &Columns) -> Columns {
        Columns::new(
            columns
                .iter()
                .enumerate()
                .filter(|(i, _)| Some(*i) != self.tuple && Some(*i) != self.surrogate)
                .map(|(_, c)| c.clone())
                .collect(),
        )
    }

    pub(crate) fn hidden_count(self) -> usize {
        usize::from(self.tuple.is_some()) + usize::from(self.surrogate.is_some())
    }

    /// Split a raw row into visible cells and its keyset entry.
    ///
    /// Rows without identity columns get the logical row number as surrogate id.
    pub(crate) fn split(self, mut raw: Vec<Cell>, logical: usize) -> (Vec<Cell>, KeysetEntry) {
        let tuple = self
            .tuple
            .and_then(|i| raw.get(i))
            .and_then(Cell::as_str)
            .and_then(TupleId::parse);
        let surrogate = match self.surrogate {
            Some(i) => raw.get(i).and_then(Cell::parse::<u32>),
            None if self.tuple.is_none() => u32::try_from(logical).ok(),
            None => None,
        };
        let mut hidden: Vec<usize> = self.tuple.into_iter().chain(self.surrogate).collect();
        hidden.sort_unstable_by(|a, b| b.cmp(a));
        for idx in hidden {
            if idx < raw.len() {
                raw.remove(idx);
            }
        }
        let entry = KeysetEntry {
            tuple,
            surrogate,
            status: RowStatus::Clean,
        };
        (raw, entry)
    }
}

/// Rows added, updated or deleted through this result since the server snapshot was taken.
///
/// Keys are logical row numbers. Added rows follow the last server row.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeltaBuffers {
    pub updated: BTreeMap<usize, Vec<Cell>>,
    pub deleted: BTreeSet<usize>,
    pub added: Vec<Vec<Cell>>,
}

impl DeltaBuffers {
    /// Apply pending edits to a freshly fetched row.
    pub(crate) fn overlay(&self, logical: usize, cells: &mut Vec<Cell>, entry: &mut KeysetEntry) {
        if self.deleted.contains(&logical) {
            entry.status = RowStatus::Deleted;
        } else if let Some(updated) = self.updated.get(&logical) {
            cells.clone_from(updated);
            entry.status = RowStatus::Updated;
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty() && self.added.is_empty()
    }
}

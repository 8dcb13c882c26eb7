use std::sync::Arc;

use crate::types::{Cell, Columns};

/// A row from a result
///
/// Column metadata is shared by every row of the result it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Column metadata shared across the result
    pub columns: Arc<Columns>,
    /// The values for this row
    pub cells: Vec<Cell>,
}

impl Row {
    /// Create a new row
    ///
    /// # Arguments
    ///
    /// * `columns` - The column metadata
    /// * `cells` - The values for this row
    #[must_use]
    pub fn new(columns: Arc<Columns>, cells: Vec<Cell>) -> Self {
        Self { columns, cells }
    }

    /// Get a value from the row by column name
    ///
    /// # Returns
    ///
    /// The value at the column, or None if the column wasn't found
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Cell> {
        self.columns
            .position(column_name)
            .and_then(|idx| self.cells.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    /// Textual value of a column, `None` for NULL or unknown columns.
    #[must_use]
    pub fn text(&self, column_name: &str) -> Option<&str> {
        self.get(column_name).and_then(Cell::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

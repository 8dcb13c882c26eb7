use crate::error::{ServerError, ServerNotice};

use super::result_set::ResultSet;

/// The results of one submission, one per statement, in execution order.
#[derive(Debug, Default)]
pub struct ResultChain {
    results: Vec<ResultSet>,
}

impl ResultChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, result: ResultSet) {
        self.results.push(result);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The chain head.
    #[must_use]
    pub fn first(&self) -> Option<&ResultSet> {
        self.results.first()
    }

    pub fn first_mut(&mut self) -> Option<&mut ResultSet> {
        self.results.first_mut()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ResultSet> {
        self.results.last()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&ResultSet> {
        self.results.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut ResultSet> {
        self.results.get_mut(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResultSet> {
        self.results.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ResultSet> {
        self.results.iter_mut()
    }

    /// The first error-bearing result's error.
    #[must_use]
    pub fn first_error(&self) -> Option<&ServerError> {
        self.results.iter().find_map(ResultSet::error)
    }

    /// Every notice attached to any result of the chain.
    pub fn notices(&self) -> impl Iterator<Item = &ServerNotice> {
        self.results.iter().flat_map(|r| r.notices().iter())
    }

    /// Drop results after the first error-bearing one; they were never reached.
    pub(crate) fn truncate_after_first_error(&mut self) {
        if let Some(pos) = self.results.iter().position(ResultSet::is_error) {
            self.results.truncate(pos + 1);
        }
    }

    /// Close every server cursor in the chain.
    ///
    /// # Errors
    /// Returns the first close failure; the remaining cursors are still closed.
    pub fn close_cursors(&mut self) -> Result<(), crate::error::DriverError> {
        let mut first_err = None;
        for result in &mut self.results {
            if let Err(e) = result.close_cursor() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl IntoIterator for ResultChain {
    type Item = ResultSet;
    type IntoIter = std::vec::IntoIter<ResultSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultChain {
    type Item = &'a ResultSet;
    type IntoIter = std::slice::Iter<'a, ResultSet>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

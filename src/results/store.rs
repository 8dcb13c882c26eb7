use crate::error::DriverError;

use super::keyset::KeysetEntry;
use super::row::Row;

/// Smallest allocation made when the cache first grows.
pub(crate) const MIN_CACHE_ROWS: usize = 32;

/// Owned row cache for one result window, with a parallel keyset for updatable results.
///
/// Buffers double on overflow and only shrink through [`RowStore::release`]. Rows are addressed by
/// index so growth never invalidates a position.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowStore {
    rows: Vec<Row>,
    keyset: Option<Vec<KeysetEntry>>,
}

impl RowStore {
    pub(crate) fn new(track_keys: bool) -> Self {
        Self {
            rows: Vec::new(),
            keyset: track_keys.then(Vec::new),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    pub(crate) fn tracks_keys(&self) -> bool {
        self.keyset.is_some()
    }

    pub(crate) fn row(&self, idx: usize) -> Option<&Row> {
        self.rows.get(idx)
    }

    pub(crate) fn row_mut(&mut self, idx: usize) -> Option<&mut Row> {
        self.rows.get_mut(idx)
    }

    pub(crate) fn key(&self, idx: usize) -> Option<&KeysetEntry> {
        self.keyset.as_ref().and_then(|k| k.get(idx))
    }

    pub(crate) fn key_mut(&mut self, idx: usize) -> Option<&mut KeysetEntry> {
        self.keyset.as_mut().and_then(|k| k.get_mut(idx))
    }

    pub(crate) fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Ensure room for `needed` rows in total, doubling from the current capacity.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` with both buffers unchanged if allocation fails.
    fn grow_to(&mut self, needed: usize) -> Result<(), DriverError> {
        let current = self.rows.capacity();
        if needed <= current {
            return Ok(());
        }
        let mut target = current.max(MIN_CACHE_ROWS);
        while target < needed {
            target = target.checked_mul(2).ok_or_else(|| {
                DriverError::OutOfMemory(format!("row cache cannot hold {needed} rows"))
            })?;
        }
        let len = self.rows.len();
        self.rows.try_reserve_exact(target - len).map_err(|e| {
            DriverError::OutOfMemory(format!("row cache growth to {target} rows failed: {e}"))
        })?;
        if let Some(keys) = self.keyset.as_mut() {
            let key_len = keys.len();
            keys.try_reserve_exact(target.saturating_sub(key_len))
                .map_err(|e| {
                    DriverError::OutOfMemory(format!("keyset growth to {target} rows failed: {e}"))
                })?;
        }
        Ok(())
    }

    /// Discard the window and fill it with `rows`, keeping the allocation.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` if the buffers cannot grow; the old window is kept.
    pub(crate) fn replace(
        &mut self,
        rows: Vec<Row>,
        keys: Vec<KeysetEntry>,
    ) -> Result<(), DriverError> {
        self.grow_to(rows.len())?;
        self.rows.clear();
        if let Some(keyset) = self.keyset.as_mut() {
            keyset.clear();
        }
        self.push_all(rows, keys);
        Ok(())
    }

    /// Append `rows` after the current window.
    ///
    /// # Errors
    /// Returns `DriverError::OutOfMemory` if the buffers cannot grow; the window is unchanged.
    pub(crate) fn append(
        &mut self,
        rows: Vec<Row>,
        keys: Vec<KeysetEntry>,
    ) -> Result<(), DriverError> {
        self.grow_to(self.rows.len() + rows.len())?;
        self.push_all(rows, keys);
        Ok(())
    }

    fn push_all(&mut self, rows: Vec<Row>, keys: Vec<KeysetEntry>) {
        self.rows.extend(rows);
        if let Some(keyset) = self.keyset.as_mut() {
            keyset.extend(keys);
            debug_assert_eq!(keyset.len(), self.rows.len());
        }
    }

    /// Drop every cached row and give the memory back.
    pub(crate) fn release(&mut self) {
        self.rows = Vec::new();
        if let Some(keyset) = self.keyset.as_mut() {
            *keyset = Vec::new();
        }
    }
}

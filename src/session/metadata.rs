use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::types::ColumnDescriptor;

/// Default number of tables kept before unreferenced entries are evicted.
pub(crate) const DEFAULT_METADATA_CAPACITY: usize = 32;

/// Column layout of one table, as cached by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            columns,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// `schema.name`, or just `name` without a schema.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug)]
struct CachedTable {
    info: Arc<TableInfo>,
    last_access: DateTime<Utc>,
    // breaks ties between accesses within one clock tick
    touched: u64,
}

/// Table metadata shared with callers through `Arc`; entries a caller still holds are never
/// evicted.
#[derive(Debug)]
pub(crate) struct MetadataCache {
    entries: HashMap<String, CachedTable>,
    capacity: usize,
    clock: u64,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_CAPACITY)
    }
}

impl MetadataCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    pub(crate) fn get(&mut self, name: &str) -> Option<Arc<TableInfo>> {
        let touched = self.tick();
        let entry = self.entries.get_mut(name)?;
        entry.last_access = Utc::now();
        entry.touched = touched;
        Some(Arc::clone(&entry.info))
    }

    pub(crate) fn last_access(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries.get(name).map(|e| e.last_access)
    }

    pub(crate) fn insert(&mut self, info: TableInfo) -> Arc<TableInfo> {
        let key = info.qualified_name();
        let info = Arc::new(info);
        let touched = self.tick();
        self.entries.insert(
            key,
            CachedTable {
                info: Arc::clone(&info),
                last_access: Utc::now(),
                touched,
            },
        );
        while self.entries.len() > self.capacity && self.evict_one() {}
        info
    }

    /// Drop the least recently used entry nobody outside the cache references.
    fn evict_one(&mut self) -> bool {
        let victim = self
            .entries
            .iter()
            .filter(|(_, e)| Arc::strong_count(&e.info) == 1)
            .min_by_key(|(_, e)| (e.last_access, e.touched))
            .map(|(k, _)| k.clone());
        match victim {
            Some(key) => {
                tracing::trace!(table = %key, "evicting cached table metadata");
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(
                entries = self.entries.len(),
                "schema changed; dropping table metadata"
            );
        }
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableInfo {
        TableInfo::new(name, vec![ColumnDescriptor::new("id", 23)])
    }

    #[test]
    fn evicts_least_recently_used_unreferenced() {
        let mut cache = MetadataCache::new(2);
        let held = cache.insert(table("a"));
        drop(cache.insert(table("b")));
        assert!(cache.get("b").is_some());
        drop(cache.insert(table("c")));
        // "a" is older but still referenced, so "b" goes
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        drop(held);
    }

    #[test]
    fn referenced_entries_let_the_cache_grow() {
        let mut cache = MetadataCache::new(1);
        let a = cache.insert(table("a"));
        let b = cache.insert(table("b"));
        assert_eq!(cache.len(), 2);
        assert_eq!(Arc::strong_count(&a), 2);
        drop((a, b));
    }

    #[test]
    fn schema_qualified_keys() {
        let mut cache = MetadataCache::default();
        cache.insert(table("t").with_schema("public"));
        assert!(cache.get("public.t").is_some());
        assert!(cache.last_access("public.t").is_some());
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}

//! Entry store collaborators and their in-memory implementations.
//!
//! 条目存储协作者及其内存实现。

use crate::protocol::{Entry, EntryId};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::{collections::VecDeque, fmt, sync::Arc};

/// A newest-first collection of entries.
///
/// 按最新优先排列的条目集合。
pub trait EntryStore: Send + Sync + fmt::Debug {
    fn contains(&self, id: &EntryId) -> bool;

    /// Puts `entry` at the front.
    fn prepend(&self, entry: Entry);

    /// Removes the entry with `id`. Returns whether one was present.
    fn remove(&self, id: &EntryId) -> bool;

    /// Applies `apply` to the entry with `id`. Returns whether one was present.
    fn update(&self, id: &EntryId, apply: &mut dyn FnMut(&mut Entry)) -> bool;

    fn entries(&self) -> Vec<Entry>;

    /// Prepends `entry` unless an entry with the same id exists. Returns
    /// whether it was inserted.
    ///
    /// 若不存在相同 id 的条目则前插 `entry`。返回是否已插入。
    fn insert_if_absent(&self, entry: Entry) -> bool {
        if self.contains(&entry.id) {
            return false;
        }
        self.prepend(entry);
        true
    }
}

/// Identifier of a named partition, e.g. a deck column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of named entry partitions.
///
/// 一组具名的条目分区。
pub trait ColumnEntryStore: Send + Sync + fmt::Debug {
    /// The partition for `column`, created empty on first use.
    fn column(&self, column: &ColumnId) -> Arc<dyn EntryStore>;
}

/// Bounded in-memory [`EntryStore`]. The oldest entries fall off the back.
///
/// 有界的内存 [`EntryStore`]。最旧的条目从尾部移除。
#[derive(Debug)]
pub struct MemoryEntryStore {
    entries: RwLock<VecDeque<Entry>>,
    max_entries: usize,
}

impl MemoryEntryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.read().iter().map(|e| e.id.clone()).collect()
    }

    fn push_front_bounded(&self, entries: &mut VecDeque<Entry>, entry: Entry) {
        entries.push_front(entry);
        entries.truncate(self.max_entries);
    }
}

impl EntryStore for MemoryEntryStore {
    fn contains(&self, id: &EntryId) -> bool {
        self.entries.read().iter().any(|e| &e.id == id)
    }

    fn prepend(&self, entry: Entry) {
        let mut entries = self.entries.write();
        self.push_front_bounded(&mut entries, entry);
    }

    fn remove(&self, id: &EntryId) -> bool {
        let mut entries = self.entries.write();
        match entries.iter().position(|e| &e.id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn update(&self, id: &EntryId, apply: &mut dyn FnMut(&mut Entry)) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                apply(entry);
                true
            }
            None => false,
        }
    }

    fn entries(&self) -> Vec<Entry> {
        self.entries.read().iter().cloned().collect()
    }

    fn insert_if_absent(&self, entry: Entry) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.id == entry.id) {
            return false;
        }
        self.push_front_bounded(&mut entries, entry);
        true
    }
}

/// In-memory [`ColumnEntryStore`] backed by a concurrent map.
///
/// 基于并发映射的内存 [`ColumnEntryStore`]。
#[derive(Debug)]
pub struct MemoryColumnStore {
    columns: DashMap<ColumnId, Arc<MemoryEntryStore>>,
    max_entries: usize,
}

impl MemoryColumnStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            columns: DashMap::new(),
            max_entries,
        }
    }

    /// The typed partition for `column`, if it was ever used.
    pub fn get(&self, column: &ColumnId) -> Option<Arc<MemoryEntryStore>> {
        self.columns.get(column).map(|c| Arc::clone(c.value()))
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.key().clone()).collect()
    }
}

impl ColumnEntryStore for MemoryColumnStore {
    fn column(&self, column: &ColumnId) -> Arc<dyn EntryStore> {
        let entry = self
            .columns
            .entry(column.clone())
            .or_insert_with(|| Arc::new(MemoryEntryStore::new(self.max_entries)));
        Arc::clone(entry.value()) as Arc<dyn EntryStore>
    }
}

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A watched process and the topic values to publish when it starts and stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    /// Process name as reported by the OS (e.g. "obs64.exe").
    pub name: String,
    pub topic: String,
    /// Published on `topic` when the process starts running.
    pub value: String,
    /// Published on `topic` when the process stops running.
    pub off_value: String,
}

/// Removes the entry at a position from the collection that owns it.
pub trait EntryRemover: Send + Sync {
    fn remove_entry(&self, index: usize);
}

impl<F> EntryRemover for F
where
    F: Fn(usize) + Send + Sync,
{
    fn remove_entry(&self, index: usize) {
        self(index)
    }
}

/// Capability to delete one entry, handed to the list UI alongside the entry.
///
/// Consumed by [`invoke`](DeleteEntry::invoke), so each capability fires at most once.
pub struct DeleteEntry {
    index: usize,
    remover: Arc<dyn EntryRemover>,
}

impl DeleteEntry {
    pub fn new(index: usize, remover: Arc<dyn EntryRemover>) -> Self {
        Self { index, remover }
    }

    /// Position this capability removes.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn invoke(self) {
        self.remover.remove_entry(self.index);
    }
}

impl fmt::Debug for DeleteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteEntry").field("index", &self.index).finish_non_exhaustive()
    }
}

/// A [`ProcessEntry`] as shown in an editable list, tagged with its position.
///
/// Nothing checks that `index` still matches the entry's position in the
/// owning collection; whoever builds the record is responsible for that.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEntry {
    pub index: usize,
    pub name: String,
    pub topic: String,
    pub value: String,
    pub off_value: String,
    #[serde(skip)]
    pub delete_entry: DeleteEntry,
}

impl IndexedEntry {
    pub fn new(index: usize, entry: ProcessEntry, remover: Arc<dyn EntryRemover>) -> Self {
        Self {
            index,
            name: entry.name,
            topic: entry.topic,
            value: entry.value,
            off_value: entry.off_value,
            delete_entry: DeleteEntry::new(index, remover),
        }
    }

    /// Drops the record and asks the owner to remove its entry.
    pub fn delete(self) {
        self.delete_entry.invoke();
    }
}

/// Ordered list of configured process entries, each paired with its current
/// running flag.
///
/// Position matters: the flags returned by [`EntryList::running_flags`] line up
/// index-for-index with [`EntryList::entries`], which is what the
/// `running_states` payload relies on.
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entry::{EntryRemover, IndexedEntry, ProcessEntry};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry index {index} out of range (list has {len} entries)")]
    IndexOutOfRange { index: usize, len: usize },
}

/// One edit to the list, as sent by an editor on `entry_commands`.
///
/// Wire form is internally tagged, e.g. `{"command":"remove","index":2}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum EntryCommand {
    Add,
    Update { index: usize, entry: ProcessEntry },
    Remove { index: usize },
}

/// A topic value to publish because an entry changed running state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    pub topic: String,
    pub payload: String,
    pub running: bool,
}

#[derive(Debug, Clone)]
struct Tracked {
    entry: ProcessEntry,
    running: bool,
}

#[derive(Debug, Default)]
pub struct EntryList {
    items: Vec<Tracked>,
    /// Entries as last loaded from config; edits do not touch it.
    baseline: Vec<ProcessEntry>,
}

impl EntryList {
    pub fn new(entries: Vec<ProcessEntry>) -> Self {
        Self {
            baseline: entries.clone(),
            items: entries
                .into_iter()
                .map(|entry| Tracked { entry, running: false })
                .collect(),
        }
    }

    pub fn entries(&self) -> Vec<ProcessEntry> {
        self.items.iter().map(|t| t.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends an empty, not-running entry for the user to fill in.
    pub fn add_blank(&mut self) {
        self.items.push(Tracked {
            entry: ProcessEntry::default(),
            running: false,
        });
    }

    /// Overwrites the entry at `index`, keeping its running flag.
    pub fn update(&mut self, index: usize, entry: ProcessEntry) -> Result<(), EntryError> {
        let len = self.items.len();
        let slot = self
            .items
            .get_mut(index)
            .ok_or(EntryError::IndexOutOfRange { index, len })?;
        slot.entry = entry;
        Ok(())
    }

    /// Removes the entry at `index`; later entries (and their flags) shift down.
    pub fn remove(&mut self, index: usize) -> Result<ProcessEntry, EntryError> {
        if index >= self.items.len() {
            return Err(EntryError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }
        Ok(self.items.remove(index).entry)
    }

    /// Swaps in a freshly loaded list.  An entry keeps its running flag only if
    /// the identical entry occupied the same index before.
    pub fn replace_all(&mut self, entries: Vec<ProcessEntry>) {
        let items = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let running = self
                    .items
                    .get(i)
                    .is_some_and(|old| old.running && old.entry == entry);
                Tracked { entry, running }
            })
            .collect();
        self.items = items;
    }

    /// Takes the entries of a reloaded config file.
    ///
    /// When they equal the previously loaded entries the file did not change
    /// the list, so in-memory edits are kept and `false` is returned.
    /// Otherwise the file wins: the list is replaced and `true` is returned.
    pub fn reload(&mut self, entries: Vec<ProcessEntry>) -> bool {
        if entries == self.baseline {
            return false;
        }
        self.baseline = entries.clone();
        self.replace_all(entries);
        true
    }

    pub fn apply(&mut self, command: EntryCommand) -> Result<(), EntryError> {
        match command {
            EntryCommand::Add => self.add_blank(),
            EntryCommand::Update { index, entry } => self.update(index, entry)?,
            EntryCommand::Remove { index } => {
                self.remove(index)?;
            }
        }
        Ok(())
    }

    /// Builds the records an editable list displays, each carrying a delete
    /// capability bound to its current index.
    pub fn indexed(&self, remover: Arc<dyn EntryRemover>) -> Vec<IndexedEntry> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, t)| IndexedEntry::new(i, t.entry.clone(), Arc::clone(&remover)))
            .collect()
    }

    pub fn running_flags(&self) -> Vec<bool> {
        self.items.iter().map(|t| t.running).collect()
    }

    /// Names of entries currently flagged as running.
    pub fn running_names(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|t| t.running)
            .map(|t| t.entry.name.clone())
            .collect()
    }

    /// Updates every flag from `running` (lowercased process names) and returns
    /// one [`Toggle`] per entry whose flag changed, in list order.
    pub fn refresh(&mut self, running: &HashSet<String>) -> Vec<Toggle> {
        let mut toggles = Vec::new();
        for item in &mut self.items {
            let now = !item.entry.name.is_empty()
                && running.contains(&item.entry.name.to_lowercase());
            if now == item.running {
                continue;
            }
            item.running = now;
            let payload = if now {
                item.entry.value.clone()
            } else {
                item.entry.off_value.clone()
            };
            toggles.push(Toggle {
                topic: item.entry.topic.clone(),
                payload,
                running: now,
            });
        }
        toggles
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::entry_list::EntryList;
use crate::mirror::RunningStates;

/// Whether the daemon's mirror is currently attached to `running_states`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum MirrorState {
    Attached,
    Detached,
}

/// Snapshot written by the daemon to `<app data dir>/status.toml`.
/// The GUI reads this file (read-only) to display which entries are running.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: MirrorState,
    /// Last mirrored `running_states` payload, one flag per configured entry.
    pub running_states: Vec<bool>,
    /// Names of entries whose flag is set, in entry order.
    pub running_entries: Vec<String>,
    /// RFC 3339 timestamp of when this snapshot was taken.
    pub updated_at: String,
}

impl DaemonStatus {
    /// Constructs the initial detached status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: MirrorState::Detached,
            running_states: Vec::new(),
            running_entries: Vec::new(),
            updated_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// Builds an attached status from a mirrored snapshot.  Flags are matched to
    /// entry names by position; flags beyond the end of the list are ignored.
    pub fn observed(flags: Vec<bool>, names: &[String]) -> Self {
        let running_entries = flags
            .iter()
            .zip(names)
            .filter(|(running, _)| **running)
            .map(|(_, name)| name.clone())
            .collect();
        Self {
            state: MirrorState::Attached,
            running_states: flags,
            running_entries,
            ..Self::new()
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors rather than panicking; a status write failure never stops the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            error!(dir = %parent.display(), "Failed to create status directory: {e}");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                error!("Failed to write status file: {e}");
            }
        }
        Err(e) => error!("Failed to serialize status: {e}"),
    }
}

/// Observes `states` and rewrites the status file with the current snapshot,
/// then again on every change, until the cell's last writer is dropped.
pub async fn watch_states(path: PathBuf, states: RunningStates, entries: Arc<RwLock<EntryList>>) {
    let mut rx = states.subscribe();
    drop(states);
    loop {
        let flags = rx.borrow_and_update().clone();
        let names: Vec<String> = entries
            .read()
            .await
            .entries()
            .into_iter()
            .map(|e| e.name)
            .collect();
        trace!(?flags, "Writing status snapshot");
        write_status(&path, &DaemonStatus::observed(flags, &names));

        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Stops the observer `task` and writes the final detached snapshot.
///
/// The task is awaited before writing, so a snapshot it was still writing
/// cannot land after the detached one.
pub async fn finish(task: JoinHandle<()>, path: &Path, flags: Vec<bool>) {
    task.abort();
    if let Err(e) = task.await {
        if !e.is_cancelled() {
            debug!("Status observer ended abnormally: {e}");
        }
    }
    write_status(path, &DaemonStatus {
        running_states: flags,
        ..DaemonStatus::new()
    });
}

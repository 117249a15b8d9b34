/// Entry editing for a presentation layer.
///
/// Edits arrive as [`EntryCommand`] JSON on the `entry_commands` bus channel,
/// or through the delete capability on an [`IndexedEntry`](crate::entry::IndexedEntry).
/// Both paths feed one unbounded queue drained by the task that owns the
/// [`EntryList`].  After each applied edit the list is re-sent on
/// `process_entries` and the flags on `running_states`, so observers do not
/// wait for the next monitor tick.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::bus::{BusError, EventBus, PROCESS_ENTRIES, RUNNING_STATES};
use crate::entry::EntryRemover;
use crate::entry_list::{EntryCommand, EntryError, EntryList};

/// Sending half of the edit queue.  Doubles as the delete capability's remover.
#[derive(Clone)]
pub struct EntryCommands(mpsc::UnboundedSender<EntryCommand>);

impl EntryCommands {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EntryCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Queues `command`.  Only fails once the receiving side is gone.
    pub fn send(&self, command: EntryCommand) -> bool {
        match self.0.send(command) {
            Ok(()) => true,
            Err(e) => {
                debug!(command = ?e.0, "Entry command dropped; editor is gone");
                false
            }
        }
    }
}

impl EntryRemover for EntryCommands {
    fn remove_entry(&self, index: usize) {
        self.send(EntryCommand::Remove { index });
    }
}

/// Decodes payloads from `entry_commands` onto the queue until the channel
/// closes or the queue's receiver is dropped.
pub async fn forward_commands(
    mut rx: broadcast::Receiver<serde_json::Value>,
    commands: EntryCommands,
) {
    loop {
        match rx.recv().await {
            Ok(payload) => match serde_json::from_value::<EntryCommand>(payload) {
                Ok(command) => {
                    if !commands.send(command) {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring malformed entry command: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Entry command listener lagged; commands lost");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("entry_commands channel closed");
                break;
            }
        }
    }
}

/// Applies one edit, then publishes the resulting list and flags.
pub async fn apply_command(
    entries: &RwLock<EntryList>,
    bus: &EventBus,
    remover: Arc<dyn EntryRemover>,
    command: EntryCommand,
) -> Result<(), EntryError> {
    let mut list = entries.write().await;
    let summary = format!("{command:?}");
    list.apply(command)?;
    info!(command = %summary, entries = list.len(), "Entry list edited");
    if let Err(e) = publish_entries(&list, bus, remover) {
        debug!("Entry list not published: {e}");
    }
    Ok(())
}

/// Sends the indexed records on `process_entries` and the running flags on
/// `running_states`.
pub fn publish_entries(
    list: &EntryList,
    bus: &EventBus,
    remover: Arc<dyn EntryRemover>,
) -> Result<(), BusError> {
    bus.emit(PROCESS_ENTRIES, &list.indexed(remover))?;
    bus.emit(RUNNING_STATES, &list.running_flags())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ENTRY_COMMANDS;
    use crate::entry::ProcessEntry;
    use serde_json::json;
    use std::collections::HashSet;
    use tokio::time::{timeout, Duration};

    fn entry(name: &str) -> ProcessEntry {
        ProcessEntry {
            name: name.to_string(),
            topic: format!("home/{name}"),
            value: "ON".to_string(),
            off_value: "OFF".to_string(),
        }
    }

    fn list(names: &[&str]) -> RwLock<EntryList> {
        RwLock::new(EntryList::new(names.iter().map(|n| entry(n)).collect()))
    }

    // ── EntryCommands ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_capability_queues_remove_command() {
        let (commands, mut rx) = EntryCommands::channel();
        let list = EntryList::new(vec![entry("a"), entry("b")]);
        let mut records = list.indexed(Arc::new(commands));

        records.remove(1).delete();

        assert_eq!(rx.recv().await, Some(EntryCommand::Remove { index: 1 }));
    }

    #[tokio::test]
    async fn removals_are_not_dropped_while_the_owner_is_busy() {
        let (commands, mut rx) = EntryCommands::channel();
        let list = EntryList::new((0..500).map(|i| entry(&i.to_string())).collect());

        // Nothing drains the queue while every record is deleted.
        for record in list.indexed(Arc::new(commands)) {
            record.delete();
        }

        let mut seen = Vec::new();
        while let Ok(EntryCommand::Remove { index }) = rx.try_recv() {
            seen.push(index);
        }
        assert_eq!(seen, (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn send_after_receiver_dropped_reports_failure() {
        let (commands, rx) = EntryCommands::channel();
        drop(rx);
        assert!(!commands.send(EntryCommand::Add));
    }

    // ── forward_commands ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn bus_commands_reach_the_queue() {
        let bus = EventBus::new();
        let (commands, mut rx) = EntryCommands::channel();
        let task = tokio::spawn(forward_commands(bus.listen(ENTRY_COMMANDS).unwrap(), commands));

        bus.emit(ENTRY_COMMANDS, &json!({ "command": "nonsense" })).unwrap();
        bus.emit(ENTRY_COMMANDS, &json!({ "command": "remove", "index": 0 })).unwrap();

        let received = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(received, Some(EntryCommand::Remove { index: 0 }));

        bus.close();
        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    // ── apply_command ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn remove_publishes_flags_immediately() {
        let bus = EventBus::new();
        let entries = list(&["a", "b", "c"]);
        let running: HashSet<String> = ["c".to_string()].into();
        entries.write().await.refresh(&running);
        let mut states = bus.listen(RUNNING_STATES).unwrap();
        let mut records = bus.listen(PROCESS_ENTRIES).unwrap();

        apply_command(&entries, &bus, Arc::new(|_: usize| {}), EntryCommand::Remove { index: 0 })
            .await
            .unwrap();

        assert_eq!(states.try_recv().unwrap(), json!([false, true]));
        let published = records.try_recv().unwrap();
        assert_eq!(published[0]["name"], "b");
        assert_eq!(published[1]["index"], 1);
        assert_eq!(published[1]["offValue"], "OFF");
    }

    #[tokio::test]
    async fn failed_command_publishes_nothing() {
        let bus = EventBus::new();
        let entries = list(&["a"]);
        let mut states = bus.listen(RUNNING_STATES).unwrap();

        let result = apply_command(
            &entries,
            &bus,
            Arc::new(|_: usize| {}),
            EntryCommand::Remove { index: 4 },
        )
        .await;

        assert_eq!(result, Err(EntryError::IndexOutOfRange { index: 4, len: 1 }));
        assert!(states.try_recv().is_err());
        assert_eq!(entries.read().await.len(), 1);
    }

    #[tokio::test]
    async fn edits_still_apply_after_bus_closes() {
        let bus = EventBus::new();
        bus.close();
        let entries = list(&[]);

        apply_command(&entries, &bus, Arc::new(|_: usize| {}), EntryCommand::Add)
            .await
            .unwrap();

        assert_eq!(entries.read().await.len(), 1);
    }
}

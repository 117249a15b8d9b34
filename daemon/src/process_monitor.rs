use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{BusError, EventBus, ENTRY_TOGGLED, RUNNING_PROCESSES, RUNNING_STATES};
use crate::entry_list::EntryList;

/// Polls the OS process list every `period` and publishes the result.
///
/// Each tick sends the sorted process names on `processes` when they differ
/// from the previous tick, refreshes the running flag of every entry, emits
/// one `entry_toggled` event per entry that started or stopped, then emits the
/// full flag list on `running_states`.  Returns once the bus is closed.
pub async fn run(entries: Arc<RwLock<EntryList>>, bus: Arc<EventBus>, period: Duration) {
    let mut sys = System::new();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_names = None;

    loop {
        ticker.tick().await;

        sys.refresh_processes(ProcessesToUpdate::All, true);
        let names = sorted_process_names(
            sys.processes()
                .values()
                .map(|p| p.name().to_string_lossy().into_owned()),
        );
        let running = lowercase_set(&names);

        let result = match publish_processes(&bus, names, &mut last_names) {
            Ok(()) => publish_tick(&entries, &bus, &running).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            match e {
                BusError::Unavailable => {
                    debug!("Event bus closed; process monitor exiting");
                    break;
                }
                BusError::Payload(e) => warn!("Failed to publish monitor tick: {e}"),
            }
        }
    }
}

/// Distinct process names ordered case-insensitively.  Names that differ only
/// in case keep a stable order by falling back to a byte comparison.
pub fn sorted_process_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names
        .into_iter()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    names.sort_by(|a, b| {
        a.to_lowercase()
            .cmp(&b.to_lowercase())
            .then_with(|| a.cmp(b))
    });
    names
}

fn lowercase_set(names: &[String]) -> HashSet<String> {
    names.iter().map(|n| n.to_lowercase()).collect()
}

/// Sends `names` on `processes` unless it matches what was last sent.
fn publish_processes(
    bus: &EventBus,
    names: Vec<String>,
    last: &mut Option<Vec<String>>,
) -> Result<(), BusError> {
    if last.as_ref() == Some(&names) {
        return Ok(());
    }
    bus.emit(RUNNING_PROCESSES, &names)?;
    *last = Some(names);
    Ok(())
}

/// One monitor tick against an already collected set of running names.
async fn publish_tick(
    entries: &RwLock<EntryList>,
    bus: &EventBus,
    running: &HashSet<String>,
) -> Result<(), BusError> {
    // Hold the write lock across both emits so the flags published match the
    // toggles just computed.
    let mut entries = entries.write().await;
    for toggle in entries.refresh(running) {
        info!(
            topic = %toggle.topic,
            payload = %toggle.payload,
            running = toggle.running,
            "Entry toggled"
        );
        bus.emit(ENTRY_TOGGLED, &toggle)?;
    }
    bus.emit(RUNNING_STATES, &entries.running_flags())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ProcessEntry;

    fn entries(names: &[&str]) -> Arc<RwLock<EntryList>> {
        Arc::new(RwLock::new(EntryList::new(
            names
                .iter()
                .map(|n| ProcessEntry {
                    name: n.to_string(),
                    topic: format!("home/{n}"),
                    value: "ON".to_string(),
                    off_value: "OFF".to_string(),
                })
                .collect(),
        )))
    }

    fn names(list: &[&str]) -> HashSet<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn tick_publishes_running_states() {
        let bus = EventBus::new();
        let list = entries(&["a", "b"]);
        let mut states = bus.listen(RUNNING_STATES).unwrap();

        publish_tick(&list, &bus, &names(&["b"])).await.unwrap();

        assert_eq!(states.recv().await.unwrap(), serde_json::json!([false, true]));
    }

    #[tokio::test]
    async fn tick_publishes_toggles_only_on_change() {
        let bus = EventBus::new();
        let list = entries(&["a"]);
        let mut toggles = bus.listen(ENTRY_TOGGLED).unwrap();

        publish_tick(&list, &bus, &names(&["a"])).await.unwrap();
        publish_tick(&list, &bus, &names(&["a"])).await.unwrap();
        publish_tick(&list, &bus, &names(&[])).await.unwrap();

        let on = toggles.recv().await.unwrap();
        assert_eq!(on["topic"], "home/a");
        assert_eq!(on["payload"], "ON");
        assert_eq!(on["running"], true);

        let off = toggles.recv().await.unwrap();
        assert_eq!(off["payload"], "OFF");
        assert_eq!(off["running"], false);

        assert!(toggles.try_recv().is_err());
    }

    #[tokio::test]
    async fn tick_on_closed_bus_is_unavailable() {
        let bus = EventBus::new();
        bus.close();
        let result = publish_tick(&entries(&["a"]), &bus, &names(&[])).await;
        assert!(matches!(result, Err(BusError::Unavailable)));
    }

    #[tokio::test]
    async fn run_exits_when_bus_closes() {
        let bus = Arc::new(EventBus::new());
        bus.close();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            run(entries(&[]), Arc::clone(&bus), Duration::from_millis(10)),
        )
        .await;
        assert!(result.is_ok());
    }

    // ── process list ──────────────────────────────────────────────────────────

    #[test]
    fn process_names_sort_case_insensitively() {
        let sorted = sorted_process_names(
            ["zsh", "Explorer.exe", "bash", "obs64.exe", "Bash", "explorer.exe", "zsh"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(
            sorted,
            vec!["Bash", "bash", "Explorer.exe", "explorer.exe", "obs64.exe", "zsh"]
        );
    }

    #[test]
    fn process_list_is_sent_only_when_it_changes() {
        let bus = EventBus::new();
        let mut rx = bus.listen(RUNNING_PROCESSES).unwrap();
        let mut last = None;

        let first = sorted_process_names(["b", "A"].into_iter().map(String::from));
        publish_processes(&bus, first.clone(), &mut last).unwrap();
        publish_processes(&bus, first, &mut last).unwrap();
        publish_processes(&bus, vec!["A".to_string()], &mut last).unwrap();

        assert_eq!(rx.try_recv().unwrap(), serde_json::json!(["A", "b"]));
        assert_eq!(rx.try_recv().unwrap(), serde_json::json!(["A"]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_first_process_list_is_still_sent() {
        let bus = EventBus::new();
        let mut rx = bus.listen(RUNNING_PROCESSES).unwrap();
        let mut last = None;
        publish_processes(&bus, Vec::new(), &mut last).unwrap();
        assert_eq!(rx.try_recv().unwrap(), serde_json::json!([]));
    }

    #[test]
    fn matching_set_is_lowercased() {
        let set = lowercase_set(&["OBS64.exe".to_string()]);
        assert!(set.contains("obs64.exe"));
    }
}

/// Running-state mirror: keeps a local copy of the latest `running_states`
/// snapshot published on the [`EventBus`].
///
/// [`RunningStates`] is the observable cell.  Any number of readers may hold a
/// clone of it, but only [`RunningStatesMirror`] writes to it.  The mirror owns
/// at most one [`Subscription`]; dropping the subscription (or the mirror)
/// ends delivery.
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{BusError, EventBus, RUNNING_STATES};

/// Observable sequence of running flags, index-correlated with the entry list.
#[derive(Clone)]
pub struct RunningStates {
    tx: Arc<watch::Sender<Vec<bool>>>,
}

impl RunningStates {
    /// Creates an empty cell.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { tx: Arc::new(tx) }
    }

    /// Returns a copy of the current snapshot.
    pub fn get(&self) -> Vec<bool> {
        self.tx.borrow().clone()
    }

    /// Returns a receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Vec<bool>> {
        self.tx.subscribe()
    }

    /// Replaces the whole snapshot and notifies every receiver.
    pub(crate) fn replace(&self, flags: Vec<bool>) {
        self.tx.send_replace(flags);
    }
}

impl Default for RunningStates {
    fn default() -> Self {
        Self::new()
    }
}

/// A live registration on the `running_states` channel.
///
/// The delivery task is aborted when the handle is dropped without
/// [`release`](Subscription::release).
pub struct Subscription {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Signals the delivery task to stop and waits for it to exit.
    async fn release(mut self) {
        let _ = self.stop_tx.send(true);
        let _ = (&mut self.handle).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct RunningStatesMirror {
    bus: Arc<EventBus>,
    states: RunningStates,
    subscription: Option<Subscription>,
}

impl RunningStatesMirror {
    pub fn new(bus: Arc<EventBus>, states: RunningStates) -> Self {
        Self {
            bus,
            states,
            subscription: None,
        }
    }

    /// Attaches to `running_states`.  Returns once the listener is registered,
    /// without waiting for a first payload.
    ///
    /// Calling this while already attached releases the previous subscription
    /// before registering the new one, so exactly one stays live.
    pub async fn start(&mut self) -> Result<(), BusError> {
        if let Some(previous) = self.subscription.take() {
            debug!("Re-attaching running_states mirror");
            previous.release().await;
        }

        let rx = self.bus.listen(RUNNING_STATES)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(deliver(rx, stop_rx, self.states.clone()));

        self.subscription = Some(Subscription { stop_tx, handle });
        debug!("Running-state mirror attached");
        Ok(())
    }

    /// Detaches from `running_states`.  No-op when detached.  The last observed
    /// snapshot is kept.
    pub async fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release().await;
            debug!("Running-state mirror detached");
        }
    }

    /// `true` while a delivery task is live.  A subscription whose task ended
    /// because the bus closed counts as detached.
    pub fn is_attached(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// The cell this mirror writes into.
    pub fn states(&self) -> &RunningStates {
        &self.states
    }
}

/// Applies every received payload to `states` until stopped or the channel closes.
async fn deliver(
    mut rx: broadcast::Receiver<serde_json::Value>,
    mut stop_rx: watch::Receiver<bool>,
    states: RunningStates,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            event = rx.recv() => match event {
                Ok(payload) => apply(&states, payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Mirror lagged behind running_states");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("running_states channel closed");
                    break;
                }
            },
        }
    }
}

fn apply(states: &RunningStates, payload: serde_json::Value) {
    match serde_json::from_value::<Vec<bool>>(payload) {
        Ok(flags) => states.replace(flags),
        Err(e) => warn!("Ignoring malformed running_states payload: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    fn setup() -> (Arc<EventBus>, RunningStatesMirror) {
        let bus = Arc::new(EventBus::new());
        let mirror = RunningStatesMirror::new(Arc::clone(&bus), RunningStates::new());
        (bus, mirror)
    }

    async fn next_change(rx: &mut watch::Receiver<Vec<bool>>) -> Vec<bool> {
        timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("no running_states update within 1s")
            .unwrap();
        rx.borrow_and_update().clone()
    }

    // ── RunningStates ─────────────────────────────────────────────────────────

    #[test]
    fn states_start_empty() {
        assert!(RunningStates::new().get().is_empty());
    }

    #[test]
    fn clones_share_the_same_cell() {
        let states = RunningStates::new();
        let reader = states.clone();
        states.replace(vec![true]);
        assert_eq!(reader.get(), vec![true]);
    }

    // ── delivery ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn payload_replaces_state() {
        let (bus, mut mirror) = setup();
        let mut rx = mirror.states().subscribe();
        mirror.start().await.unwrap();

        bus.emit(RUNNING_STATES, &vec![false, true]).unwrap();

        assert_eq!(next_change(&mut rx).await, vec![false, true]);
        assert_eq!(mirror.states().get(), vec![false, true]);
    }

    #[tokio::test]
    async fn shorter_snapshot_fully_replaces_longer_one() {
        let (bus, mut mirror) = setup();
        let mut rx = mirror.states().subscribe();
        assert!(mirror.states().get().is_empty());
        mirror.start().await.unwrap();

        bus.emit(RUNNING_STATES, &vec![true, false, true]).unwrap();
        assert_eq!(next_change(&mut rx).await, vec![true, false, true]);

        bus.emit(RUNNING_STATES, &vec![false]).unwrap();
        assert_eq!(next_change(&mut rx).await, vec![false]);
    }

    #[tokio::test]
    async fn malformed_payload_is_skipped() {
        let (bus, mut mirror) = setup();
        let mut rx = mirror.states().subscribe();
        mirror.start().await.unwrap();

        bus.emit(RUNNING_STATES, &json!({"not": "flags"})).unwrap();
        bus.emit(RUNNING_STATES, &vec![true]).unwrap();

        assert_eq!(next_change(&mut rx).await, vec![true]);
    }

    #[tokio::test]
    async fn every_reader_sees_the_snapshot() {
        let (bus, mut mirror) = setup();
        let mut a = mirror.states().subscribe();
        let mut b = mirror.states().subscribe();
        mirror.start().await.unwrap();

        bus.emit(RUNNING_STATES, &vec![true, true]).unwrap();

        assert_eq!(next_change(&mut a).await, vec![true, true]);
        assert_eq!(next_change(&mut b).await, vec![true, true]);
    }

    // ── start / stop ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_when_detached_is_a_noop() {
        let (_bus, mut mirror) = setup();
        mirror.states().replace(vec![true, false]);

        mirror.stop().await;

        assert!(!mirror.is_attached());
        assert_eq!(mirror.states().get(), vec![true, false]);
    }

    #[tokio::test]
    async fn start_then_stop_without_events_keeps_prior_state() {
        let (bus, mut mirror) = setup();
        mirror.states().replace(vec![true]);

        mirror.start().await.unwrap();
        mirror.stop().await;

        assert_eq!(mirror.states().get(), vec![true]);
        assert_eq!(bus.listener_count(RUNNING_STATES), 0);
    }

    #[tokio::test]
    async fn stop_keeps_last_snapshot_and_ignores_later_events() {
        let (bus, mut mirror) = setup();
        let mut rx = mirror.states().subscribe();
        mirror.start().await.unwrap();

        bus.emit(RUNNING_STATES, &vec![true, true]).unwrap();
        assert_eq!(next_change(&mut rx).await, vec![true, true]);

        mirror.stop().await;
        assert_eq!(bus.emit(RUNNING_STATES, &vec![false]).unwrap(), 0);
        assert_eq!(mirror.states().get(), vec![true, true]);
    }

    #[tokio::test]
    async fn double_start_keeps_exactly_one_listener() {
        let (bus, mut mirror) = setup();

        mirror.start().await.unwrap();
        mirror.start().await.unwrap();

        assert!(mirror.is_attached());
        assert_eq!(bus.listener_count(RUNNING_STATES), 1);

        mirror.stop().await;
        assert_eq!(bus.listener_count(RUNNING_STATES), 0);
    }

    #[tokio::test]
    async fn restarted_mirror_still_receives() {
        let (bus, mut mirror) = setup();
        let mut rx = mirror.states().subscribe();

        mirror.start().await.unwrap();
        mirror.stop().await;
        mirror.start().await.unwrap();

        bus.emit(RUNNING_STATES, &vec![false, false]).unwrap();
        assert_eq!(next_change(&mut rx).await, vec![false, false]);
    }

    #[tokio::test]
    async fn start_on_closed_bus_fails_and_stays_detached() {
        let (bus, mut mirror) = setup();
        bus.close();

        let result = mirror.start().await;

        assert!(matches!(result, Err(BusError::Unavailable)));
        assert!(!mirror.is_attached());
    }

    #[tokio::test]
    async fn closing_the_bus_detaches_the_mirror() {
        let (bus, mut mirror) = setup();
        mirror.start().await.unwrap();
        assert!(mirror.is_attached());

        bus.close();

        let mut detached = false;
        for _ in 0..100 {
            if !mirror.is_attached() {
                detached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(detached, "mirror still reports attached after bus close");
        assert_eq!(bus.listener_count(RUNNING_STATES), 0);

        // Stopping a mirror whose task already ended is still fine.
        mirror.stop().await;
        assert!(!mirror.is_attached());
    }
}

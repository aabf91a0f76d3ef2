//! In-memory handles for participants with a live session in this process.

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex as StdMutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    sync::{Mutex, MutexGuard, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::debug;

use crate::state::{SseHub, game::ParticipantId};

const SESSION_EVENTS_CAPACITY: usize = 32;

/// Per-participant coordination state.
///
/// The game gate serializes every write to the participant's session and
/// uploads. The poll gate guarantees a single scoring poll in flight; it is
/// only ever `try_lock`ed so overlapping polls are skipped, never queued.
pub struct SessionHandle {
    participant_id: ParticipantId,
    gate: Mutex<()>,
    poll_gate: Mutex<()>,
    pending: watch::Sender<BTreeSet<String>>,
    epoch: AtomicU64,
    events: SseHub,
    last_active: StdMutex<Instant>,
    reconciler: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn new(participant_id: ParticipantId, game_epoch: u64) -> Self {
        let (pending, _rx) = watch::channel(BTreeSet::new());
        Self {
            participant_id,
            gate: Mutex::new(()),
            poll_gate: Mutex::new(()),
            pending,
            epoch: AtomicU64::new(game_epoch),
            events: SseHub::new(SESSION_EVENTS_CAPACITY),
            last_active: StdMutex::new(Instant::now()),
            reconciler: StdMutex::new(None),
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Acquire the game gate; held across the whole read-modify-write of a transition.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Claim the poll slot, or `None` when a poll is already in flight.
    pub fn try_begin_poll(&self) -> Option<MutexGuard<'_, ()>> {
        self.poll_gate.try_lock().ok()
    }

    /// Current game epoch; changes on every reset.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Move to a new game epoch. Must be called with the game gate held.
    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    /// Storage names still waiting for a scoring record.
    pub fn pending(&self) -> BTreeSet<String> {
        self.pending.borrow().clone()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    /// Subscribe to pending set changes; used to wake the reconciler.
    pub fn watch_pending(&self) -> watch::Receiver<BTreeSet<String>> {
        self.pending.subscribe()
    }

    pub fn add_pending(&self, storage_name: impl Into<String>) {
        let storage_name = storage_name.into();
        self.pending.send_modify(|pending| {
            pending.insert(storage_name);
        });
    }

    /// Merge `storage_names` into the pending set, keeping names already tracked.
    pub fn extend_pending(&self, storage_names: impl IntoIterator<Item = String>) {
        let names: Vec<String> = storage_names.into_iter().collect();
        self.pending.send_if_modified(|pending| {
            let before = pending.len();
            pending.extend(names);
            pending.len() != before
        });
    }

    pub fn remove_pending<'a>(&self, storage_names: impl IntoIterator<Item = &'a str>) {
        let names: Vec<&str> = storage_names.into_iter().collect();
        self.pending.send_if_modified(|pending| {
            let before = pending.len();
            for name in &names {
                pending.remove(*name);
            }
            pending.len() != before
        });
    }

    /// Replace the whole pending set (bootstrap and reset).
    pub fn replace_pending(&self, storage_names: BTreeSet<String>) {
        self.pending.send_replace(storage_names);
    }

    /// Event hub feeding this participant's SSE stream.
    pub fn events(&self) -> &SseHub {
        &self.events
    }

    /// Record activity so the idle sweeper keeps the handle alive.
    pub fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = *self
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(last)
    }

    /// Bind the reconciler task to this handle, aborting any previous one.
    pub fn attach_reconciler(&self, task: JoinHandle<()>) {
        let previous = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    pub fn has_reconciler(&self) -> bool {
        self.reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Abort the reconciler; no poll is issued for this handle afterwards.
    pub fn shutdown(&self) {
        let task = self
            .reconciler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            debug!(participant = %self.participant_id, "reconciler stopped");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Registry of live session handles keyed by participant.
#[derive(Default)]
pub struct SessionRegistry {
    handles: DashMap<ParticipantId, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, participant_id: &ParticipantId) -> Option<Arc<SessionHandle>> {
        self.handles
            .get(participant_id)
            .map(|entry| entry.value().clone())
    }

    /// Return the existing handle or insert the one built by `create`.
    ///
    /// The boolean is `true` when a new handle was inserted.
    pub fn get_or_insert_with(
        &self,
        participant_id: &ParticipantId,
        create: impl FnOnce() -> SessionHandle,
    ) -> (Arc<SessionHandle>, bool) {
        let mut inserted = false;
        let handle = self
            .handles
            .entry(participant_id.clone())
            .or_insert_with(|| {
                inserted = true;
                Arc::new(create())
            })
            .value()
            .clone();
        (handle, inserted)
    }

    /// Remove and shut down a handle. Returns whether one existed.
    pub fn detach(&self, participant_id: &ParticipantId) -> bool {
        match self.handles.remove(participant_id) {
            Some((_, handle)) => {
                handle.shutdown();
                true
            }
            None => false,
        }
    }

    /// Shut down handles idle for longer than `timeout`, returning their ids.
    pub fn evict_idle(&self, timeout: Duration) -> Vec<ParticipantId> {
        let now = Instant::now();
        let idle: Vec<ParticipantId> = self
            .handles
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= timeout)
            .map(|entry| entry.key().clone())
            .collect();

        idle.into_iter()
            .filter(|participant_id| {
                self.handles
                    .remove_if(participant_id, |_, handle| handle.idle_for(now) >= timeout)
                    .map(|(_, handle)| handle.shutdown())
                    .is_some()
            })
            .collect()
    }

    pub fn shutdown_all(&self) {
        for entry in self.handles.iter() {
            entry.value().shutdown();
        }
        self.handles.clear();
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ParticipantId {
        ParticipantId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn overlapping_polls_are_refused() {
        let handle = SessionHandle::new(id("demo"), 0);
        let first = handle.try_begin_poll();
        assert!(first.is_some());
        assert!(handle.try_begin_poll().is_none());
        drop(first);
        assert!(handle.try_begin_poll().is_some());
    }

    #[tokio::test]
    async fn pending_changes_wake_watchers() {
        let handle = SessionHandle::new(id("demo"), 0);
        let mut rx = handle.watch_pending();
        handle.add_pending("1_a.png");
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().contains("1_a.png"));

        handle.remove_pending(["unknown"]);
        assert!(!rx.has_changed().unwrap());
        handle.remove_pending(["1_a.png"]);
        assert!(rx.has_changed().unwrap());
        assert!(!handle.has_pending());
    }

    #[tokio::test]
    async fn detaching_aborts_the_reconciler() {
        let registry = SessionRegistry::new();
        let (handle, inserted) =
            registry.get_or_insert_with(&id("demo"), || SessionHandle::new(id("demo"), 0));
        assert!(inserted);

        let task = tokio::spawn(std::future::pending::<()>());
        handle.attach_reconciler(task);
        assert!(handle.has_reconciler());

        assert!(registry.detach(&id("demo")));
        tokio::task::yield_now().await;
        assert!(!handle.has_reconciler());
        assert!(registry.get(&id("demo")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_handles_are_evicted() {
        let registry = SessionRegistry::new();
        registry.get_or_insert_with(&id("idle"), || SessionHandle::new(id("idle"), 0));
        tokio::time::advance(Duration::from_secs(30)).await;
        let (busy, _) =
            registry.get_or_insert_with(&id("busy"), || SessionHandle::new(id("busy"), 0));
        busy.touch();

        let evicted = registry.evict_idle(Duration::from_secs(20));
        assert_eq!(evicted, vec![id("idle")]);
        assert_eq!(registry.len(), 1);
    }
}

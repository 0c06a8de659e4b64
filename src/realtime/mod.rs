use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

use crate::models::{Poll, PollView};

/// Events an observer may have queued before it is considered too slow and
/// disconnected.
pub const OBSERVER_QUEUE_CAPACITY: usize = 256;

/// Events pushed to observers. Both carry the full poll, never a diff.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "poll")]
pub enum PollEvent {
    #[serde(rename = "pollCreated")]
    PollCreated(PollView),
    #[serde(rename = "voteUpdate")]
    PollVoteUpdated(PollView),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// A connected observer: its id for join/leave calls, and the queue its
/// events arrive on. Dropping `events` is treated as a severed connection,
/// and `events` ends once the router has disconnected the observer.
pub struct Observer {
    pub id: ObserverId,
    pub events: Receiver<PollEvent>,
}

#[derive(Default)]
struct RouterState {
    observers: HashMap<ObserverId, Sender<PollEvent>>,
    groups: HashMap<String, HashSet<ObserverId>>,
    memberships: HashMap<ObserverId, HashSet<String>>,
}

impl RouterState {
    fn remove_observer(&mut self, id: ObserverId) -> bool {
        let connected = self.observers.remove(&id).is_some();
        for poll_id in self.memberships.remove(&id).unwrap_or_default() {
            if let Some(group) = self.groups.get_mut(&poll_id) {
                group.remove(&id);
                if group.is_empty() {
                    self.groups.remove(&poll_id);
                }
            }
        }
        connected
    }
}

/// Interest-group registry and fan-out for live poll updates.
///
/// Each observer has its own bounded FIFO queue, so an update is never
/// reordered for a live observer. An observer whose queue fills up is
/// disconnected rather than silently skipped, so it never sees a gap.
/// Votes on one poll are broadcast from inside that poll's critical
/// section, which fixes their order at the source.
pub struct SubscriptionRouter {
    state: RwLock<RouterState>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Default for SubscriptionRouter {
    fn default() -> Self {
        Self::with_queue_capacity(OBSERVER_QUEUE_CAPACITY)
    }
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            state: RwLock::new(RouterState::default()),
            next_id: AtomicU64::new(0),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn connect(&self) -> Observer {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, events) = mpsc::channel(self.queue_capacity);
        self.state.write().observers.insert(id, sender);
        info!("{} connected", id);
        Observer { id, events }
    }

    /// Adds the observer to a poll's interest group. Returns `false` if the
    /// observer is not connected.
    pub fn join(&self, id: ObserverId, poll_id: &str) -> bool {
        let mut state = self.state.write();
        if !state.observers.contains_key(&id) {
            warn!("{} tried to join poll {} after disconnecting", id, poll_id);
            return false;
        }
        state
            .groups
            .entry(poll_id.to_string())
            .or_default()
            .insert(id);
        state
            .memberships
            .entry(id)
            .or_default()
            .insert(poll_id.to_string());
        debug!("{} joined poll {}", id, poll_id);
        true
    }

    pub fn leave(&self, id: ObserverId, poll_id: &str) {
        let mut state = self.state.write();
        if let Some(group) = state.groups.get_mut(poll_id) {
            group.remove(&id);
            if group.is_empty() {
                state.groups.remove(poll_id);
            }
        }
        if let Some(polls) = state.memberships.get_mut(&id) {
            polls.remove(poll_id);
            if polls.is_empty() {
                state.memberships.remove(&id);
            }
        }
        debug!("{} left poll {}", id, poll_id);
    }

    /// Removes the observer from every interest group it belonged to.
    pub fn disconnect(&self, id: ObserverId) {
        if self.state.write().remove_observer(id) {
            info!("{} disconnected", id);
        }
    }

    pub fn group_size(&self, poll_id: &str) -> usize {
        self.state
            .read()
            .groups
            .get(poll_id)
            .map_or(0, HashSet::len)
    }

    pub fn observer_count(&self) -> usize {
        self.state.read().observers.len()
    }

    #[cfg(test)]
    fn membership_count(&self) -> usize {
        self.state.read().memberships.len()
    }

    /// Sends the updated poll to its interest group. Returns how many
    /// observers it was delivered to.
    pub fn broadcast_vote_update(&self, poll: &Poll) -> usize {
        let event = PollEvent::PollVoteUpdated(poll.view());
        let (delivered, severed) = {
            let state = self.state.read();
            let members = state.groups.get(&poll.id).into_iter().flatten();
            Self::deliver(&state, members.copied(), &event)
        };
        self.prune(severed);
        delivered
    }

    /// Sends a new poll to every connected observer.
    pub fn broadcast_new_poll(&self, poll: &Poll) -> usize {
        let event = PollEvent::PollCreated(poll.view());
        let (delivered, severed) = {
            let state = self.state.read();
            Self::deliver(&state, state.observers.keys().copied(), &event)
        };
        self.prune(severed);
        delivered
    }

    fn deliver(
        state: &RouterState,
        targets: impl Iterator<Item = ObserverId>,
        event: &PollEvent,
    ) -> (usize, Vec<ObserverId>) {
        let mut delivered = 0;
        let mut severed = Vec::new();
        for id in targets {
            let Some(sender) = state.observers.get(&id) else {
                continue;
            };
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("{} is not keeping up with poll updates", id);
                    severed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Dropping event for {}: connection closed", id);
                    severed.push(id);
                }
            }
        }
        (delivered, severed)
    }

    fn prune(&self, severed: Vec<ObserverId>) {
        if severed.is_empty() {
            return;
        }
        let mut state = self.state.write();
        for id in severed {
            if state.remove_observer(id) {
                info!("{} disconnected by the router", id);
            }
        }
    }
}

use log::{debug, info, warn};
use std::collections::HashMap;
use std::panic;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ledger::VoteLedger;
use crate::db::PollRepository;
use crate::error::PollError;
use crate::models::{Poll, VoteEvent};

/// Applies votes to poll tallies, one vote per poll at a time.
///
/// Each poll gets its own async mutex for the duration of the
/// check-increment-persist sequence. Votes on different polls never share a
/// lock beyond the brief lookup in `locks`.
pub struct TallyEngine {
    state: Arc<TallyState>,
}

struct TallyState {
    repository: Arc<dyn PollRepository>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TallyEngine {
    pub fn new(repository: Arc<dyn PollRepository>) -> Self {
        Self {
            state: Arc::new(TallyState {
                repository,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Runs one vote to completion and returns the committed poll state.
    ///
    /// `on_commit` is called with the new state while the poll's lock is
    /// still held, so successive calls for one poll observe commits in order.
    /// It is not called when the vote is rejected or fails to persist.
    ///
    /// The vote runs on its own task: dropping the returned future does not
    /// stop a vote that has started, so a committed vote always reaches
    /// `on_commit` and the poll's lock is always released.
    pub async fn apply_vote<F>(&self, vote: &VoteEvent, on_commit: F) -> Result<Poll, PollError>
    where
        F: FnOnce(&Poll) + Send + 'static,
    {
        let state = self.state.clone();
        let vote = vote.clone();
        let task = tokio::spawn(async move { state.apply_serialized(&vote, on_commit).await });

        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
            Err(e) => Err(PollError::Interrupted(e.to_string())),
        }
    }

    #[cfg(test)]
    async fn tracked_polls(&self) -> usize {
        self.state.locks.lock().await.len()
    }
}

impl TallyState {
    async fn apply_serialized<F>(&self, vote: &VoteEvent, on_commit: F) -> Result<Poll, PollError>
    where
        F: FnOnce(&Poll),
    {
        let poll_lock = self.poll_lock(&vote.poll_id).await;
        let result = {
            let _guard = poll_lock.lock().await;
            self.apply_locked(vote).await.map(|poll| {
                on_commit(&poll);
                poll
            })
        };
        self.release(&vote.poll_id, poll_lock).await;
        result
    }

    async fn apply_locked(&self, vote: &VoteEvent) -> Result<Poll, PollError> {
        let mut poll = self
            .repository
            .fetch_poll(&vote.poll_id)
            .await?
            .ok_or_else(|| PollError::NotFound(vote.poll_id.clone()))?;

        if let Err(e) = VoteLedger::ensure_not_voted(&poll, &vote.voter_token) {
            debug!("Rejected duplicate vote on poll {}", poll.id);
            return Err(e);
        }

        let position = poll
            .option_position(vote.option_index)
            .ok_or(PollError::OutOfRange {
                index: vote.option_index,
                option_count: poll.options.len(),
            })?;

        poll.options[position].votes += 1;
        VoteLedger::record_vote(&mut poll, &vote.voter_token);

        if let Err(e) = self
            .repository
            .commit_vote(&poll.id, position, &vote.voter_token)
            .await
        {
            warn!("Failed to persist vote on poll {}: {}", poll.id, e);
            return Err(e);
        }

        info!(
            "Vote accepted on poll {} for option {} ({} total)",
            poll.id,
            position,
            poll.total_votes()
        );
        Ok(poll)
    }

    async fn poll_lock(&self, poll_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(poll_id.to_string()).or_default().clone()
    }

    // Drops the map entry once no other vote on this poll holds or awaits it.
    async fn release(&self, poll_id: &str, poll_lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(poll_lock);
        if locks
            .get(poll_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(poll_id);
        }
    }
}

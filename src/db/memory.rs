use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::PollRepository;
use crate::error::PollError;
use crate::models::Poll;

/// Process-local poll storage. Selected with `DATABASE_URL=memory`; nothing
/// survives a restart.
#[derive(Default)]
pub struct MemoryDatabase {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    polls: HashMap<String, Poll>,
    // Insertion order, used as the tie-break for equal creation times.
    order: Vec<String>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollRepository for MemoryDatabase {
    async fn insert_poll(&self, poll: &Poll) -> Result<(), PollError> {
        let mut state = self.state.write().await;
        state.order.push(poll.id.clone());
        state.polls.insert(poll.id.clone(), poll.clone());
        Ok(())
    }

    async fn fetch_poll(&self, poll_id: &str) -> Result<Option<Poll>, PollError> {
        Ok(self.state.read().await.polls.get(poll_id).cloned())
    }

    async fn fetch_all_polls(&self) -> Result<Vec<Poll>, PollError> {
        let state = self.state.read().await;
        let mut polls: Vec<Poll> = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.polls.get(id).cloned())
            .collect();
        // Stable sort keeps newer insertions ahead on ties.
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(polls)
    }

    async fn has_voter(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError> {
        let state = self.state.read().await;
        Ok(state
            .polls
            .get(poll_id)
            .is_some_and(|poll| poll.voters.iter().any(|token| token == voter_token)))
    }

    async fn commit_vote(
        &self,
        poll_id: &str,
        option_position: usize,
        voter_token: &str,
    ) -> Result<(), PollError> {
        let mut state = self.state.write().await;
        let poll = state
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| PollError::NotFound(poll_id.to_string()))?;

        if poll.voters.iter().any(|token| token == voter_token) {
            return Err(PollError::DuplicateVote(poll_id.to_string()));
        }
        let option_count = poll.options.len();
        let option = poll
            .options
            .get_mut(option_position)
            .ok_or(PollError::OutOfRange {
                index: option_position as i64,
                option_count,
            })?;

        option.votes += 1;
        poll.voters.push(voter_token.to_string());
        Ok(())
    }
}

use log::info;
use std::sync::Arc;

use crate::db::PollRepository;
use crate::error::PollError;
use crate::models::{NewPoll, Poll, VoteEvent};
use crate::voting::{TallyEngine, VoteLedger};

/// Owns the canonical poll records. Every tally change goes through
/// [`PollStore::apply_vote`], which hands off to the [`TallyEngine`].
pub struct PollStore {
    repository: Arc<dyn PollRepository>,
    ledger: VoteLedger,
    tally: TallyEngine,
}

impl PollStore {
    pub fn new(repository: Arc<dyn PollRepository>) -> Self {
        Self {
            ledger: VoteLedger::new(repository.clone()),
            tally: TallyEngine::new(repository.clone()),
            repository,
        }
    }

    pub async fn create(
        &self,
        question: &str,
        options: &[String],
        created_by: Option<&str>,
    ) -> Result<Poll, PollError> {
        let poll = Poll::new(NewPoll::parse(question, options, created_by)?);
        self.repository.insert_poll(&poll).await?;
        info!(
            "Created poll {} with {} options by {}",
            poll.id,
            poll.options.len(),
            poll.created_by
        );
        Ok(poll)
    }

    pub async fn get(&self, poll_id: &str) -> Result<Poll, PollError> {
        self.repository
            .fetch_poll(poll_id)
            .await?
            .ok_or_else(|| PollError::NotFound(poll_id.to_string()))
    }

    /// Newest first.
    pub async fn list_all(&self) -> Result<Vec<Poll>, PollError> {
        self.repository.fetch_all_polls().await
    }

    pub async fn has_voted(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError> {
        self.ledger.has_voted(poll_id, voter_token).await
    }

    /// Applies one vote through the [`TallyEngine`]. `on_commit` receives the
    /// committed state before the next vote on the same poll can start.
    pub async fn apply_vote<F>(
        &self,
        poll_id: &str,
        option_index: i64,
        voter_token: &str,
        on_commit: F,
    ) -> Result<Poll, PollError>
    where
        F: FnOnce(&Poll) + Send + 'static,
    {
        let vote = VoteEvent {
            poll_id: poll_id.to_string(),
            option_index,
            voter_token: voter_token.to_string(),
        };
        self.tally.apply_vote(&vote, on_commit).await
    }
}

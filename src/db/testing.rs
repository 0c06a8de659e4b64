use async_trait::async_trait;
use std::time::Duration;

use super::{MemoryDatabase, PollRepository};
use crate::error::PollError;
use crate::models::Poll;

/// Commits votes immediately but waits before acknowledging the write, like
/// a database whose COMMIT reply is slow to arrive.
pub struct SlowAckDatabase {
    inner: MemoryDatabase,
    ack_delay: Duration,
}

impl SlowAckDatabase {
    pub fn new(ack_delay: Duration) -> Self {
        Self {
            inner: MemoryDatabase::new(),
            ack_delay,
        }
    }
}

#[async_trait]
impl PollRepository for SlowAckDatabase {
    async fn insert_poll(&self, poll: &Poll) -> Result<(), PollError> {
        self.inner.insert_poll(poll).await
    }

    async fn fetch_poll(&self, poll_id: &str) -> Result<Option<Poll>, PollError> {
        self.inner.fetch_poll(poll_id).await
    }

    async fn fetch_all_polls(&self) -> Result<Vec<Poll>, PollError> {
        self.inner.fetch_all_polls().await
    }

    async fn has_voter(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError> {
        self.inner.has_voter(poll_id, voter_token).await
    }

    async fn commit_vote(
        &self,
        poll_id: &str,
        option_position: usize,
        voter_token: &str,
    ) -> Result<(), PollError> {
        self.inner
            .commit_vote(poll_id, option_position, voter_token)
            .await?;
        tokio::time::sleep(self.ack_delay).await;
        Ok(())
    }
}

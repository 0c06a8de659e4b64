use std::sync::Arc;

use crate::db::PollRepository;
use crate::error::PollError;
use crate::models::Poll;

/// Per-poll record of which voter tokens have already voted.
///
/// The voter set lives inside each [`Poll`]; this type owns the rules for
/// reading and extending it. Tokens compare by exact string equality.
#[derive(Clone)]
pub struct VoteLedger {
    repository: Arc<dyn PollRepository>,
}

impl VoteLedger {
    pub fn new(repository: Arc<dyn PollRepository>) -> Self {
        Self { repository }
    }

    /// Unknown polls have no voters, so this returns `false` for them.
    pub async fn has_voted(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError> {
        self.repository.has_voter(poll_id, voter_token).await
    }

    pub fn contains(poll: &Poll, voter_token: &str) -> bool {
        poll.voters.iter().any(|token| token == voter_token)
    }

    pub fn ensure_not_voted(poll: &Poll, voter_token: &str) -> Result<(), PollError> {
        if Self::contains(poll, voter_token) {
            return Err(PollError::DuplicateVote(poll.id.clone()));
        }
        Ok(())
    }

    /// Appends the token to the poll's voter set. Callers must have checked
    /// [`VoteLedger::ensure_not_voted`] inside the same critical section.
    pub fn record_vote(poll: &mut Poll, voter_token: &str) {
        debug_assert!(!Self::contains(poll, voter_token));
        poll.voters.push(voter_token.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::models::NewPoll;

    fn sample_poll() -> Poll {
        let options = vec!["A".to_string(), "B".to_string()];
        Poll::new(NewPoll::parse("Q?", &options, None).expect("valid poll"))
    }

    #[test]
    fn membership_is_exact_match() {
        let mut poll = sample_poll();
        VoteLedger::record_vote(&mut poll, "voter-1");

        assert!(VoteLedger::contains(&poll, "voter-1"));
        assert!(!VoteLedger::contains(&poll, "Voter-1"));
        assert!(!VoteLedger::contains(&poll, "voter-1 "));
        assert!(matches!(
            VoteLedger::ensure_not_voted(&poll, "voter-1"),
            Err(PollError::DuplicateVote(_))
        ));
        assert!(VoteLedger::ensure_not_voted(&poll, "voter-2").is_ok());
    }

    #[tokio::test]
    async fn has_voted_reads_committed_votes() {
        let repository = Arc::new(MemoryDatabase::new());
        let poll = sample_poll();
        repository.insert_poll(&poll).await.expect("insert");
        let ledger = VoteLedger::new(repository.clone());

        assert!(!ledger.has_voted(&poll.id, "v1").await.expect("ledger"));
        repository.commit_vote(&poll.id, 0, "v1").await.expect("vote");
        assert!(ledger.has_voted(&poll.id, "v1").await.expect("ledger"));
        assert!(!ledger.has_voted("unknown", "v1").await.expect("ledger"));
    }
}

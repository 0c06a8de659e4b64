use thiserror::Error;

/// Everything that can go wrong while creating, reading or voting on a poll.
///
/// `DuplicateVote` is an expected outcome rather than a fault; callers should
/// match on it instead of treating it like `Storage`.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("invalid poll: {0}")]
    Validation(String),

    #[error("poll {0} not found")]
    NotFound(String),

    #[error("option index {index} is out of range for a poll with {option_count} options")]
    OutOfRange { index: i64, option_count: usize },

    #[error("voter has already voted on poll {0}")]
    DuplicateVote(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("vote task stopped before finishing: {0}")]
    Interrupted(String),
}

impl PollError {
    pub fn is_storage(&self) -> bool {
        matches!(self, PollError::Storage(_))
    }
}

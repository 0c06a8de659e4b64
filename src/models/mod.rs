use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PollError;

pub const ANONYMOUS_CREATOR: &str = "Anonymous";
pub const MIN_OPTIONS: usize = 2;

/// Canonical poll record, including the voter set.
///
/// This is the persisted/interchange representation. Observers and HTTP
/// callers get a [`PollView`] instead, which leaves the voter tokens out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub voters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: u64,
}

/// A single vote request as it arrives from a caller. The option index is
/// signed so that negative indices can be rejected as out of range rather
/// than failing to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteEvent {
    pub poll_id: String,
    pub option_index: i64,
    pub voter_token: String,
}

/// Validated, trimmed input for poll creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoll {
    pub question: String,
    pub options: Vec<String>,
    pub created_by: String,
}

impl NewPoll {
    pub fn parse(
        question: &str,
        options: &[String],
        created_by: Option<&str>,
    ) -> Result<Self, PollError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PollError::Validation("poll question is required".to_string()));
        }

        let options: Vec<String> = options
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .collect();
        if options.len() < MIN_OPTIONS {
            return Err(PollError::Validation(format!(
                "at least {} non-empty options are required",
                MIN_OPTIONS
            )));
        }

        let created_by = created_by
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .unwrap_or(ANONYMOUS_CREATOR)
            .to_string();

        Ok(Self {
            question: question.to_string(),
            options,
            created_by,
        })
    }
}

impl Poll {
    pub fn new(new_poll: NewPoll) -> Self {
        // Stored timestamps keep microseconds; trimming here keeps a freshly
        // created poll equal to the one read back.
        let now = Utc::now().trunc_subsecs(6);

        let options = new_poll
            .options
            .into_iter()
            .map(|text| PollOption { text, votes: 0 })
            .collect();

        Self {
            id: Uuid::new_v4().to_string(),
            question: new_poll.question,
            options,
            created_by: new_poll.created_by,
            created_at: now,
            voters: Vec::new(),
        }
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|option| option.votes).sum()
    }

    /// Maps a caller-supplied index onto `options`, if it is in bounds.
    pub fn option_position(&self, index: i64) -> Option<usize> {
        usize::try_from(index)
            .ok()
            .filter(|position| *position < self.options.len())
    }

    pub fn view(&self) -> PollView {
        PollView::from(self)
    }
}

/// What observers and HTTP callers see of a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub total_votes: u64,
}

impl From<&Poll> for PollView {
    fn from(poll: &Poll) -> Self {
        Self {
            id: poll.id.clone(),
            question: poll.question.clone(),
            options: poll.options.clone(),
            created_by: poll.created_by.clone(),
            created_at: poll.created_at,
            total_votes: poll.total_votes(),
        }
    }
}

mod memory;
#[cfg(test)]
pub mod testing;

pub use memory::MemoryDatabase;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, info};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row,
};
use std::str::FromStr;

use crate::error::PollError;
use crate::models::{Poll, PollOption};

/// Durable keyed storage for poll records.
///
/// `commit_vote` must increment the option counter and record the voter as a
/// single atomic write: after an error, neither change may be visible.
#[async_trait]
pub trait PollRepository: Send + Sync {
    async fn insert_poll(&self, poll: &Poll) -> Result<(), PollError>;

    async fn fetch_poll(&self, poll_id: &str) -> Result<Option<Poll>, PollError>;

    /// All polls, newest first.
    async fn fetch_all_polls(&self) -> Result<Vec<Poll>, PollError>;

    async fn has_voter(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError>;

    async fn commit_vote(
        &self,
        poll_id: &str,
        option_position: usize,
        voter_token: &str,
    ) -> Result<(), PollError>;
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PollError> {
        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` opens its own empty database,
        // so an in-memory pool must hold on to exactly one.
        let in_memory = database_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory {
            1
        } else {
            max_connections
        });
        if in_memory {
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }

        let pool = pool_options.connect_with(connect_options).await?;

        Self::init_schema(&pool).await?;
        info!("Connected to poll database at {}", database_url);

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), PollError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS polls (
                id TEXT PRIMARY KEY,
                question TEXT NOT NULL,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_options (
                poll_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                votes INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0),
                PRIMARY KEY (poll_id, position),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_voters (
                poll_id TEXT NOT NULL,
                voter_token TEXT NOT NULL,
                option_position INTEGER NOT NULL,
                voted_at TEXT NOT NULL,
                PRIMARY KEY (poll_id, voter_token),
                FOREIGN KEY (poll_id) REFERENCES polls(id) ON DELETE CASCADE
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

/// Loads the options and voters of `poll_row`. Callers run this inside the
/// same transaction as the poll lookup so the counters and the voter list
/// come from one snapshot.
async fn load_details(conn: &mut SqliteConnection, poll_row: SqliteRow) -> Result<Poll, PollError> {
    let id: String = poll_row.try_get("id")?;
    let created_at_str: String = poll_row.try_get("created_at")?;

    let options = sqlx::query(
        r#"
        SELECT text, votes
        FROM poll_options
        WHERE poll_id = ?
        ORDER BY position
        "#,
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| {
        Ok(PollOption {
            text: row.try_get("text")?,
            votes: row.try_get::<i64, _>("votes")? as u64,
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let voters = sqlx::query(
        r#"
        SELECT voter_token
        FROM poll_voters
        WHERE poll_id = ?
        ORDER BY rowid
        "#,
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|row| row.try_get("voter_token"))
    .collect::<Result<Vec<String>, sqlx::Error>>()?;

    Ok(Poll {
        question: poll_row.try_get("question")?,
        created_by: poll_row.try_get("created_by")?,
        created_at: parse_timestamp(&created_at_str)?,
        id,
        options,
        voters,
    })
}

#[async_trait]
impl PollRepository for Database {
    async fn insert_poll(&self, poll: &Poll) -> Result<(), PollError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO polls (id, question, created_by, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&poll.id)
        .bind(&poll.question)
        .bind(&poll.created_by)
        .bind(format_timestamp(&poll.created_at))
        .execute(&mut *tx)
        .await?;

        for (position, option) in poll.options.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO poll_options (poll_id, position, text, votes)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&poll.id)
            .bind(position as i64)
            .bind(&option.text)
            .bind(option.votes as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_poll(&self, poll_id: &str) -> Result<Option<Poll>, PollError> {
        let mut tx = self.pool.begin().await?;
        let poll_row = sqlx::query(
            r#"
            SELECT id, question, created_by, created_at
            FROM polls
            WHERE id = ?
            "#,
        )
        .bind(poll_id)
        .fetch_optional(&mut *tx)
        .await?;

        let poll = match poll_row {
            Some(row) => Some(load_details(&mut *tx, row).await?),
            None => None,
        };
        tx.commit().await?;
        Ok(poll)
    }

    async fn fetch_all_polls(&self) -> Result<Vec<Poll>, PollError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, question, created_by, created_at
            FROM polls
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut polls = Vec::with_capacity(rows.len());
        for row in rows {
            polls.push(load_details(&mut *tx, row).await?);
        }
        tx.commit().await?;
        Ok(polls)
    }

    async fn has_voter(&self, poll_id: &str, voter_token: &str) -> Result<bool, PollError> {
        let found = sqlx::query("SELECT 1 FROM poll_voters WHERE poll_id = ? AND voter_token = ?")
            .bind(poll_id)
            .bind(voter_token)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        Ok(found)
    }

    async fn commit_vote(
        &self,
        poll_id: &str,
        option_position: usize,
        voter_token: &str,
    ) -> Result<(), PollError> {
        let mut tx = self.pool.begin().await?;

        // The primary key on (poll_id, voter_token) still holds when several
        // processes share this database file.
        let inserted = sqlx::query(
            r#"
            INSERT INTO poll_voters (poll_id, voter_token, option_position, voted_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(poll_id)
        .bind(voter_token)
        .bind(option_position as i64)
        .bind(format_timestamp(&Utc::now()))
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                debug!("Voter row already present for poll {}", poll_id);
                return Err(PollError::DuplicateVote(poll_id.to_string()));
            }
            return Err(e.into());
        }

        let updated = sqlx::query(
            r#"
            UPDATE poll_options
            SET votes = votes + 1
            WHERE poll_id = ? AND position = ?
            "#,
        )
        .bind(poll_id)
        .bind(option_position as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            // Dropping `tx` rolls the voter row back.
            let option_count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM poll_options WHERE poll_id = ?")
                    .bind(poll_id)
                    .fetch_one(&mut *tx)
                    .await?;
            return Err(PollError::OutOfRange {
                index: option_position as i64,
                option_count: option_count as usize,
            });
        }

        tx.commit().await?;
        Ok(())
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.is_unique_violation(),
        _ => false,
    }
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PollError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PollError::Storage(sqlx::Error::Decode(Box::new(e))))
}

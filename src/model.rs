use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Direction {
    INCOME,
    EXPENSE,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::INCOME => "INCOME",
            Direction::EXPENSE => "EXPENSE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncStatus {
    PendingSync,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::PendingSync => "PENDING_SYNC",
        }
    }
}

/// One decoded mailbox message as fetched from the provider. Held only for
/// the duration of a crawl; never persisted.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub body_text: String,
    pub received_at: DateTime<Utc>,
}

/// A financial transaction extracted from one notification email.
///
/// `amount == 0` means the amount pattern was not found, not a zero-value
/// transaction. `date` is the email's arrival time, used as a proxy for the
/// transaction time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedTransaction {
    pub date: DateTime<Utc>,
    pub amount: i64,
    pub direction: Direction,
    pub category: String,
    pub description: String,
    pub source_institution: String,
    pub sync_status: SyncStatus,
    pub provider_message_id: String,
    pub raw_excerpt: Option<String>,
}

/// A queued transaction plus staging metadata. Owned by the queue store:
/// created on push, deleted by the downstream consumer once applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub id: String,
    pub user_id: String,
    pub transaction: ParsedTransaction,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub tier: String,
    pub last_login: DateTime<Utc>,
}

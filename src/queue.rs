//! Durable per-user ingestion queue over SQLite, plus the user-profile
//! store. Append-only from the crawler's side: `push` never merges with or
//! overwrites an existing entry, so concurrent crawls simply interleave
//! their appends. The downstream consumer drains entries via `list` and
//! `remove`.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;
use uuid::Uuid;

use crate::model::{Direction, ParsedTransaction, QueueEntry, SyncStatus, UserProfile};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs and other schemes pass through.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let (path_part, query_part) = match rest.trim_start_matches('/').split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest.trim_start_matches('/'), None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path_part.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query_part {
        Some(q) => format!("sqlite://{}?{}", expanded, q),
        None => format!("sqlite://{}", expanded),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Append one transaction to the user's queue and return the fresh entry
/// id. Always a plain insert; duplicate detection is the downstream
/// consumer's concern.
#[instrument(skip_all)]
pub async fn push(pool: &Pool, user_id: &str, tx: &ParsedTransaction) -> Result<String> {
    let entry_id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO queue_entries \
         (id, user_id, date, amount, direction, category, description, \
          source_institution, sync_status, provider_message_id, raw_excerpt, enqueued_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry_id)
    .bind(user_id)
    .bind(tx.date)
    .bind(tx.amount)
    .bind(tx.direction.as_str())
    .bind(&tx.category)
    .bind(&tx.description)
    .bind(&tx.source_institution)
    .bind(tx.sync_status.as_str())
    .bind(&tx.provider_message_id)
    .bind(tx.raw_excerpt.as_deref())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(entry_id)
}

/// All currently staged entries for the user. Order is not guaranteed.
#[instrument(skip_all)]
pub async fn list(pool: &Pool, user_id: &str) -> Result<Vec<QueueEntry>> {
    let rows = sqlx::query("SELECT * FROM queue_entries WHERE user_id = ?")
        .bind(user_id)
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(entry_from_row).collect())
}

/// Delete one entry. Idempotent: removing an id that is not present is not
/// an error, because the downstream consumer may retry.
#[instrument(skip_all)]
pub async fn remove(pool: &Pool, user_id: &str, entry_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM queue_entries WHERE user_id = ? AND id = ?")
        .bind(user_id)
        .bind(entry_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn entry_from_row(row: &SqliteRow) -> QueueEntry {
    let direction = match row.get::<String, _>("direction").as_str() {
        "INCOME" => Direction::INCOME,
        _ => Direction::EXPENSE,
    };
    QueueEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        transaction: ParsedTransaction {
            date: row.get("date"),
            amount: row.get("amount"),
            direction,
            category: row.get("category"),
            description: row.get("description"),
            source_institution: row.get("source_institution"),
            sync_status: SyncStatus::PendingSync,
            provider_message_id: row.get("provider_message_id"),
            raw_excerpt: row.get("raw_excerpt"),
        },
        enqueued_at: row.get("enqueued_at"),
    }
}

/// Insert or refresh a user profile, keyed by uid.
#[instrument(skip_all)]
pub async fn upsert_user_profile(pool: &Pool, profile: &UserProfile) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (uid, email, name, picture, tier, last_login) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(uid) DO UPDATE SET \
           email = excluded.email, name = excluded.name, picture = excluded.picture, \
           tier = excluded.tier, last_login = excluded.last_login",
    )
    .bind(&profile.uid)
    .bind(&profile.email)
    .bind(profile.name.as_deref())
    .bind(profile.picture.as_deref())
    .bind(&profile.tier)
    .bind(profile.last_login)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_user_profile(pool: &Pool, uid: &str) -> Result<Option<UserProfile>> {
    let row = sqlx::query("SELECT * FROM users WHERE uid = ?")
        .bind(uid)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(profile_from_row))
}

/// Look a profile up by email, for callers that only hold the session
/// email.
#[instrument(skip_all)]
pub async fn find_user_by_email(pool: &Pool, email: &str) -> Result<Option<UserProfile>> {
    let row = sqlx::query("SELECT * FROM users WHERE email = ? LIMIT 1")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(profile_from_row))
}

fn profile_from_row(row: &SqliteRow) -> UserProfile {
    UserProfile {
        uid: row.get("uid"),
        email: row.get("email"),
        name: row.get("name"),
        picture: row.get("picture"),
        tier: row.get("tier"),
        last_login: row.get("last_login"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Direction, SyncStatus};
    use chrono::TimeZone;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_tx(provider_message_id: &str) -> ParsedTransaction {
        ParsedTransaction {
            date: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            amount: 5_000_000,
            direction: Direction::INCOME,
            category: "Ngân hàng".into(),
            description: "Biến động số dư".into(),
            source_institution: "Vietcombank".into(),
            sync_status: SyncStatus::PendingSync,
            provider_message_id: provider_message_id.into(),
            raw_excerpt: Some("Bạn vừa nhận được 5,000,000 VND".into()),
        }
    }

    #[tokio::test]
    async fn push_then_list_round_trips_fields() {
        let pool = setup_pool().await;
        let tx = sample_tx("gmail-1");

        let entry_id = push(&pool, "user-a", &tx).await.unwrap();
        let entries = list(&pool, "user-a").await.unwrap();

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.id, entry_id);
        assert_eq!(entry.user_id, "user-a");
        assert_eq!(entry.transaction, tx);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_leaves_other_entries() {
        let pool = setup_pool().await;
        let kept = push(&pool, "user-a", &sample_tx("gmail-1")).await.unwrap();
        let dropped = push(&pool, "user-a", &sample_tx("gmail-2")).await.unwrap();

        remove(&pool, "user-a", &dropped).await.unwrap();
        // Second removal of the same id, and removal of a never-present id,
        // both succeed without touching the remaining entry.
        remove(&pool, "user-a", &dropped).await.unwrap();
        remove(&pool, "user-a", "no-such-entry").await.unwrap();

        let entries = list(&pool, "user-a").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, kept);
    }

    #[tokio::test]
    async fn queues_are_isolated_per_user() {
        let pool = setup_pool().await;
        push(&pool, "user-a", &sample_tx("gmail-1")).await.unwrap();
        push(&pool, "user-b", &sample_tx("gmail-2")).await.unwrap();

        let a = list(&pool, "user-a").await.unwrap();
        let b = list(&pool, "user-b").await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].transaction.provider_message_id, "gmail-1");
        assert_eq!(b[0].transaction.provider_message_id, "gmail-2");

        // remove is scoped to the owning user.
        remove(&pool, "user-b", &a[0].id).await.unwrap();
        assert_eq!(list(&pool, "user-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_pushes_create_distinct_entries() {
        let pool = setup_pool().await;
        let tx = sample_tx("gmail-1");
        let first = push(&pool, "user-a", &tx).await.unwrap();
        let second = push(&pool, "user-a", &tx).await.unwrap();

        assert_ne!(first, second);
        let entries = list(&pool, "user-a").await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn profile_upsert_get_and_email_lookup() {
        let pool = setup_pool().await;
        let mut profile = UserProfile {
            uid: "uid-1".into(),
            email: "trader@example.com".into(),
            name: Some("Trader".into()),
            picture: None,
            tier: "free".into(),
            last_login: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        };
        upsert_user_profile(&pool, &profile).await.unwrap();
        assert_eq!(
            get_user_profile(&pool, "uid-1").await.unwrap(),
            Some(profile.clone())
        );

        profile.tier = "pro".into();
        upsert_user_profile(&pool, &profile).await.unwrap();
        let found = find_user_by_email(&pool, "trader@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.tier, "pro");

        assert!(get_user_profile(&pool, "uid-2").await.unwrap().is_none());
        assert!(find_user_by_email(&pool, "ghost@example.com")
            .await
            .unwrap()
            .is_none());
    }
}

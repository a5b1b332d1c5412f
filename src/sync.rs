//! One end-to-end ingestion cycle: crawl the mailbox, stage every accepted
//! transaction in the per-user queue, report the outcome.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::crawler;
use crate::gmail::MailService;
use crate::queue::{self, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The mailbox held no candidate transactions; informational, not an
    /// error.
    NoCandidates,
    Queued { queued: usize, failed: usize },
}

/// Run one sync cycle for `user_id`. Crawl failures (credential or
/// connection) propagate with the underlying message intact; a push failure
/// for one item never prevents attempting the remaining items.
#[instrument(skip_all)]
pub async fn run_sync(
    pool: &Pool,
    mail: &dyn MailService,
    user_id: &str,
    access_token: &str,
    max_results: u32,
) -> Result<SyncOutcome> {
    let transactions = crawler::crawl(mail, access_token, max_results).await?;
    if transactions.is_empty() {
        info!(user_id, "no candidate transactions found");
        return Ok(SyncOutcome::NoCandidates);
    }

    let mut queued = 0usize;
    let mut failed = 0usize;
    for tx in &transactions {
        match queue::push(pool, user_id, tx).await {
            Ok(entry_id) => {
                queued += 1;
                info!(
                    %entry_id,
                    provider_message_id = %tx.provider_message_id,
                    "queued transaction"
                );
            }
            Err(err) => {
                failed += 1;
                warn!(
                    ?err,
                    provider_message_id = %tx.provider_message_id,
                    "failed to queue transaction"
                );
            }
        }
    }
    Ok(SyncOutcome::Queued { queued, failed })
}

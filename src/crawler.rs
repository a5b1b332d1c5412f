//! Drives one mailbox crawl: search for candidates, fetch each message,
//! run the parser, collect the accepted transactions.

use tracing::{debug, instrument};

use crate::gmail::{CrawlError, MailService};
use crate::model::ParsedTransaction;
use crate::parser;

pub const DEFAULT_MAX_RESULTS: u32 = 20;

/// Crawl the mailbox behind `access_token` and return the parsed
/// transactions in provider order.
///
/// All-or-nothing: a failed search or a failed fetch aborts the whole crawl
/// so the caller never mistakes a partial result for a fully synced
/// mailbox. An empty candidate list is not an error.
#[instrument(skip_all)]
pub async fn crawl(
    mail: &dyn MailService,
    access_token: &str,
    max_results: u32,
) -> Result<Vec<ParsedTransaction>, CrawlError> {
    if access_token.trim().is_empty() {
        return Err(CrawlError::MissingCredential);
    }

    let message_ids = mail.search_message_ids(access_token, max_results).await?;
    debug!(candidates = message_ids.len(), "mailbox search finished");

    let mut transactions = Vec::new();
    for message_id in message_ids {
        let msg = mail.fetch_message(access_token, &message_id).await?;
        if let Some(mut tx) = parser::parse(&msg.subject, &msg.body_text, &msg.sender, msg.received_at)
        {
            tx.provider_message_id = msg.id;
            debug!(
                provider_message_id = %tx.provider_message_id,
                amount = tx.amount,
                direction = tx.direction.as_str(),
                "accepted transaction"
            );
            transactions.push(tx);
        }
    }
    Ok(transactions)
}

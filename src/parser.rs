//! Heuristic classifier and field extractor for bank notification emails.
//!
//! Pure functions over the message text: no I/O, no clock, no shared state.
//! The cascade is inclusion filter -> exclusion filter -> field extraction;
//! a message that fails either gate yields no transaction at all, and any
//! field that cannot be extracted falls back to its default instead of
//! failing the record.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::model::{Direction, ParsedTransaction, SyncStatus};

/// Trigger vocabulary: at least one of these must appear somewhere in the
/// lower-cased sender + subject + body for the message to be considered
/// financial at all.
const FINANCIAL_KEYWORDS: &[&str] = &[
    "số dư",
    "giao dịch",
    "biến động",
    "biên lai",
    "thanh toán",
    "chuyển khoản",
    "nhận tiền",
    "vừa bị trừ",
    "vừa nhận được",
    "vietcombank",
    "techcombank",
    "mbbank",
    "acb",
    "tpb",
    "bidv",
    "vpbank",
];

/// Markers of non-transactional mail (security alerts, OTP notices,
/// promotions). Any hit rejects the message even when the trigger
/// vocabulary matched.
const EXCLUSION_MARKERS: &[&str] = &["login alert", "mật khẩu", "otp", "security", "quảng cáo"];

/// Bank tokens in priority order; the first token found in the content
/// decides the institution label.
const BANKS: &[(&str, &str)] = &[
    ("vietcombank", "Vietcombank"),
    ("techcombank", "Techcombank"),
    ("mbbank", "MBBank"),
    ("tpb", "TPBank"),
    ("acb", "ACB"),
];

const INCOME_MARKERS: &[&str] = &["nhận được", "cộng", "+"];
const EXPENSE_MARKERS: &[&str] = &["bị trừ", "thanh toán", "-"];

const DEFAULT_CATEGORY: &str = "Ngân hàng";
const DEFAULT_INSTITUTION: &str = "Bank";
const RAW_EXCERPT_CHARS: usize = 500;

// Comma-separated form first, dot-separated as fallback, matching the
// notification formats the supported banks actually send.
static AMOUNT_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d,]{4,})\s?VND").expect("valid amount regex"));
static AMOUNT_DOT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([\d.]{4,})\s?VND").expect("valid amount regex"));

/// Decide whether one email is a financial transaction and, if so, extract
/// a structured record. Returns `None` for everything that is not a bank
/// transaction notification.
pub fn parse(
    subject: &str,
    body: &str,
    sender: &str,
    received_at: DateTime<Utc>,
) -> Option<ParsedTransaction> {
    let content = format!("{}\n{}\n{}", sender, subject, body).to_lowercase();

    if !is_financial(&content) {
        return None;
    }
    if is_excluded(&content) {
        return None;
    }

    Some(ParsedTransaction {
        date: received_at,
        amount: extract_amount(body),
        direction: classify_direction(&content),
        category: DEFAULT_CATEGORY.to_string(),
        description: subject.to_string(),
        source_institution: detect_institution(&content).to_string(),
        sync_status: SyncStatus::PendingSync,
        // Filled in by the crawler, which knows the provider message id.
        provider_message_id: String::new(),
        raw_excerpt: excerpt(body),
    })
}

fn is_financial(content: &str) -> bool {
    FINANCIAL_KEYWORDS.iter().any(|k| content.contains(k))
}

fn is_excluded(content: &str) -> bool {
    EXCLUSION_MARKERS.iter().any(|k| content.contains(k))
}

fn detect_institution(content: &str) -> &'static str {
    BANKS
        .iter()
        .find(|(token, _)| content.contains(token))
        .map(|(_, label)| *label)
        .unwrap_or(DEFAULT_INSTITUTION)
}

/// First currency-tagged number in the body, thousands separators stripped.
/// Returns 0 when no pattern matches; consumers treat that as "extraction
/// failed", not as a zero-value transaction.
fn extract_amount(body: &str) -> i64 {
    let captures = AMOUNT_COMMA
        .captures(body)
        .or_else(|| AMOUNT_DOT.captures(body));
    let Some(captures) = captures else {
        return 0;
    };
    let digits: String = captures[1].chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// INCOME only when income vocabulary is present and expense vocabulary is
/// absent; EXPENSE for the both/neither tie-break.
fn classify_direction(content: &str) -> Direction {
    let income = INCOME_MARKERS.iter().any(|k| content.contains(k));
    let expense = EXPENSE_MARKERS.iter().any(|k| content.contains(k));
    if income && !expense {
        Direction::INCOME
    } else {
        Direction::EXPENSE
    }
}

fn excerpt(body: &str) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    Some(body.chars().take(RAW_EXCERPT_CHARS).collect())
}

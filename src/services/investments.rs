//! Investment event intake.
//!
//! Two inbound paths end here: the chain API webhook that announces a ready
//! deposit batch, and the log subscription feed that reports detected
//! investments. The latter is persisted once per transaction hash.

use std::sync::Arc;

use dashmap::DashSet;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::clients::{ChainWriter, ClientError, MethodCall};
use crate::database::{EventStore, InvestmentEvent};

/// Event name persisted for log subscription notifications
pub const INVESTMENT_DETECTED: &str = "investment-detected";

const BATCH_READY_EVENT: &str = "BatchReady";
const DETECT_INVESTMENT_METHOD: &str = "detectInvestment";

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Event not found")]
    EventNotFound,

    #[error("malformed notification: {0}")]
    Malformed(String),

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("storage failure: {0:#}")]
    Store(anyhow::Error),
}

// ============================================================================
// CHAIN API WEBHOOK
// ============================================================================

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(default)]
    event: String,
    #[serde(default)]
    data: Option<WebhookData>,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    event: Option<EmittedEvent>,
    transaction: Option<WebhookTransaction>,
}

#[derive(Debug, Deserialize)]
struct EmittedEvent {
    name: String,
    #[serde(default)]
    inputs: Vec<EventInput>,
}

#[derive(Debug, Deserialize)]
struct EventInput {
    name: String,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WebhookTransaction {
    from: Option<String>,
}

/// Deposit announced by a `BatchReady` contract event
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReady {
    pub wallet_address: String,
    pub total_amount_cents: u64,
}

/// Find the first `BatchReady` emission carrying both a total and a sender.
///
/// Entries that do not look like webhook events are ignored.
pub fn find_batch_ready(events: &[Value]) -> Option<BatchReady> {
    let batch_ready = events
        .iter()
        .filter_map(|raw| serde_json::from_value::<WebhookEvent>(raw.clone()).ok())
        .find(|e| {
            e.event == "event.emitted"
                && e.data
                    .as_ref()
                    .and_then(|d| d.event.as_ref())
                    .is_some_and(|ev| ev.name == BATCH_READY_EVENT)
        })?;

    let data = batch_ready.data?;
    let total = data
        .event?
        .inputs
        .into_iter()
        .find(|input| input.name == "totalAmount")?
        .value;
    let total_amount_cents = match &total {
        Value::String(s) => s.trim().parse().ok()?,
        Value::Number(n) => n.as_u64()?,
        _ => return None,
    };
    let wallet_address = data.transaction?.from.filter(|from| !from.is_empty())?;

    Some(BatchReady {
        wallet_address,
        total_amount_cents,
    })
}

// ============================================================================
// LOG SUBSCRIPTION FEED
// ============================================================================

#[derive(Debug, Deserialize)]
struct LogEvent {
    messages: Vec<LogMessage>,
}

#[derive(Debug, Deserialize)]
struct LogMessage {
    data: String,
    transaction_hash: String,
}

/// Amount and transaction of one investment log
#[derive(Debug, Clone, PartialEq)]
pub struct LogNotification {
    pub amount: i64,
    pub transaction_hash: String,
}

/// Accepts the event JSON itself or a subscription message ending in `event: {json}`
pub fn parse_log_notification(raw: &str) -> Result<LogNotification, IntakeError> {
    let raw = raw.trim();
    let json = if raw.starts_with('{') {
        raw
    } else {
        // the prefix may itself contain "event:", e.g. "subscription_event: event: {...}"
        raw.match_indices("event:")
            .map(|(start, marker)| raw[start + marker.len()..].trim_start())
            .find(|rest| rest.starts_with('{') && rest.ends_with('}'))
            .ok_or(IntakeError::EventNotFound)?
    };

    let event: LogEvent = serde_json::from_str(json).map_err(|e| IntakeError::Malformed(e.to_string()))?;
    let first = event
        .messages
        .into_iter()
        .next()
        .ok_or_else(|| IntakeError::Malformed("event has no messages".to_string()))?;

    Ok(LogNotification {
        amount: parse_hex_amount(&first.data)?,
        transaction_hash: first.transaction_hash,
    })
}

/// Parse a `0x`-prefixed ABI word into an amount
pub fn parse_hex_amount(hex: &str) -> Result<i64, IntakeError> {
    let invalid = || IntakeError::InvalidAmount(hex.to_string());
    let digits = hex.trim().strip_prefix("0x").ok_or_else(invalid)?;
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return if digits.is_empty() { Err(invalid()) } else { Ok(0) };
    }
    let value = u128::from_str_radix(significant, 16).map_err(|_| invalid())?;
    i64::try_from(value).map_err(|_| invalid())
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Recorded(InvestmentEvent),
    Duplicate { transaction_hash: String },
}

/// Deduplicating writer for investment notifications
pub struct InvestmentLedger {
    events: Arc<dyn EventStore>,
    processed: DashSet<String>,
}

impl InvestmentLedger {
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self {
            events,
            processed: DashSet::new(),
        }
    }

    pub async fn record_notification(&self, raw: &str) -> Result<IntakeOutcome, IntakeError> {
        let notification = parse_log_notification(raw)?;
        let id = notification.transaction_hash.clone();

        if !self.processed.insert(id.clone()) {
            debug!(transaction_hash = %id, "Notification already processed, skipping");
            return Ok(IntakeOutcome::Duplicate { transaction_hash: id });
        }

        let event = InvestmentEvent {
            name: INVESTMENT_DETECTED.to_string(),
            amount: notification.amount,
            token_name: None,
            unique_id: id.clone(),
        };

        match self.events.insert_event_once(&event).await {
            Ok(true) => {
                info!(transaction_hash = %id, amount = event.amount, "📥 Investment detected");
                Ok(IntakeOutcome::Recorded(event))
            }
            Ok(false) => Ok(IntakeOutcome::Duplicate { transaction_hash: id }),
            Err(e) => {
                // let a redelivery try again
                self.processed.remove(&id);
                warn!(transaction_hash = %id, "Failed to persist investment event: {:#}", e);
                Err(IntakeError::Store(e))
            }
        }
    }
}

// ============================================================================
// CONTRACT CALL
// ============================================================================

/// Call `detectInvestment(address, amount)` on the tracking contract
pub async fn detect_investment(
    chain_writer: &dyn ChainWriter,
    address: &str,
    amount: &str,
) -> Result<Value, ClientError> {
    let call = MethodCall::signed(address, vec![json!(address), json!(amount)]);
    chain_writer.call_method(DETECT_INVESTMENT_METHOD, &call).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryEventStore, MockChainWriter};

    fn subscription_message(hash: &str, data: &str) -> String {
        format!(
            r#"subscription_event trickle-ai event: {{"messages":[{{"data":"{data}","transaction_hash":"{hash}","topics":[]}}]}}"#
        )
    }

    #[test]
    fn finds_batch_ready_among_other_events() {
        let events = vec![
            json!({"id": "1", "event": "transaction.included", "data": {}}),
            json!({
                "id": "2",
                "event": "event.emitted",
                "data": {
                    "event": {
                        "name": "BatchReady",
                        "inputs": [
                            {"name": "user", "value": "0xabc", "hashed": false, "type": "address"},
                            {"name": "totalAmount", "value": "1000", "hashed": false, "type": "uint256"}
                        ]
                    },
                    "transaction": {"from": "0xabc"}
                }
            }),
        ];

        assert_eq!(
            find_batch_ready(&events),
            Some(BatchReady {
                wallet_address: "0xabc".to_string(),
                total_amount_cents: 1000,
            })
        );
    }

    #[test]
    fn batch_ready_needs_total_and_sender() {
        let without_sender = vec![json!({
            "event": "event.emitted",
            "data": {"event": {"name": "BatchReady", "inputs": [{"name": "totalAmount", "value": "5"}]}}
        })];
        assert_eq!(find_batch_ready(&without_sender), None);

        let other_event = vec![json!({
            "event": "event.emitted",
            "data": {"event": {"name": "Deposit", "inputs": []}, "transaction": {"from": "0xabc"}}
        })];
        assert_eq!(find_batch_ready(&other_event), None);
    }

    #[test]
    fn parses_raw_subscription_message_and_plain_json() {
        let raw = subscription_message("0xfeed", "0x00000000000000000000000000000000000000000000000000000000000003e8");
        let parsed = parse_log_notification(&raw).unwrap();
        assert_eq!(parsed.amount, 1000);
        assert_eq!(parsed.transaction_hash, "0xfeed");

        let plain = r#"{"messages":[{"data":"0x10","transaction_hash":"0xbeef"}]}"#;
        assert_eq!(parse_log_notification(plain).unwrap().amount, 16);

        assert!(matches!(parse_log_notification("hello"), Err(IntakeError::EventNotFound)));
        assert!(matches!(
            parse_log_notification(r#"{"messages":[]}"#),
            Err(IntakeError::Malformed(_))
        ));
    }

    #[test]
    fn hex_amounts() {
        assert_eq!(parse_hex_amount("0x0").unwrap(), 0);
        assert_eq!(parse_hex_amount("0x00ff").unwrap(), 255);
        assert!(parse_hex_amount("ff").is_err());
        assert!(parse_hex_amount("0x").is_err());
        assert!(parse_hex_amount("0xzz").is_err());
        assert!(parse_hex_amount("0xffffffffffffffffffff").is_err());
    }

    #[tokio::test]
    async fn repeated_transaction_hash_is_persisted_once() {
        let store = Arc::new(MemoryEventStore::default());
        let ledger = InvestmentLedger::new(store.clone());
        let raw = subscription_message("0xfeed", "0x64");

        let first = ledger.record_notification(&raw).await.unwrap();
        let second = ledger.record_notification(&raw).await.unwrap();

        assert!(matches!(first, IntakeOutcome::Recorded(ref e) if e.amount == 100 && e.name == INVESTMENT_DETECTED));
        assert_eq!(
            second,
            IntakeOutcome::Duplicate {
                transaction_hash: "0xfeed".to_string()
            }
        );
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn database_uniqueness_catches_ids_from_other_processes() {
        let store = Arc::new(MemoryEventStore::default());
        InvestmentLedger::new(store.clone())
            .record_notification(&subscription_message("0xfeed", "0x64"))
            .await
            .unwrap();

        // a fresh ledger has an empty processed set
        let outcome = InvestmentLedger::new(store.clone())
            .record_notification(&subscription_message("0xfeed", "0x64"))
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Duplicate { .. }));
        assert_eq!(store.events().len(), 1);
    }

    #[tokio::test]
    async fn detect_investment_calls_contract_method() {
        let writer = MockChainWriter::default();
        detect_investment(&writer, "0xabc", "250").await.unwrap();

        let calls = writer.method_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "detectInvestment");
        assert_eq!(calls[0].1.args, vec![json!("0xabc"), json!("250")]);
        assert_eq!(calls[0].1.from, "0xabc");
        assert_eq!(calls[0].1.nonce_management, None);
    }
}

// Database Models
//
// Tokio-postgres compatible models for the portfolio, swap saga and
// investment event tables.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;
use uuid::Uuid;

/// Trait for converting from tokio-postgres Row
pub trait FromRow {
    fn from_row(row: &Row) -> Result<Self>
    where
        Self: Sized;
}

// ============================================================================
// PORTFOLIO
// ============================================================================

/// One (token, proportion) pair of a user's investment preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    pub token: String,
    pub token_address: String,
    pub proportion: f64,
}

impl FromRow for AllocationEntry {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            token: row.try_get("token")?,
            token_address: row.try_get("token_address")?,
            proportion: row.try_get("proportion")?,
        })
    }
}

// ============================================================================
// SWAP SAGAS
// ============================================================================

/// Progress marker of one allocation's swap → record → mint sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStep {
    /// Swap requested; broadcast outcome unknown until advanced
    Pending,
    Swapped,
    Recorded,
    Minted,
    /// Aggregator produced no transaction
    Skipped,
    Failed,
}

impl SagaStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Pending => "pending",
            SagaStep::Swapped => "swapped",
            SagaStep::Recorded => "recorded",
            SagaStep::Minted => "minted",
            SagaStep::Skipped => "skipped",
            SagaStep::Failed => "failed",
        }
    }

    /// Steps that still have work a resume can pick up
    pub fn is_incomplete(&self) -> bool {
        matches!(self, SagaStep::Pending | SagaStep::Swapped | SagaStep::Recorded)
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SagaStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SagaStep::Pending),
            "swapped" => Ok(SagaStep::Swapped),
            "recorded" => Ok(SagaStep::Recorded),
            "minted" => Ok(SagaStep::Minted),
            "skipped" => Ok(SagaStep::Skipped),
            "failed" => Ok(SagaStep::Failed),
            other => Err(format!("unknown saga step {other}")),
        }
    }
}

/// Persisted state of one allocation within a swap batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSaga {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub wallet_address: String,
    pub token: String,
    pub token_address: String,
    pub proportion: f64,
    /// Smallest-unit amount; kept as text because it exceeds BIGINT
    #[serde(with = "u128_string")]
    pub swap_amount: u128,
    /// Rounded fiat cents passed to `recordSwap` and the mint
    pub record_amount: u64,
    pub step: SagaStep,
    pub tx_hash: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapSaga {
    pub fn new(
        batch_id: Uuid,
        wallet_address: &str,
        entry: &AllocationEntry,
        swap_amount: u128,
        record_amount: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            wallet_address: wallet_address.to_string(),
            token: entry.token.clone(),
            token_address: entry.token_address.clone(),
            proportion: entry.proportion,
            swap_amount,
            record_amount,
            step: SagaStep::Pending,
            tx_hash: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl FromRow for SwapSaga {
    fn from_row(row: &Row) -> Result<Self> {
        let swap_amount: String = row.try_get("swap_amount")?;
        let step: String = row.try_get("step")?;
        let record_amount: i64 = row.try_get("record_amount")?;

        Ok(Self {
            id: row.try_get("id")?,
            batch_id: row.try_get("batch_id")?,
            wallet_address: row.try_get("wallet_address")?,
            token: row.try_get("token")?,
            token_address: row.try_get("token_address")?,
            proportion: row.try_get("proportion")?,
            swap_amount: swap_amount
                .parse()
                .with_context(|| format!("invalid swap_amount {swap_amount:?}"))?,
            record_amount: u64::try_from(record_amount).context("negative record_amount")?,
            step: step.parse().map_err(|e: String| anyhow!(e))?,
            tx_hash: row.try_get("tx_hash")?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// INVESTMENT EVENTS
// ============================================================================

/// Chain notification persisted once per unique id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentEvent {
    pub name: String,
    pub amount: i64,
    pub token_name: Option<String>,
    pub unique_id: String,
}

impl FromRow for InvestmentEvent {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.try_get("name")?,
            amount: row.try_get("amount")?,
            token_name: row.try_get("token_name")?,
            unique_id: row.try_get("unique_id")?,
        })
    }
}

//! Allocation Swap Engine
//!
//! Turns one fiat deposit into a swap per portfolio allocation. Every
//! allocation runs the same saga: swap through the aggregator, broadcast
//! through the chain writer, `recordSwap` on the tracking contract, then a
//! loyalty mint on the side-channel. A failing allocation never aborts the
//! rest of the batch.

use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::mint::{MintQueue, MintRequest};
use super::portfolio::PROPORTION_TOLERANCE;
use super::pricing::{cents_to_native_units, record_amount, split_allocation};
use super::rate_limiter::{RateLimiter, Upstream};
use crate::clients::{ChainWriter, MethodCall, PriceOracle, SwapAggregator, SwapQuoteRequest};
use crate::config::{NATIVE_TOKEN_ADDRESS, SwapConfig};
use crate::database::{AllocationEntry, PortfolioStore, SagaStep, SagaStore, SwapSaga};
use crate::error::SwapError;

/// Contract method that logs a completed swap on chain
const RECORD_SWAP_METHOD: &str = "recordSwap";

/// Outcome of one allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SwapResult {
    Swap {
        token: String,
        proportion: f64,
        /// Smallest-unit amount as a decimal string
        amount: String,
        #[serde(rename = "txHash")]
        tx_hash: String,
        recorded: bool,
    },
    Error {
        token: String,
        error: String,
    },
    Skipped {
        token: String,
        reason: String,
    },
}

impl SwapResult {
    pub fn token(&self) -> &str {
        match self {
            SwapResult::Swap { token, .. } | SwapResult::Error { token, .. } | SwapResult::Skipped { token, .. } => {
                token
            }
        }
    }

    fn error(token: &str, error: impl Into<String>) -> Self {
        SwapResult::Error {
            token: token.to_string(),
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapBatch {
    pub batch_id: Uuid,
    pub results: Vec<SwapResult>,
}

/// What a resume pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeReport {
    pub recorded: usize,
    pub mints_queued: usize,
    pub failed: usize,
    /// Sagas whose record call failed again
    pub still_swapped: usize,
    /// Sagas skipped because their batch is still running
    pub in_flight: usize,
    /// `recorded` sagas whose mint is still queued or retrying
    pub mints_outstanding: usize,
}

#[derive(Debug, Clone)]
pub struct SwapEngineSettings {
    /// Tenant whose allocations are swapped; every row when `None`
    pub portfolio_owner: Option<String>,
    pub slippage_bps: u16,
}

impl From<&SwapConfig> for SwapEngineSettings {
    fn from(config: &SwapConfig) -> Self {
        Self {
            portfolio_owner: config.portfolio_owner.clone(),
            slippage_bps: config.slippage_bps,
        }
    }
}

/// External collaborators of the engine
pub struct SwapCollaborators {
    pub portfolio: Arc<dyn PortfolioStore>,
    pub sagas: Arc<dyn SagaStore>,
    pub aggregator: Arc<dyn SwapAggregator>,
    /// `None` when the chain-write service is not configured
    pub chain_writer: Option<Arc<dyn ChainWriter>>,
    pub oracle: Arc<dyn PriceOracle>,
    pub limiter: Arc<RateLimiter>,
    pub mints: MintQueue,
}

pub struct AllocationSwapEngine {
    portfolio: Arc<dyn PortfolioStore>,
    sagas: Arc<dyn SagaStore>,
    aggregator: Arc<dyn SwapAggregator>,
    chain_writer: Option<Arc<dyn ChainWriter>>,
    oracle: Arc<dyn PriceOracle>,
    limiter: Arc<RateLimiter>,
    mints: MintQueue,
    settings: SwapEngineSettings,
    active_batches: DashSet<Uuid>,
    resume_lock: Mutex<()>,
}

/// Removes a batch from the active set when its run ends
struct ActiveBatch<'a> {
    set: &'a DashSet<Uuid>,
    id: Uuid,
}

impl Drop for ActiveBatch<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl AllocationSwapEngine {
    pub fn new(collaborators: SwapCollaborators, settings: SwapEngineSettings) -> Self {
        let SwapCollaborators {
            portfolio,
            sagas,
            aggregator,
            chain_writer,
            oracle,
            limiter,
            mints,
        } = collaborators;

        Self {
            portfolio,
            sagas,
            aggregator,
            chain_writer,
            oracle,
            limiter,
            mints,
            settings,
            active_batches: DashSet::new(),
            resume_lock: Mutex::new(()),
        }
    }

    fn chain_writer(&self) -> Result<&Arc<dyn ChainWriter>, SwapError> {
        self.chain_writer
            .as_ref()
            .ok_or_else(|| SwapError::Configuration("MultiBaas configuration missing".to_string()))
    }

    /// Swap `deposit_cents` worth of the native asset into every stored allocation.
    ///
    /// Fails as a whole only before the first allocation is attempted; after
    /// that each allocation reports its own outcome.
    pub async fn execute_allocation_swaps(
        &self,
        wallet_address: &str,
        deposit_cents: u64,
    ) -> Result<SwapBatch, SwapError> {
        let wallet_address = wallet_address.trim();
        if wallet_address.is_empty() {
            return Err(SwapError::InvalidRequest("wallet address is required".to_string()));
        }
        if deposit_cents == 0 {
            return Err(SwapError::InvalidRequest("amount must be positive".to_string()));
        }
        let chain_writer = self.chain_writer()?;

        let price = self.oracle.native_usd_price().await?;
        let total = cents_to_native_units(deposit_cents, price)?;
        info!(
            wallet = wallet_address,
            deposit_cents,
            %price,
            native_units = %total,
            "💱 Converted deposit to native units"
        );

        let allocations = self
            .portfolio
            .load_allocations(self.settings.portfolio_owner.as_deref())
            .await
            .map_err(SwapError::Store)?;
        if allocations.is_empty() {
            return Err(SwapError::EmptyPortfolio);
        }
        let allocated: f64 = allocations.iter().map(|entry| entry.proportion).sum();
        if (allocated - 1.0).abs() > PROPORTION_TOLERANCE {
            if self.settings.portfolio_owner.is_none() {
                warn!("PORTFOLIO_OWNER is unset and the stored rows may span several owners");
            }
            return Err(SwapError::InvalidPortfolio(format!(
                "Portfolio allocations sum to {:.2}%, expected 100%",
                allocated * 100.0
            )));
        }

        let batch_id = Uuid::new_v4();
        self.active_batches.insert(batch_id);
        let _active = ActiveBatch {
            set: &self.active_batches,
            id: batch_id,
        };

        let mut remaining = total;
        let mut remaining_cents = deposit_cents;
        let mut results = Vec::with_capacity(allocations.len());
        for entry in &allocations {
            let shares = split_allocation(total, entry.proportion, remaining)
                .and_then(|amount| Ok((amount, record_amount(entry.proportion, deposit_cents)?)));

            let result = match shares {
                Ok((0, _)) => {
                    info!(%batch_id, token = %entry.token, "Allocation amount rounds to zero, skipping");
                    SwapResult::Skipped {
                        token: entry.token.clone(),
                        reason: "allocation amount rounds to zero".to_string(),
                    }
                }
                Ok((amount, cents)) => {
                    // ceil rounding must not credit more than the deposit
                    let cents = cents.min(remaining_cents);
                    remaining -= amount;
                    remaining_cents -= cents;

                    self.limiter.acquire(Upstream::Aggregator).await;
                    self.swap_allocation(chain_writer, batch_id, wallet_address, entry, amount, cents)
                        .await
                }
                Err(e) => SwapResult::error(&entry.token, e.to_string()),
            };

            if let SwapResult::Error { error, .. } = &result {
                warn!(%batch_id, token = %entry.token, "Allocation swap failed: {}", error);
            }
            results.push(result);
        }

        info!(%batch_id, allocations = results.len(), "✅ Swap batch finished");
        Ok(SwapBatch { batch_id, results })
    }

    async fn swap_allocation(
        &self,
        chain_writer: &Arc<dyn ChainWriter>,
        batch_id: Uuid,
        wallet_address: &str,
        entry: &AllocationEntry,
        amount: u128,
        cents: u64,
    ) -> SwapResult {
        let mut saga = SwapSaga::new(batch_id, wallet_address, entry, amount, cents);
        if let Err(e) = self.sagas.insert_saga(&saga).await {
            error!(%batch_id, token = %entry.token, "Failed to persist swap saga: {:#}", e);
            return SwapResult::error(&entry.token, "Failed to persist swap state");
        }

        let request = SwapQuoteRequest {
            src: NATIVE_TOKEN_ADDRESS.to_string(),
            dst: entry.token_address.clone(),
            amount,
            from: wallet_address.to_string(),
            origin: wallet_address.to_string(),
            slippage_bps: self.settings.slippage_bps,
        };
        debug!(token = %entry.token, amount = %amount, "Requesting swap payload");

        let quote = match self.aggregator.build_swap(&request).await {
            Ok(quote) => quote,
            Err(e) => {
                let message = e.to_string();
                self.advance(&saga, SagaStep::Failed, None, Some(&message)).await;
                return SwapResult::error(&entry.token, message);
            }
        };

        let Some(tx) = quote.transaction() else {
            self.advance(&saga, SagaStep::Skipped, None, None).await;
            info!(token = %entry.token, "Aggregator returned no transaction data, skipping");
            return SwapResult::Skipped {
                token: entry.token.clone(),
                reason: "aggregator returned no transaction data".to_string(),
            };
        };

        self.limiter.acquire(Upstream::ChainWriter).await;
        let tx_hash = match chain_writer.submit_transaction(tx).await {
            Ok(hash) => hash,
            Err(e) => {
                let message = e.to_string();
                self.advance(&saga, SagaStep::Failed, None, Some(&message)).await;
                return SwapResult::error(&entry.token, message);
            }
        };
        info!(token = %entry.token, tx_hash = %tx_hash, "🚀 Swap broadcast");

        self.advance(&saga, SagaStep::Swapped, Some(&tx_hash), None).await;
        saga.step = SagaStep::Swapped;
        saga.tx_hash = Some(tx_hash.clone());

        let recorded = self.record_and_mint(chain_writer, &saga).await;

        SwapResult::Swap {
            token: entry.token.clone(),
            proportion: entry.proportion,
            amount: amount.to_string(),
            tx_hash,
            recorded,
        }
    }

    /// Call `recordSwap` for a broadcast saga and queue its mint. `false` when the record call failed.
    async fn record_and_mint(&self, chain_writer: &Arc<dyn ChainWriter>, saga: &SwapSaga) -> bool {
        self.limiter.acquire(Upstream::ChainWriter).await;

        let call = MethodCall::signed(
            saga.wallet_address.clone(),
            vec![json!(saga.record_amount.to_string()), json!(saga.token)],
        )
        .with_nonce_management();

        match chain_writer.call_method(RECORD_SWAP_METHOD, &call).await {
            Ok(_) => {
                self.advance(saga, SagaStep::Recorded, None, None).await;
                self.queue_mint(saga);
                true
            }
            Err(e) => {
                let message = format!("recordSwap failed: {e}");
                warn!(saga_id = %saga.id, token = %saga.token, "{}", message);
                self.advance(saga, SagaStep::Swapped, None, Some(&message)).await;
                false
            }
        }
    }

    fn queue_mint(&self, saga: &SwapSaga) -> bool {
        self.mints.enqueue(MintRequest {
            saga_id: saga.id,
            user_address: saga.wallet_address.clone(),
            amount: saga.record_amount,
        })
    }

    async fn advance(&self, saga: &SwapSaga, step: SagaStep, tx_hash: Option<&str>, last_error: Option<&str>) {
        if let Err(e) = self.sagas.advance_saga(saga.id, step, tx_hash, last_error).await {
            error!(saga_id = %saga.id, %step, "Failed to persist saga step: {:#}", e);
        }
    }

    /// Finish sagas left incomplete by an earlier run.
    ///
    /// `swapped` sagas are recorded and minted, `recorded` sagas are minted.
    /// `pending` sagas never learned whether their swap was broadcast, so
    /// they are marked failed instead of swapping a second time.
    ///
    /// Passes run one at a time; a `recorded` saga whose mint is still
    /// queued or retrying is left to the dispatcher.
    pub async fn resume_incomplete(&self) -> Result<ResumeReport, SwapError> {
        let chain_writer = self.chain_writer()?;
        let _serial = self.resume_lock.lock().await;
        let sagas = self.sagas.incomplete_sagas().await.map_err(SwapError::Store)?;

        let mut report = ResumeReport::default();
        for saga in sagas {
            if self.active_batches.contains(&saga.batch_id) {
                report.in_flight += 1;
                continue;
            }

            match saga.step {
                SagaStep::Pending => {
                    self.advance(&saga, SagaStep::Failed, None, Some("swap outcome unknown, not retried"))
                        .await;
                    report.failed += 1;
                }
                SagaStep::Swapped => {
                    if self.record_and_mint(chain_writer, &saga).await {
                        report.recorded += 1;
                        report.mints_queued += 1;
                    } else {
                        report.still_swapped += 1;
                    }
                }
                SagaStep::Recorded if self.mints.is_outstanding(&saga.id) => {
                    report.mints_outstanding += 1;
                }
                SagaStep::Recorded => {
                    if self.queue_mint(&saga) {
                        report.mints_queued += 1;
                    }
                }
                SagaStep::Minted | SagaStep::Skipped | SagaStep::Failed => {}
            }
        }

        info!(?report, "🔁 Saga resume finished");
        Ok(report)
    }

    /// Persisted saga state of one batch
    pub async fn batch_sagas(&self, batch_id: Uuid) -> Result<Vec<SwapSaga>, SwapError> {
        self.sagas.batch_sagas(batch_id).await.map_err(SwapError::Store)
    }
}

//! Loyalty-token mint side-channel.
//!
//! Swaps enqueue mint requests and move on; a single background task
//! delivers them with exponential backoff and jitter, then advances the
//! owning saga.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clients::LoyaltyMinter;
use crate::database::{SagaStep, SagaStore};

/// Longest pause between two attempts, before jitter
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq)]
pub struct MintRequest {
    pub saga_id: Uuid,
    pub user_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

fn with_jitter(delay: Duration) -> Duration {
    let spread = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
    if spread == 0 {
        return delay;
    }
    delay.saturating_add(Duration::from_millis(rand::thread_rng().gen_range(0..=spread)))
}

/// Sending half of the mint side-channel
#[derive(Debug, Clone)]
pub struct MintQueue {
    tx: mpsc::UnboundedSender<MintRequest>,
    /// Sagas whose mint is queued or being retried
    outstanding: Arc<DashSet<Uuid>>,
}

impl MintQueue {
    /// Queue a mint unless one is already outstanding for the saga; `true` when queued
    pub fn enqueue(&self, request: MintRequest) -> bool {
        let saga_id = request.saga_id;
        if !self.outstanding.insert(saga_id) {
            info!(%saga_id, "Mint already outstanding, not queued again");
            return false;
        }
        if self.tx.send(request).is_err() {
            self.outstanding.remove(&saga_id);
            error!(%saga_id, "Mint dispatcher has stopped, request dropped");
            return false;
        }
        true
    }

    pub fn is_outstanding(&self, saga_id: &Uuid) -> bool {
        self.outstanding.contains(saga_id)
    }
}

pub struct MintDispatcher {
    minter: Arc<dyn LoyaltyMinter>,
    sagas: Arc<dyn SagaStore>,
    policy: RetryPolicy,
    outstanding: Arc<DashSet<Uuid>>,
}

impl MintDispatcher {
    pub fn new(minter: Arc<dyn LoyaltyMinter>, sagas: Arc<dyn SagaStore>, policy: RetryPolicy) -> Self {
        Self {
            minter,
            sagas,
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            outstanding: Arc::new(DashSet::new()),
        }
    }

    /// Start the background task. It runs until every `MintQueue` clone is dropped.
    pub fn spawn(self) -> (MintQueue, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = MintQueue {
            tx,
            outstanding: self.outstanding.clone(),
        };
        let handle = tokio::spawn(self.run(rx));
        (queue, handle)
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<MintRequest>) {
        info!("🪙 Mint dispatcher started");
        while let Some(request) = rx.recv().await {
            let saga_id = request.saga_id;
            self.deliver(request).await;
            // only after the saga step is persisted
            self.outstanding.remove(&saga_id);
        }
        info!("Mint dispatcher stopped");
    }

    async fn deliver(&self, request: MintRequest) {
        let mut attempt = 1;
        loop {
            match self.minter.mint(&request.user_address, request.amount).await {
                Ok(()) => {
                    info!(saga_id = %request.saga_id, amount = request.amount, attempt, "Loyalty tokens minted");
                    if let Err(e) = self.sagas.advance_saga(request.saga_id, SagaStep::Minted, None, None).await {
                        error!(saga_id = %request.saga_id, "Failed to mark saga minted: {:#}", e);
                    }
                    return;
                }
                Err(e) if attempt < self.policy.max_attempts => {
                    let delay = with_jitter(self.policy.backoff(attempt));
                    warn!(
                        saga_id = %request.saga_id,
                        attempt,
                        retry_in = ?delay,
                        "Mint failed: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(saga_id = %request.saga_id, attempts = attempt, "Mint abandoned: {}", e);
                    let message = format!("mint failed after {attempt} attempts: {e}");
                    if let Err(e) = self
                        .sagas
                        .advance_saga(request.saga_id, SagaStep::Recorded, None, Some(&message))
                        .await
                    {
                        error!(saga_id = %request.saga_id, "Failed to record mint failure: {:#}", e);
                    }
                    return;
                }
            }
        }
    }
}

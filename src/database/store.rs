//! Storage seams used by the services.
//!
//! `DatabaseConnection` implements all of them against Postgres; tests use
//! the in-memory doubles from `test_support`.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::models::{AllocationEntry, InvestmentEvent, SagaStep, SwapSaga};

#[async_trait]
pub trait PortfolioStore: Send + Sync {
    /// Allocations in stored order; every row when `owner` is `None`
    async fn load_allocations(&self, owner: Option<&str>) -> Result<Vec<AllocationEntry>>;

    /// Delete the owner's rows and insert `entries` in their place, atomically
    async fn replace_allocations(&self, owner: &str, entries: &[AllocationEntry]) -> Result<Vec<AllocationEntry>>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn insert_saga(&self, saga: &SwapSaga) -> Result<()>;

    /// Move a saga to `step`. `tx_hash` only overwrites when given;
    /// `last_error` is always replaced.
    async fn advance_saga(
        &self,
        id: Uuid,
        step: SagaStep,
        tx_hash: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<()>;

    /// Sagas at `pending`, `swapped` or `recorded`, oldest first
    async fn incomplete_sagas(&self) -> Result<Vec<SwapSaga>>;

    async fn batch_sagas(&self, batch_id: Uuid) -> Result<Vec<SwapSaga>>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist the event unless its unique id is already stored; `true` when inserted
    async fn insert_event_once(&self, event: &InvestmentEvent) -> Result<bool>;
}

// Postgres implementations of the storage seams.

use anyhow::{Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use super::connection::DatabaseConnection;
use super::models::{AllocationEntry, FromRow, InvestmentEvent, SagaStep, SwapSaga};
use super::store::{EventStore, PortfolioStore, SagaStore};

#[async_trait]
impl PortfolioStore for DatabaseConnection {
    async fn load_allocations(&self, owner: Option<&str>) -> Result<Vec<AllocationEntry>> {
        let client = self.pool().get().await.context("Failed to get DB connection")?;
        let rows = match owner {
            Some(owner) => {
                client
                    .query(
                        "SELECT token, token_address, proportion FROM portfolio WHERE owner = $1 ORDER BY id",
                        &[&owner],
                    )
                    .await
            }
            None => {
                client
                    .query("SELECT token, token_address, proportion FROM portfolio ORDER BY id", &[])
                    .await
            }
        }
        .context("Failed to query portfolio allocations")?;

        rows.iter().map(AllocationEntry::from_row).collect()
    }

    async fn replace_allocations(&self, owner: &str, entries: &[AllocationEntry]) -> Result<Vec<AllocationEntry>> {
        let mut client = self.pool().get().await.context("Failed to get DB connection")?;
        let tx = client.transaction().await.context("Failed to open transaction")?;

        tx.execute("DELETE FROM portfolio WHERE owner = $1", &[&owner])
            .await
            .context("Failed to delete existing allocations")?;

        let insert = tx
            .prepare(
                "INSERT INTO portfolio (owner, token, token_address, proportion) VALUES ($1, $2, $3, $4) \
                 RETURNING token, token_address, proportion",
            )
            .await
            .context("Failed to prepare allocation insert")?;

        let mut stored = Vec::with_capacity(entries.len());
        for entry in entries {
            let row = tx
                .query_one(&insert, &[&owner, &entry.token, &entry.token_address, &entry.proportion])
                .await
                .with_context(|| format!("Failed to insert allocation for {}", entry.token))?;
            stored.push(AllocationEntry::from_row(&row)?);
        }

        tx.commit().await.context("Failed to commit allocation update")?;
        Ok(stored)
    }

    async fn health_check(&self) -> Result<()> {
        self.ping().await
    }
}

#[async_trait]
impl SagaStore for DatabaseConnection {
    async fn insert_saga(&self, saga: &SwapSaga) -> Result<()> {
        let client = self.pool().get().await.context("Failed to get DB connection")?;
        let record_amount = i64::try_from(saga.record_amount).context("record amount exceeds BIGINT")?;
        client
            .execute(
                "INSERT INTO swap_sagas (id, batch_id, wallet_address, token, token_address, proportion, \
                 swap_amount, record_amount, step, tx_hash, last_error, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
                &[
                    &saga.id,
                    &saga.batch_id,
                    &saga.wallet_address,
                    &saga.token,
                    &saga.token_address,
                    &saga.proportion,
                    &saga.swap_amount.to_string(),
                    &record_amount,
                    &saga.step.as_str(),
                    &saga.tx_hash,
                    &saga.last_error,
                    &saga.created_at,
                    &saga.updated_at,
                ],
            )
            .await
            .context("Failed to insert swap saga")?;
        Ok(())
    }

    async fn advance_saga(
        &self,
        id: Uuid,
        step: SagaStep,
        tx_hash: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let client = self.pool().get().await.context("Failed to get DB connection")?;
        let updated = client
            .execute(
                "UPDATE swap_sagas SET step = $2, tx_hash = COALESCE($3, tx_hash), last_error = $4, \
                 updated_at = NOW() WHERE id = $1",
                &[&id, &step.as_str(), &tx_hash, &last_error],
            )
            .await
            .context("Failed to update swap saga")?;
        if updated == 0 {
            anyhow::bail!("swap saga {id} not found");
        }
        Ok(())
    }

    async fn incomplete_sagas(&self) -> Result<Vec<SwapSaga>> {
        let client = self.pool().get().await.context("Failed to get DB connection")?;
        let rows = client
            .query(
                "SELECT * FROM swap_sagas WHERE step IN ('pending', 'swapped', 'recorded') ORDER BY created_at",
                &[],
            )
            .await
            .context("Failed to query incomplete sagas")?;
        rows.iter().map(SwapSaga::from_row).collect()
    }

    async fn batch_sagas(&self, batch_id: Uuid) -> Result<Vec<SwapSaga>> {
        let client = self.pool().get().await.context("Failed to get DB connection")?;
        let rows = client
            .query("SELECT * FROM swap_sagas WHERE batch_id = $1 ORDER BY created_at", &[&batch_id])
            .await
            .context("Failed to query batch sagas")?;
        rows.iter().map(SwapSaga::from_row).collect()
    }
}

#[async_trait]
impl EventStore for DatabaseConnection {
    async fn insert_event_once(&self, event: &InvestmentEvent) -> Result<bool> {
        let client = self.pool().get().await.context("Failed to get DB connection")?;
        let inserted = client
            .execute(
                "INSERT INTO investment_events (name, amount, token_name, unique_id) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (unique_id) DO NOTHING",
                &[&event.name, &event.amount, &event.token_name, &event.unique_id],
            )
            .await
            .context("Failed to insert investment event")?;
        Ok(inserted == 1)
    }
}

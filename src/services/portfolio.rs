//! Portfolio allocation management.

use std::sync::Arc;

use tracing::info;

use crate::database::{AllocationEntry, PortfolioStore};

/// Proportions of one owner must add up to one within this tolerance
pub const PROPORTION_TOLERANCE: f64 = 1e-4;

#[derive(Debug, thiserror::Error)]
pub enum PortfolioError {
    #[error("Allocations must contain at least one entry")]
    Empty,

    #[error("Owner must not be empty")]
    MissingOwner,

    #[error("Allocation {index} is missing its {field}")]
    EmptyField { index: usize, field: &'static str },

    #[error("Invalid proportion {proportion} for {token}, expected a value between 0 and 1")]
    InvalidProportion { token: String, proportion: f64 },

    #[error("Total allocation must be 100%, got {:.2}%", .total * 100.0)]
    SumMismatch { total: f64 },

    #[error("storage failure: {0:#}")]
    Store(anyhow::Error),
}

/// Reads and replaces token allocations
#[derive(Clone)]
pub struct PortfolioService {
    store: Arc<dyn PortfolioStore>,
}

impl PortfolioService {
    pub fn new(store: Arc<dyn PortfolioStore>) -> Self {
        Self { store }
    }

    pub async fn get_allocations(&self, owner: Option<&str>) -> Result<Vec<AllocationEntry>, PortfolioError> {
        let entries = self.store.load_allocations(owner).await.map_err(PortfolioError::Store)?;
        Ok(entries.into_iter().map(rounded).collect())
    }

    /// Validate and store `entries` as the owner's complete allocation set
    pub async fn replace_allocations(
        &self,
        owner: &str,
        entries: Vec<AllocationEntry>,
    ) -> Result<Vec<AllocationEntry>, PortfolioError> {
        if owner.trim().is_empty() {
            return Err(PortfolioError::MissingOwner);
        }
        validate_allocations(&entries)?;

        let stored = self
            .store
            .replace_allocations(owner, &entries)
            .await
            .map_err(PortfolioError::Store)?;

        info!(owner, count = stored.len(), "💼 Portfolio allocations replaced");
        Ok(stored.into_iter().map(rounded).collect())
    }
}

pub fn validate_allocations(entries: &[AllocationEntry]) -> Result<(), PortfolioError> {
    if entries.is_empty() {
        return Err(PortfolioError::Empty);
    }

    for (index, entry) in entries.iter().enumerate() {
        if entry.token.trim().is_empty() {
            return Err(PortfolioError::EmptyField { index, field: "token" });
        }
        if entry.token_address.trim().is_empty() {
            return Err(PortfolioError::EmptyField { index, field: "tokenAddress" });
        }
        if !entry.proportion.is_finite() || !(0.0..=1.0).contains(&entry.proportion) {
            return Err(PortfolioError::InvalidProportion {
                token: entry.token.clone(),
                proportion: entry.proportion,
            });
        }
    }

    let total: f64 = entries.iter().map(|e| e.proportion).sum();
    if (total - 1.0).abs() > PROPORTION_TOLERANCE {
        return Err(PortfolioError::SumMismatch { total });
    }
    Ok(())
}

fn rounded(mut entry: AllocationEntry) -> AllocationEntry {
    entry.proportion = (entry.proportion * 10_000.0).round() / 10_000.0;
    entry
}

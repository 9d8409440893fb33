//! # Services Module
//!
//! Business logic for the server: the allocation swap engine and the pieces
//! it is built from, portfolio management and investment event intake.

pub mod investments;
pub mod mint;
pub mod portfolio;
pub mod pricing;
pub mod rate_limiter;
pub mod swap_engine;

pub use investments::InvestmentLedger;
pub use mint::{MintDispatcher, MintQueue, RetryPolicy};
pub use portfolio::{PortfolioError, PortfolioService};
pub use rate_limiter::{BucketRate, RateLimiter, Upstream};
pub use swap_engine::{AllocationSwapEngine, SwapBatch, SwapCollaborators, SwapEngineSettings, SwapResult};

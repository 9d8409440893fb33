//! # Trickle Server
//!
//! Backend for round-up micro-investing. Deposits announced on chain are
//! split across the owner's token allocation, swapped through a DEX
//! aggregator, recorded on the tracking contract, and rewarded with loyalty
//! tokens. A chat relay decodes the assistant's streaming replies.
//!
//! ## Architecture
//! - `server`: router assembly and startup wiring
//! - `config`: environment variable configuration
//! - `clients`: HTTP clients for the aggregator, chain API, price oracle, minter and chat backend
//! - `database`: Postgres pool, migrations and stores
//! - `services`: swap orchestration, portfolio rules, mint retries, rate limiting, investment intake
//! - `chat`: streaming tool-call protocol decoder and chat sessions
//! - `routes`: HTTP handlers, one module per API area
//!
//! ## Environment Setup
//! ```bash
//! cp .env.example .env
//! # set DATABASE_URL and MINT_URL at minimum
//! ```
//!
//! ## Running the Server
//! ```bash
//! cargo run
//! curl http://localhost:3000/ping
//! ```

mod chat;
mod clients;
mod config;
mod database;
mod error;
mod routes;
mod server;
mod services;
mod state_structs;

#[cfg(test)]
mod test_support;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).compact())
        .init();

    tracing::info!("🏁 Starting Trickle Server...");
    tracing::info!("📦 Package: {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!("🏗️  Build profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });

    let config = Config::from_env()?;

    // runs until the listener fails or the process is terminated
    server::start(config).await.inspect_err(|e| {
        tracing::error!("❌ Server stopped: {:#}", e);
    })
}

//! # Server Module
//!
//! HTTP server setup and route configuration for the Trickle server.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use axum::http::{HeaderValue, Method, header};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::chat::ChatRelay;
use crate::clients::{
    AggregatorClient, ChainWriter, ChatBackend, ChatBackendClient, CoinGeckoOracle, FixedRateOracle,
    HttpLoyaltyMinter, LoyaltyMinter, MultiBaasClient, PriceOracle, build_http_client,
};
use crate::config::Config;
use crate::database::{DatabaseConnection, PortfolioStore};
use crate::routes;
use crate::routes::health::ping;
use crate::services::{
    AllocationSwapEngine, BucketRate, InvestmentLedger, MintDispatcher, PortfolioService, RateLimiter, RetryPolicy,
    SwapCollaborators, SwapEngineSettings, Upstream,
};

/// Application state shared across all route handlers
#[derive(Clone)]
pub struct AppState {
    pub swap_engine: Arc<AllocationSwapEngine>,
    pub portfolio: PortfolioService,
    pub investments: Arc<InvestmentLedger>,
    pub chain_writer: Option<Arc<dyn ChainWriter>>,
    pub chat: Arc<ChatRelay>,
    pub store: Arc<dyn PortfolioStore>,
}

/// Every route of the API, with state applied
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .merge(routes::health::create_routes())
        .merge(routes::swaps::create_routes())
        .merge(routes::portfolio::create_routes())
        .merge(routes::investments::create_routes())
        .merge(routes::webhooks::create_routes())
        .merge(routes::chat::create_routes())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .allow_credentials(true))
}

/// Starts the Trickle HTTP server.
///
/// Connects to Postgres and applies migrations, builds the upstream clients
/// and services, spawns the mint dispatcher and serves until the process is
/// terminated.
pub async fn start(config: Config) -> Result<()> {
    let database_url = config
        .database
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;
    let db = Arc::new(DatabaseConnection::from_url(database_url, config.database.max_connections).await?);
    db.migrate().await?;

    let http = build_http_client(config.http_timeout)?;
    let swap = &config.swap;

    let chain_writer: Option<Arc<dyn ChainWriter>> = match &config.multibaas {
        Some(multibaas) => Some(Arc::new(MultiBaasClient::new(multibaas.clone(), http.clone()))),
        None => {
            tracing::warn!("⚠️  MultiBaas is not configured, swap batches will be rejected");
            None
        }
    };

    let oracle: Arc<dyn PriceOracle> = match swap.fixed_native_usd_price {
        Some(price) => {
            tracing::info!("💲 Using fixed native price {}", price);
            Arc::new(FixedRateOracle(price))
        }
        None => Arc::new(CoinGeckoOracle::new(
            swap.price_oracle_url.clone(),
            swap.native_asset_id.clone(),
            http.clone(),
        )),
    };

    let minter: Arc<dyn LoyaltyMinter> = match &swap.mint_url {
        Some(url) => Arc::new(HttpLoyaltyMinter::new(url.clone(), http.clone())),
        None => return Err(anyhow!("MINT_URL must be set")),
    };

    let (mints, _mint_task) = MintDispatcher::new(
        minter,
        db.clone(),
        RetryPolicy {
            max_attempts: swap.mint_max_attempts,
            base_delay: swap.mint_retry_base,
        },
    )
    .spawn();

    let limiter = Arc::new(RateLimiter::new([
        (
            Upstream::Aggregator,
            BucketRate {
                requests_per_second: swap.aggregator_rps,
                burst: swap.rate_limit_burst,
            },
        ),
        (
            Upstream::ChainWriter,
            BucketRate {
                requests_per_second: swap.chain_writer_rps,
                burst: swap.rate_limit_burst,
            },
        ),
    ]));

    let swap_engine = Arc::new(AllocationSwapEngine::new(
        SwapCollaborators {
            portfolio: db.clone(),
            sagas: db.clone(),
            aggregator: Arc::new(AggregatorClient::new(
                swap.aggregator_url.clone(),
                swap.aggregator_api_key.clone(),
                http.clone(),
            )),
            chain_writer: chain_writer.clone(),
            oracle,
            limiter,
            mints,
        },
        SwapEngineSettings::from(swap),
    ));

    let chat_backend: Option<Arc<dyn ChatBackend>> = config
        .chat
        .backend_url
        .as_ref()
        .map(|url| Arc::new(ChatBackendClient::new(url.clone(), http.clone())) as Arc<dyn ChatBackend>);

    let app_state = AppState {
        swap_engine,
        portfolio: PortfolioService::new(db.clone()),
        investments: Arc::new(InvestmentLedger::new(db.clone())),
        chain_writer,
        chat: Arc::new(ChatRelay::new(chat_backend)),
        store: db.clone(),
    };

    let app = build_router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.server.cors_origins)?),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}, port may already be in use"))?;

    tracing::info!("🚀 Trickle Server starting...");
    tracing::info!("📡 Listening on http://{}", addr);
    tracing::info!("🏥 Health check available at http://{}/ping", addr);
    tracing::info!("💱 Swap endpoints available at http://{}/api/v1/swaps/*", addr);
    tracing::info!("💬 Chat endpoints available at http://{}/api/v1/chat", addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

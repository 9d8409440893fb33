//! In-memory doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use chrono::Utc;
use futures::stream;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::chat::{ChatMessage, ChatRelay};
use crate::clients::{
    ChainWriter, ChatBackend, ChatByteStream, ClientError, FixedRateOracle, LoyaltyMinter, MethodCall,
    SwapAggregator, SwapQuote, SwapQuoteRequest, UnsignedTx,
};
use crate::database::{
    AllocationEntry, EventStore, InvestmentEvent, PortfolioStore, SagaStep, SagaStore, SwapSaga,
};
use crate::server::{AppState, build_router};
use crate::services::{
    AllocationSwapEngine, BucketRate, InvestmentLedger, MintDispatcher, PortfolioService, RateLimiter, RetryPolicy,
    SwapCollaborators, SwapEngineSettings, Upstream,
};

/// Every variable `Config::from_env` reads
const CONFIG_KEYS: &[&str] = &[
    "DATABASE_URL",
    "DATABASE_MAX_CONNECTIONS",
    "SERVER_HOST",
    "PORT",
    "SERVER_PORT",
    "CORS_ORIGINS",
    "MULTIBAAS_URL",
    "MULTIBAAS_API_KEY",
    "MULTIBAAS_CONTRACT_ADDRESS",
    "MULTIBAAS_CONTRACT_LABEL",
    "AGGREGATOR_URL",
    "AGGREGATOR_API_KEY",
    "PRICE_ORACLE_URL",
    "NATIVE_ASSET_ID",
    "NATIVE_USD_PRICE",
    "MINT_URL",
    "PORTFOLIO_OWNER",
    "SWAP_SLIPPAGE_BPS",
    "AGGREGATOR_RPS",
    "CHAIN_WRITER_RPS",
    "RATE_LIMIT_BURST",
    "MINT_MAX_ATTEMPTS",
    "MINT_RETRY_BASE_MS",
    "CHAT_BACKEND_URL",
    "HTTP_TIMEOUT_SECS",
];

/// Runs `f` with every config variable cleared except `vars`, under a
/// process-wide lock so tests never observe each other's environment.
pub(crate) fn with_env<T>(vars: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = LOCK.get_or_init(|| Mutex::new(())).lock();

    let previous = CONFIG_KEYS
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect::<Vec<_>>();

    for name in CONFIG_KEYS {
        unsafe { std::env::remove_var(name) };
    }
    for (name, value) in vars {
        unsafe { std::env::set_var(name, value) };
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    for (name, value) in previous {
        match value {
            Some(v) => unsafe { std::env::set_var(name, v) },
            None => unsafe { std::env::remove_var(name) },
        }
    }

    match result {
        Ok(output) => output,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

pub(crate) fn allocation(token: &str, token_address: &str, proportion: f64) -> AllocationEntry {
    AllocationEntry {
        token: token.to_string(),
        token_address: token_address.to_string(),
        proportion,
    }
}

pub(crate) fn saga_at(step: SagaStep) -> SwapSaga {
    let mut saga = SwapSaga::new(Uuid::new_v4(), "0xabc", &allocation("USDC", "0xusdc", 0.3), 1_000, 300);
    saga.step = step;
    saga
}

// ============================================================================
// STORES
// ============================================================================

#[derive(Default)]
pub(crate) struct MemoryPortfolioStore {
    rows: Mutex<Vec<(String, AllocationEntry)>>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryPortfolioStore {
    pub fn seed(&self, owner: &str, entries: Vec<AllocationEntry>) {
        self.rows
            .lock()
            .extend(entries.into_iter().map(|entry| (owner.to_string(), entry)));
    }

    pub fn rows(&self, owner: &str) -> Vec<AllocationEntry> {
        self.rows
            .lock()
            .iter()
            .filter(|(o, _)| o == owner)
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.rows.lock().clear();
    }

    pub fn fail_next(&self, message: &str) {
        *self.fail_next.lock() = Some(message.to_string());
    }

    fn take_failure(&self) -> Result<()> {
        match self.fail_next.lock().take() {
            Some(message) => Err(anyhow!(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PortfolioStore for MemoryPortfolioStore {
    async fn load_allocations(&self, owner: Option<&str>) -> Result<Vec<AllocationEntry>> {
        self.take_failure()?;
        Ok(self
            .rows
            .lock()
            .iter()
            .filter(|(o, _)| owner.is_none_or(|owner| owner == o))
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn replace_allocations(&self, owner: &str, entries: &[AllocationEntry]) -> Result<Vec<AllocationEntry>> {
        self.take_failure()?;
        let mut rows = self.rows.lock();
        rows.retain(|(o, _)| o != owner);
        rows.extend(entries.iter().map(|entry| (owner.to_string(), entry.clone())));
        Ok(entries.to_vec())
    }
}

#[derive(Default)]
pub(crate) struct MemorySagaStore {
    sagas: Mutex<Vec<SwapSaga>>,
}

impl MemorySagaStore {
    pub fn seed(&self, saga: SwapSaga) {
        self.sagas.lock().push(saga);
    }

    pub fn get(&self, id: Uuid) -> Option<SwapSaga> {
        self.sagas.lock().iter().find(|s| s.id == id).cloned()
    }

    pub fn all(&self) -> Vec<SwapSaga> {
        self.sagas.lock().clone()
    }
}

#[async_trait]
impl SagaStore for MemorySagaStore {
    async fn insert_saga(&self, saga: &SwapSaga) -> Result<()> {
        self.sagas.lock().push(saga.clone());
        Ok(())
    }

    async fn advance_saga(
        &self,
        id: Uuid,
        step: SagaStep,
        tx_hash: Option<&str>,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut sagas = self.sagas.lock();
        let saga = sagas
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("swap saga {id} not found"))?;
        saga.step = step;
        if let Some(hash) = tx_hash {
            saga.tx_hash = Some(hash.to_string());
        }
        saga.last_error = last_error.map(str::to_string);
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn incomplete_sagas(&self) -> Result<Vec<SwapSaga>> {
        Ok(self
            .sagas
            .lock()
            .iter()
            .filter(|s| s.step.is_incomplete())
            .cloned()
            .collect())
    }

    async fn batch_sagas(&self, batch_id: Uuid) -> Result<Vec<SwapSaga>> {
        Ok(self
            .sagas
            .lock()
            .iter()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryEventStore {
    events: Mutex<Vec<InvestmentEvent>>,
}

impl MemoryEventStore {
    pub fn events(&self) -> Vec<InvestmentEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert_event_once(&self, event: &InvestmentEvent) -> Result<bool> {
        let mut events = self.events.lock();
        if events.iter().any(|e| e.unique_id == event.unique_id) {
            return Ok(false);
        }
        events.push(event.clone());
        Ok(true)
    }
}

// ============================================================================
// UPSTREAMS
// ============================================================================

fn upstream_error(message: &str) -> ClientError {
    ClientError::Upstream {
        status: 400,
        message: message.to_string(),
    }
}

/// Answers every request with calldata unless told otherwise per destination token
#[derive(Default)]
pub(crate) struct MockAggregator {
    requests: Mutex<Vec<SwapQuoteRequest>>,
    failures: Mutex<HashMap<String, String>>,
    without_tx: Mutex<HashSet<String>>,
}

impl MockAggregator {
    pub fn fail_for(&self, dst: &str, message: &str) {
        self.failures.lock().insert(dst.to_string(), message.to_string());
    }

    pub fn no_tx_for(&self, dst: &str) {
        self.without_tx.lock().insert(dst.to_string());
    }

    pub fn requests(&self) -> Vec<SwapQuoteRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl SwapAggregator for MockAggregator {
    async fn build_swap(&self, request: &SwapQuoteRequest) -> Result<SwapQuote, ClientError> {
        self.requests.lock().push(request.clone());

        if let Some(message) = self.failures.lock().get(&request.dst) {
            return Err(upstream_error(message));
        }
        if self.without_tx.lock().contains(&request.dst) {
            return Ok(SwapQuote { tx: None });
        }

        Ok(SwapQuote {
            tx: Some(UnsignedTx {
                from: Some(request.from.clone()),
                to: "0xrouter".to_string(),
                data: Some(format!("0xswap{}", request.dst.trim_start_matches("0x"))),
                value: Some(request.amount.to_string()),
                gas: Some(210_000),
                gas_price: Some("1000000".to_string()),
            }),
        })
    }
}

#[derive(Default)]
pub(crate) struct MockChainWriter {
    submitted: Mutex<Vec<UnsignedTx>>,
    calls: Mutex<Vec<(String, MethodCall)>>,
    method_failure: Mutex<Option<String>>,
}

impl MockChainWriter {
    pub fn fail_methods(&self, message: &str) {
        *self.method_failure.lock() = Some(message.to_string());
    }

    pub fn submitted(&self) -> Vec<UnsignedTx> {
        self.submitted.lock().clone()
    }

    pub fn method_calls(&self) -> Vec<(String, MethodCall)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChainWriter for MockChainWriter {
    async fn submit_transaction(&self, tx: &UnsignedTx) -> Result<String, ClientError> {
        let mut submitted = self.submitted.lock();
        submitted.push(tx.clone());
        Ok(format!("0x{:064x}", submitted.len()))
    }

    async fn call_method(&self, method: &str, call: &MethodCall) -> Result<Value, ClientError> {
        self.calls.lock().push((method.to_string(), call.clone()));
        match self.method_failure.lock().as_deref() {
            Some(message) => Err(upstream_error(message)),
            None => Ok(json!({"status": 200, "message": "success", "result": {"tx": {}}})),
        }
    }
}

#[derive(Default)]
pub(crate) struct MockMinter {
    failures_left: AtomicU32,
    attempts: AtomicU32,
    minted: Mutex<Vec<(String, u64)>>,
}

impl MockMinter {
    pub fn failing_times(times: u32) -> Self {
        Self {
            failures_left: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn minted(&self) -> Vec<(String, u64)> {
        self.minted.lock().clone()
    }
}

#[async_trait]
impl LoyaltyMinter for MockMinter {
    async fn mint(&self, user_address: &str, amount: u64) -> Result<(), ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(upstream_error("mint endpoint unavailable"));
        }
        self.minted.lock().push((user_address.to_string(), amount));
        Ok(())
    }
}

/// Replays the same chunks for every request
pub(crate) struct MockChatBackend {
    chunks: Vec<Vec<u8>>,
    failure: Option<String>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Value)>>,
}

impl MockChatBackend {
    pub fn replying(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::replying(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<(Vec<ChatMessage>, Value)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn stream_reply(&self, messages: &[ChatMessage], tool_defaults: &Value) -> Result<ChatByteStream, ClientError> {
        self.requests.lock().push((messages.to_vec(), tool_defaults.clone()));
        if let Some(message) = &self.failure {
            return Err(upstream_error(message));
        }
        let chunks: Vec<Result<Vec<u8>, ClientError>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Application state wired to the in-memory doubles above
pub(crate) struct TestApp {
    pub state: AppState,
    pub portfolio: Arc<MemoryPortfolioStore>,
    pub sagas: Arc<MemorySagaStore>,
    pub events: Arc<MemoryEventStore>,
    pub aggregator: Arc<MockAggregator>,
    pub chain_writer: Arc<MockChainWriter>,
    pub minter: Arc<MockMinter>,
}

impl TestApp {
    /// Must be called inside a tokio runtime; spawns the mint dispatcher
    pub fn new() -> Self {
        let portfolio = Arc::new(MemoryPortfolioStore::default());
        portfolio.seed(
            "default",
            vec![
                allocation("USDC", "0xusdc", 0.5),
                allocation("WBTC", "0xwbtc", 0.3),
                allocation("AERO", "0xaero", 0.2),
            ],
        );
        let sagas = Arc::new(MemorySagaStore::default());
        let events = Arc::new(MemoryEventStore::default());
        let aggregator = Arc::new(MockAggregator::default());
        let chain_writer = Arc::new(MockChainWriter::default());
        let minter = Arc::new(MockMinter::default());

        let (mints, _) = MintDispatcher::new(
            minter.clone(),
            sagas.clone(),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(5),
            },
        )
        .spawn();
        let rate = BucketRate {
            requests_per_second: 1_000.0,
            burst: 10,
        };

        let swap_engine = Arc::new(AllocationSwapEngine::new(
            SwapCollaborators {
                portfolio: portfolio.clone(),
                sagas: sagas.clone(),
                aggregator: aggregator.clone(),
                chain_writer: Some(chain_writer.clone() as Arc<dyn ChainWriter>),
                oracle: Arc::new(FixedRateOracle(Decimal::from(1807))),
                limiter: Arc::new(RateLimiter::new([(Upstream::Aggregator, rate), (Upstream::ChainWriter, rate)])),
                mints,
            },
            SwapEngineSettings {
                portfolio_owner: None,
                slippage_bps: 500,
            },
        ));

        let chat_backend: Arc<dyn ChatBackend> = Arc::new(MockChatBackend::replying(vec![
            b"0:\"Here is \"\n".to_vec(),
            b"a:{\"result\":\"{\\\"type\\\":\\\"allocation\\\",\\\"toolCallId\\\":\\\"t1\\\"}\"}\n0:\"your allocation\"\n".to_vec(),
            b"e:{}\n".to_vec(),
        ]));

        let state = AppState {
            swap_engine,
            portfolio: PortfolioService::new(portfolio.clone()),
            investments: Arc::new(InvestmentLedger::new(events.clone())),
            chain_writer: Some(chain_writer.clone() as Arc<dyn ChainWriter>),
            chat: Arc::new(ChatRelay::new(Some(chat_backend))),
            store: portfolio.clone(),
        };

        Self {
            state,
            portfolio,
            sagas,
            events,
            aggregator,
            chain_writer,
            minter,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

async fn read_response(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

/// Drive one request through the router, JSON in and out
pub(crate) async fn send(router: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    read_response(router.oneshot(request).await.unwrap()).await
}

/// POST a plain-text body
pub(crate) async fn send_text(router: Router, uri: &str, body: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(body.to_string()))
        .unwrap();

    read_response(router.oneshot(request).await.unwrap()).await
}

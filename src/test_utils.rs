//! In-memory collaborators shared by the unit tests

use crate::cache::{MemorySequenceCache, SequenceCache, ShadowLedger};
use crate::chain::{ChainGateway, TxStatus};
use crate::config::{CacheConfig, TelemetryConfig};
use crate::context::DispatchContext;
use crate::error::{CacheError, ChainError};
use crate::events::{Telemetry, TelemetryRecord};
use crate::tx::{NonceSequencer, TransactionBroadcaster};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const CHAIN_ID: u64 = 137;
pub(crate) const CLEANUP_INTERVAL: u64 = 3;

/// Chain whose transaction count, statuses and receipts are set by the test.
/// Hashes without a recorded status read as pending; without a receipt, as dropped.
pub(crate) struct FakeChain {
    count: AtomicU64,
    statuses: DashMap<H256, TxStatus>,
    receipts: DashMap<H256, TransactionReceipt>,
    estimate: Mutex<Result<U256, ChainError>>,
}

impl FakeChain {
    pub fn new(count: u64) -> Self {
        Self {
            count: AtomicU64::new(count),
            statuses: DashMap::new(),
            receipts: DashMap::new(),
            estimate: Mutex::new(Ok(U256::from(21_000))),
        }
    }

    pub fn set_count(&self, count: u64) {
        self.count.store(count, Ordering::SeqCst);
    }

    pub fn set_status(&self, hash: H256, status: TxStatus) {
        self.statuses.insert(hash, status);
    }

    pub fn set_receipt(&self, receipt: TransactionReceipt) {
        self.receipts.insert(receipt.transaction_hash, receipt);
    }

    pub fn fail_estimate(&self, err: ChainError) {
        *self.estimate.lock().unwrap() = Err(err);
    }
}

#[async_trait]
impl ChainGateway for FakeChain {
    fn chain_id(&self) -> u64 {
        CHAIN_ID
    }

    async fn confirmed_transaction_count(&self, _address: Address) -> Result<u64, ChainError> {
        Ok(self.count.load(Ordering::SeqCst))
    }

    async fn transaction_status(&self, hash: H256) -> Result<TxStatus, ChainError> {
        Ok(self
            .statuses
            .get(&hash)
            .map(|s| *s)
            .unwrap_or(TxStatus::Pending))
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<U256, ChainError> {
        self.estimate.lock().unwrap().clone()
    }

    async fn send_raw_transaction(&self, _raw: Bytes) -> Result<H256, ChainError> {
        Err(ChainError::Transport("raw broadcast is not faked".to_string()))
    }

    async fn wait_for_receipt(&self, hash: H256) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(self.receipts.get(&hash).map(|r| r.clone()))
    }
}

/// Broadcaster returning scripted results; records what it was asked to send
pub(crate) struct FakeBroadcaster {
    address: Address,
    script: Mutex<VecDeque<Result<H256, ChainError>>>,
    sent: Mutex<Vec<TypedTransaction>>,
    delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeBroadcaster {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            delay_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn push_result(&self, result: Result<H256, ChainError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<TypedTransaction> {
        self.sent.lock().unwrap().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionBroadcaster for FakeBroadcaster {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_and_send(&self, tx: TypedTransaction) -> Result<H256, ChainError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let nonce = tx.nonce().map(|n| n.as_u64()).unwrap_or_default();
        self.sent.lock().unwrap().push(tx);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(H256::from_low_u64_be(0xbeef_0000 + nonce)))
    }
}

/// Reads as a cold cache; every write fails
pub(crate) struct WriteFailingCache;

fn refused() -> CacheError {
    CacheError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

#[async_trait]
impl SequenceCache for WriteFailingCache {
    async fn get_int(&self, _key: &str) -> Result<Option<u64>, CacheError> {
        Ok(None)
    }

    async fn set_int(&self, _key: &str, _value: u64) -> Result<(), CacheError> {
        Err(refused())
    }

    async fn get_hash_field(&self, _map: &str, _field: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set_hash_field(&self, _map: &str, _field: &str, _value: &str) -> Result<(), CacheError> {
        Err(refused())
    }

    async fn delete_hash_fields(&self, _map: &str, _fields: &[String]) -> Result<u64, CacheError> {
        Err(refused())
    }
}

/// In-process cache whose deletes fail; counts the attempts
#[derive(Default)]
pub(crate) struct DeleteFailingCache {
    inner: MemorySequenceCache,
    delete_attempts: AtomicUsize,
}

impl DeleteFailingCache {
    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SequenceCache for DeleteFailingCache {
    async fn get_int(&self, key: &str) -> Result<Option<u64>, CacheError> {
        self.inner.get_int(key).await
    }

    async fn set_int(&self, key: &str, value: u64) -> Result<(), CacheError> {
        self.inner.set_int(key, value).await
    }

    async fn get_hash_field(&self, map: &str, field: &str) -> Result<Option<String>, CacheError> {
        self.inner.get_hash_field(map, field).await
    }

    async fn set_hash_field(&self, map: &str, field: &str, value: &str) -> Result<(), CacheError> {
        self.inner.set_hash_field(map, field, value).await
    }

    async fn delete_hash_fields(&self, _map: &str, _fields: &[String]) -> Result<u64, CacheError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        Err(refused())
    }
}

pub(crate) fn cache_config() -> CacheConfig {
    CacheConfig {
        url: "memory://".to_string(),
        nonce_key: "nonce".to_string(),
        hashmap_key: "pending".to_string(),
        cleanup_interval: CLEANUP_INTERVAL,
    }
}

/// Poll `check` every few milliseconds until it holds or a second passes
pub(crate) async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let poll = async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(1), poll).await.is_ok()
}

/// One operator account wired to fakes
pub(crate) struct Harness {
    pub chain: Arc<FakeChain>,
    pub cache: Arc<MemorySequenceCache>,
    pub ctx: DispatchContext,
    pub sequencer: Arc<NonceSequencer>,
    pub telemetry: Telemetry,
    pub operator: Address,
    events: Mutex<mpsc::Receiver<TelemetryRecord>>,
    seen: Mutex<Vec<TelemetryRecord>>,
}

pub(crate) fn harness(chain_count: u64) -> Harness {
    let chain = Arc::new(FakeChain::new(chain_count));
    let cache = Arc::new(MemorySequenceCache::new());
    let ledger = ShadowLedger::new(cache.clone(), &cache_config());
    let (telemetry, events) = Telemetry::channel(&TelemetryConfig {
        network_name: "polygon".to_string(),
        environment: "test".to_string(),
        channel_capacity: 256,
    });

    Harness {
        ctx: DispatchContext::new(chain.clone(), ledger),
        sequencer: Arc::new(NonceSequencer::new(CLEANUP_INTERVAL, telemetry.clone())),
        chain,
        cache,
        telemetry,
        operator: Address::repeat_byte(0x0a),
        events: Mutex::new(events),
        seen: Mutex::new(Vec::new()),
    }
}

impl Harness {
    /// Point the ledger at a different cache engine
    pub fn with_cache(mut self, cache: Arc<dyn SequenceCache>) -> Self {
        self.ctx.ledger = ShadowLedger::new(cache, &cache_config());
        self
    }

    /// Number of telemetry records of `event_type` emitted so far
    pub fn events_of(&self, event_type: &str) -> usize {
        let mut seen = self.seen.lock().unwrap();
        let mut events = self.events.lock().unwrap();
        while let Ok(record) = events.try_recv() {
            seen.push(record);
        }
        seen.iter().filter(|r| r.event_type == event_type).count()
    }
}

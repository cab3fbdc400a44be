//! Shared test doubles for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use paykit_autopay::{
    AutoPayConfig, AutoPayEngine, AutoPayRule, ConfirmationSource, Direction, EndpointPublisher,
    ExecutorError, GlobalSettings, KeyValueStore, MemoryStore, NewEndpoint, PaymentExecutor,
    PaymentRequest, Receipt, StoreError,
};

pub const ME: &str = "pk:me";

/// What the mock executor does on each call.
#[derive(Clone, Debug)]
pub enum ExecutorBehavior {
    Succeed,
    Fail(ExecutorError),
    /// Sleep for the given time, then succeed.
    Delay(Duration),
    /// Never answer.
    Hang,
}

pub struct MockExecutor {
    behavior: Mutex<ExecutorBehavior>,
    calls: AtomicU32,
}

impl MockExecutor {
    pub fn new(behavior: ExecutorBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicU32::new(0),
        })
    }

    pub fn succeeding() -> Arc<Self> {
        Self::new(ExecutorBehavior::Succeed)
    }

    pub fn set_behavior(&self, behavior: ExecutorBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentExecutor for MockExecutor {
    async fn pay(
        &self,
        request: &PaymentRequest,
        _timeout: Duration,
    ) -> Result<Receipt, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            ExecutorBehavior::Succeed => Ok(Receipt::for_request(request).with_proof("preimage")),
            ExecutorBehavior::Fail(e) => Err(e),
            ExecutorBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Receipt::for_request(request))
            }
            ExecutorBehavior::Hang => std::future::pending().await,
        }
    }
}

#[derive(Default)]
pub struct MockPublisher {
    rotations: Mutex<Vec<String>>,
    fail: std::sync::atomic::AtomicBool,
}

impl MockPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let publisher = Self::default();
        publisher.fail.store(true, Ordering::SeqCst);
        Arc::new(publisher)
    }

    pub fn rotations(&self) -> Vec<String> {
        self.rotations.lock().unwrap().clone()
    }
}

#[async_trait]
impl EndpointPublisher for MockPublisher {
    async fn rotate(&self, method_id: &str) -> paykit_autopay::Result<NewEndpoint> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(paykit_autopay::AutoPayError::validation(
                "endpoint",
                "publisher offline",
            ));
        }
        let mut rotations = self.rotations.lock().unwrap();
        rotations.push(method_id.to_string());
        Ok(NewEndpoint {
            method_id: method_id.to_string(),
            endpoint: format!("{}-endpoint-{}", method_id, rotations.len()),
        })
    }
}

/// Confirms a receipt on the `after`-th probe.
pub struct MockConfirmations {
    after: u32,
    probes: AtomicU32,
}

impl MockConfirmations {
    pub fn after(after: u32) -> Arc<Self> {
        Arc::new(Self {
            after,
            probes: AtomicU32::new(0),
        })
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationSource for MockConfirmations {
    async fn is_confirmed(&self, _receipt: &Receipt) -> paykit_autopay::Result<bool> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(n >= self.after)
    }
}

/// An incoming request from `peer` asking this wallet to pay them.
pub fn incoming(peer: &str, amount_sats: u64, method_id: &str) -> PaymentRequest {
    PaymentRequest::new(peer, ME, amount_sats, method_id, Direction::Incoming)
}

/// In-memory engine with auto-pay enabled and the given settings tweaks.
pub async fn engine_with(settings: GlobalSettings) -> AutoPayEngine {
    let engine = AutoPayEngine::new(Arc::new(MemoryStore::new()), AutoPayConfig::new("me"))
        .expect("engine");
    engine.settings().save(&settings).await.expect("save settings");
    engine
}

/// Settings with auto-pay on and one allow-everything rule under `max`.
pub fn allow_up_to(max: u64) -> GlobalSettings {
    GlobalSettings::default()
        .with_enabled(true)
        .with_rule(AutoPayRule::new("allow small").with_id("allow").with_max_amount(max))
}

/// Memory store that yields to the scheduler before every operation, the
/// way real I/O does, so concurrent flows interleave.
#[derive(Default)]
pub struct YieldingStore {
    inner: MemoryStore,
}

impl YieldingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        tokio::task::yield_now().await;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.delete(key).await
    }
}

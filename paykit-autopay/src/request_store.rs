//! Persistent storage for payment requests.

use std::sync::Arc;

use tracing::debug;

use crate::locks::KeyedLocks;
use crate::request::{Direction, PaymentRequest, RequestStatus};
use crate::store::{load_json, save_json, KeyValueStore, StoreKeys};
use crate::{AutoPayError, Result};

/// Filter for [`RequestStore::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    /// Matches either side of the request.
    pub peer: Option<String>,
    pub status: Option<RequestStatus>,
    pub direction: Option<Direction>,
}

impl RequestFilter {
    fn matches(&self, request: &PaymentRequest) -> bool {
        if let Some(peer) = &self.peer {
            if &request.from_peer != peer && &request.to_peer != peer {
                return false;
            }
        }
        if matches!(self.status, Some(status) if request.status != status) {
            return false;
        }
        if matches!(self.direction, Some(direction) if request.direction != direction) {
            return false;
        }
        true
    }
}

/// Stores payment requests and enforces monotonic status.
pub struct RequestStore {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    locks: KeyedLocks,
}

impl RequestStore {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: StoreKeys) -> Self {
        Self {
            store,
            keys,
            locks: KeyedLocks::new(),
        }
    }

    /// Insert a request unless one with the same id exists. Returns true if
    /// it was inserted.
    pub async fn save(&self, request: &PaymentRequest) -> Result<bool> {
        request.validate()?;
        let _guard = self.locks.lock(&format!("req:{}", request.id)).await;

        let key = self.keys.request(&request.id);
        if self.store.get(&key).await?.is_some() {
            return Ok(false);
        }
        save_json(self.store.as_ref(), &key, request).await?;

        let _index_guard = self.locks.lock("index").await;
        let index_key = self.keys.requests_index();
        let mut index: Vec<String> = load_json(self.store.as_ref(), &index_key)
            .await?
            .unwrap_or_default();
        if !index.contains(&request.id) {
            index.push(request.id.clone());
            save_json(self.store.as_ref(), &index_key, &index).await?;
        }
        debug!(request_id = %request.id, "Saved payment request");
        Ok(true)
    }

    pub async fn get(&self, request_id: &str) -> Result<Option<PaymentRequest>> {
        load_json(self.store.as_ref(), &self.keys.request(request_id)).await
    }

    /// Like [`get`](Self::get) but a missing request is an error.
    pub async fn require(&self, request_id: &str) -> Result<PaymentRequest> {
        self.get(request_id)
            .await?
            .ok_or_else(|| AutoPayError::not_found("request", request_id))
    }

    /// List requests matching `filter`, newest first.
    pub async fn list(&self, filter: &RequestFilter) -> Result<Vec<PaymentRequest>> {
        let index: Vec<String> = load_json(self.store.as_ref(), &self.keys.requests_index())
            .await?
            .unwrap_or_default();

        let mut requests = Vec::with_capacity(index.len());
        for id in index {
            if let Some(request) = self.get(&id).await? {
                if filter.matches(&request) {
                    requests.push(request);
                }
            }
        }
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    /// Move a request to `status`. Setting the current status again is a
    /// no-op; any other illegal move is `InvalidTransition`.
    pub async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<PaymentRequest> {
        let _guard = self.locks.lock(&format!("req:{}", request_id)).await;
        let mut request = self.require(request_id).await?;

        if request.status == status {
            return Ok(request);
        }
        if !request.status.can_transition_to(status) {
            return Err(AutoPayError::invalid_transition(request.status, status));
        }

        debug!(request_id, from = %request.status, to = %status, "Request status changed");
        request.status = status;
        save_json(self.store.as_ref(), &self.keys.request(request_id), &request).await?;
        Ok(request)
    }

    /// Move a request from `expected` to `next` only if it is still in
    /// `expected`. Exactly one of several concurrent callers wins; the others
    /// get `InvalidTransition` naming the status they found.
    pub async fn compare_and_set(
        &self,
        request_id: &str,
        expected: RequestStatus,
        next: RequestStatus,
    ) -> Result<PaymentRequest> {
        let _guard = self.locks.lock(&format!("req:{}", request_id)).await;
        let mut request = self.require(request_id).await?;

        if request.status != expected || !expected.can_transition_to(next) {
            return Err(AutoPayError::invalid_transition(request.status, next));
        }

        debug!(request_id, from = %request.status, to = %next, "Request status changed");
        request.status = next;
        save_json(self.store.as_ref(), &self.keys.request(request_id), &request).await?;
        Ok(request)
    }

    /// Take a pending request for execution.
    pub async fn claim(&self, request_id: &str) -> Result<PaymentRequest> {
        self.compare_and_set(request_id, RequestStatus::Pending, RequestStatus::Accepted)
            .await
    }
}

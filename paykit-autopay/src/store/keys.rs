//! Store key layout.
//!
//! Every key is namespaced by the wallet identity so several identities can
//! share one backend.

/// Derives store keys for one wallet identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    identity: String,
}

impl StoreKeys {
    /// Create the key set for `identity`.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    /// Identity these keys belong to.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn settings(&self) -> String {
        format!("paykit.autopay.{}.settings", self.identity)
    }

    pub fn peer_limit(&self, peer_id: &str) -> String {
        format!("paykit.autopay.{}.limit.{}", self.identity, peer_id)
    }

    /// Index of every peer that has a persisted limit.
    pub fn peer_limits_index(&self) -> String {
        format!("paykit.autopay.{}.limits", self.identity)
    }

    pub fn global_spend(&self) -> String {
        format!("paykit.autopay.{}.global_spend", self.identity)
    }

    /// Journal of reservations that are neither committed nor rolled back.
    pub fn reservations(&self) -> String {
        format!("paykit.autopay.{}.reservations", self.identity)
    }

    pub fn autopay_history(&self) -> String {
        format!("paykit.autopay.{}.history", self.identity)
    }

    pub fn request(&self, request_id: &str) -> String {
        format!("paykit.requests.{}.{}", self.identity, request_id)
    }

    pub fn requests_index(&self) -> String {
        format!("paykit.requests.{}.index", self.identity)
    }

    pub fn rotation_config(&self) -> String {
        format!("paykit.rotation.{}.config", self.identity)
    }

    pub fn rotation_method(&self, method_id: &str) -> String {
        format!("paykit.rotation.{}.method.{}", self.identity, method_id)
    }

    pub fn rotation_methods_index(&self) -> String {
        format!("paykit.rotation.{}.methods", self.identity)
    }

    pub fn rotation_history(&self) -> String {
        format!("paykit.rotation.{}.history", self.identity)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("default")
    }
}

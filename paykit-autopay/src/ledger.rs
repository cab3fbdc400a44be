//! Spending limit ledger.
//!
//! Tracks cumulative spend per peer and wallet-wide, with
//! reserve/commit/rollback semantics so a payment's amount is held against
//! both limits before the executor runs.
//!
//! # Atomicity
//!
//! The store has no multi-key transactions, so the ledger provides them:
//!
//! - A reserve or rollback holds the peer section and then the global
//!   section for its whole read-check-write. Concurrent reservations for the
//!   same peer or against the global counter serialize; there is no lost
//!   update.
//! - Every live reservation is written to a journal before any counter is
//!   touched. A failed counter write compensates the earlier writes.
//! - Rollback removes the journal entry last, so a rollback that cannot
//!   complete leaves the reservation visible in
//!   [`pending_reservations`](LimitLedger::pending_reservations) for a later
//!   [`rollback_pending`](LimitLedger::rollback_pending).
//!
//! Lock order is peer, global, journal, index.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::LedgerConfig;
use crate::limits::{GlobalSpend, LimitScope, PeerLimit, SpendingPeriod};
use crate::locks::KeyedLocks;
use crate::settings::SettingsStore;
use crate::store::{load_json, save_json, KeyValueStore, StoreKeys};
use crate::{AutoPayError, Result};

const GLOBAL_LOCK: &str = "global";
const JOURNAL_LOCK: &str = "journal";
const INDEX_LOCK: &str = "index";

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

type Journal = BTreeMap<String, ReservationRecord>;

/// Durable description of a live reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub id: String,
    pub peer_id: String,
    /// Amount added to both the peer and the global counter.
    pub amount_sats: u64,
    /// `last_reset_at` of the peer limit when the amount was applied.
    pub peer_period_start: DateTime<Utc>,
    /// `last_reset_at` of the global counter when the amount was applied.
    pub global_period_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A provisional hold against the spending limits.
///
/// The token is consumed by [`LimitLedger::commit`] or
/// [`LimitLedger::rollback`], so it can only be settled once.
#[must_use = "a reservation must be committed or rolled back"]
#[derive(Debug)]
pub struct Reservation {
    record: ReservationRecord,
}

impl Reservation {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn peer_id(&self) -> &str {
        &self.record.peer_id
    }

    pub fn amount_sats(&self) -> u64 {
        self.record.amount_sats
    }

    pub fn record(&self) -> &ReservationRecord {
        &self.record
    }
}

/// Non-reserving preview of a payment against the limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingCheck {
    pub would_exceed: bool,
    /// First scope that would refuse the amount.
    pub exceeded_scope: Option<LimitScope>,
    pub peer_remaining_sats: u64,
    pub global_remaining_sats: u64,
}

/// Per-peer and global spending ledger.
pub struct LimitLedger {
    store: Arc<dyn KeyValueStore>,
    keys: StoreKeys,
    settings: Arc<SettingsStore>,
    config: LedgerConfig,
    locks: KeyedLocks,
    clock: Clock,
}

fn peer_lock(peer_id: &str) -> String {
    format!("peer:{}", peer_id)
}

impl LimitLedger {
    /// Create a ledger. The global daily limit is read from `settings` on
    /// every reservation.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: StoreKeys,
        settings: Arc<SettingsStore>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            keys,
            settings,
            config,
            locks: KeyedLocks::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Hold `amount_sats` against the payee's limit and the global limit.
    ///
    /// Either both counters grow by exactly `amount_sats` and a token is
    /// returned, or nothing changes and the error names the refusing scope.
    #[tracing::instrument(skip(self))]
    pub async fn reserve(&self, peer_id: &str, amount_sats: u64) -> Result<Reservation> {
        if peer_id.is_empty() {
            return Err(AutoPayError::validation("peer_id", "cannot be empty"));
        }
        if amount_sats == 0 {
            return Err(AutoPayError::validation("amount_sats", "must be positive"));
        }
        let global_limit = self.settings.load().await?.global_daily_limit_sats;

        let _peer_guard = self.locks.lock(&peer_lock(peer_id)).await;
        let _global_guard = self.locks.lock(GLOBAL_LOCK).await;
        let now = self.now();

        let (mut peer, peer_is_new) = self.load_peer(peer_id, now).await?;
        peer.reset_if_expired(now);
        let mut global = self.load_global(now).await?;
        global.reset_if_expired(now);

        if peer.would_exceed(amount_sats) {
            debug!(remaining = peer.remaining_sats(), "Peer limit would be exceeded");
            return Err(AutoPayError::LimitExceeded {
                scope: LimitScope::Peer,
                requested_sats: amount_sats,
                remaining_sats: peer.remaining_sats(),
            });
        }
        if global.would_exceed(amount_sats, global_limit) {
            debug!(remaining = global.remaining_sats(global_limit), "Global limit would be exceeded");
            return Err(AutoPayError::LimitExceeded {
                scope: LimitScope::Global,
                requested_sats: amount_sats,
                remaining_sats: global.remaining_sats(global_limit),
            });
        }

        let record = ReservationRecord {
            id: format!("rsv_{}", uuid::Uuid::new_v4().simple()),
            peer_id: peer_id.to_string(),
            amount_sats,
            peer_period_start: peer.last_reset_at,
            global_period_start: global.last_reset_at,
            created_at: now,
        };

        {
            let _journal_guard = self.locks.lock(JOURNAL_LOCK).await;
            let mut journal = self.load_journal().await?;
            journal.insert(record.id.clone(), record.clone());
            self.save_journal(&journal).await?;

            let prev_peer = peer.clone();
            peer.spent_sats += amount_sats;
            if let Err(e) = self.save_peer(&peer).await {
                journal.remove(&record.id);
                self.compensate("journal", self.save_journal(&journal).await);
                return Err(e);
            }

            global.spent_sats += amount_sats;
            if let Err(e) = self.save_global(&global).await {
                self.compensate("peer limit", self.save_peer(&prev_peer).await);
                journal.remove(&record.id);
                self.compensate("journal", self.save_journal(&journal).await);
                return Err(e);
            }
        }

        if peer_is_new {
            self.add_to_index(peer_id).await;
        }

        debug!(
            reservation_id = %record.id,
            peer_spent = peer.spent_sats,
            global_spent = global.spent_sats,
            "Reserved spending"
        );
        Ok(Reservation { record })
    }

    /// Make a reservation permanent. The counters already hold the amount.
    #[tracing::instrument(skip(self, reservation), fields(reservation_id = %reservation.id()))]
    pub async fn commit(&self, reservation: Reservation) -> Result<()> {
        let _journal_guard = self.locks.lock(JOURNAL_LOCK).await;
        let mut journal = self.load_journal().await?;
        if journal.remove(reservation.id()).is_none() {
            return Err(AutoPayError::ReservationNotFound(reservation.record.id));
        }
        self.save_journal(&journal).await?;
        debug!("Committed reservation");
        Ok(())
    }

    /// Reverse a reservation on both counters, floored at zero.
    ///
    /// A scope whose period was reset after the reservation is left alone;
    /// the reset already discarded the amount. Any persistence failure is
    /// `RollbackFailed` and the reservation stays in the journal.
    #[tracing::instrument(skip(self, reservation), fields(reservation_id = %reservation.id()))]
    pub async fn rollback(&self, reservation: Reservation) -> Result<()> {
        self.rollback_record(reservation.record).await
    }

    /// Roll back a journaled reservation by id, for reconciliation after a
    /// crash or a failed [`rollback`](Self::rollback).
    #[tracing::instrument(skip(self))]
    pub async fn rollback_pending(&self, reservation_id: &str) -> Result<()> {
        let record = self
            .load_journal()
            .await?
            .remove(reservation_id)
            .ok_or_else(|| AutoPayError::ReservationNotFound(reservation_id.to_string()))?;
        self.rollback_record(record).await
    }

    async fn rollback_record(&self, record: ReservationRecord) -> Result<()> {
        let failed = |reason: String| AutoPayError::RollbackFailed {
            reservation_id: record.id.clone(),
            reason,
        };

        let _peer_guard = self.locks.lock(&peer_lock(&record.peer_id)).await;
        let _global_guard = self.locks.lock(GLOBAL_LOCK).await;
        let _journal_guard = self.locks.lock(JOURNAL_LOCK).await;

        let mut journal = self.load_journal().await.map_err(|e| failed(e.to_string()))?;
        if !journal.contains_key(&record.id) {
            return Err(AutoPayError::ReservationNotFound(record.id.clone()));
        }

        let now = self.now();
        let (mut peer, _) = self
            .load_peer(&record.peer_id, now)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let mut global = self.load_global(now).await.map_err(|e| failed(e.to_string()))?;
        let prev_peer = peer.clone();
        let prev_global = global.clone();

        peer.reset_if_expired(now);
        if peer.last_reset_at == record.peer_period_start {
            peer.spent_sats = peer.spent_sats.saturating_sub(record.amount_sats);
        }
        global.reset_if_expired(now);
        if global.last_reset_at == record.global_period_start {
            global.spent_sats = global.spent_sats.saturating_sub(record.amount_sats);
        }

        if let Err(e) = self.save_peer(&peer).await {
            error!(reservation_id = %record.id, error = %e, "Rollback failed, reservation left pending");
            return Err(failed(e.to_string()));
        }
        if let Err(e) = self.save_global(&global).await {
            self.compensate("peer limit", self.save_peer(&prev_peer).await);
            error!(reservation_id = %record.id, error = %e, "Rollback failed, reservation left pending");
            return Err(failed(e.to_string()));
        }

        journal.remove(&record.id);
        if let Err(e) = self.save_journal(&journal).await {
            // Keep counters consistent with the journal that still lists it
            self.compensate("peer limit", self.save_peer(&prev_peer).await);
            self.compensate("global spend", self.save_global(&prev_global).await);
            error!(reservation_id = %record.id, error = %e, "Rollback failed, reservation left pending");
            return Err(failed(e.to_string()));
        }

        debug!(
            reservation_id = %record.id,
            peer_spent = peer.spent_sats,
            global_spent = global.spent_sats,
            "Rolled back reservation"
        );
        Ok(())
    }

    /// Book a payment that already succeeded: reserve then commit.
    pub async fn record_payment(&self, peer_id: &str, amount_sats: u64) -> Result<()> {
        let reservation = self.reserve(peer_id, amount_sats).await?;
        self.commit(reservation).await
    }

    /// Preview whether `amount_sats` would fit, without reserving.
    pub async fn check(&self, peer_id: &str, amount_sats: u64) -> Result<SpendingCheck> {
        let global_limit = self.settings.load().await?.global_daily_limit_sats;
        let now = self.now();

        let (mut peer, _) = self.load_peer(peer_id, now).await?;
        peer.reset_if_expired(now);
        let mut global = self.load_global(now).await?;
        global.reset_if_expired(now);

        let exceeded_scope = if peer.would_exceed(amount_sats) {
            Some(LimitScope::Peer)
        } else if global.would_exceed(amount_sats, global_limit) {
            Some(LimitScope::Global)
        } else {
            None
        };

        Ok(SpendingCheck {
            would_exceed: exceeded_scope.is_some(),
            exceeded_scope,
            peer_remaining_sats: peer.remaining_sats(),
            global_remaining_sats: global.remaining_sats(global_limit),
        })
    }

    /// Current limit for `peer_id`, created with the configured defaults on
    /// first lookup and reset if its period rolled over.
    pub async fn peer_limit(&self, peer_id: &str) -> Result<PeerLimit> {
        let _peer_guard = self.locks.lock(&peer_lock(peer_id)).await;
        let now = self.now();
        let (mut peer, is_new) = self.load_peer(peer_id, now).await?;
        if peer.reset_if_expired(now) || is_new {
            self.save_peer(&peer).await?;
        }
        if is_new {
            self.add_to_index(peer_id).await;
        }
        Ok(peer)
    }

    /// Set a peer's limit and period, keeping what was already spent in the
    /// current period.
    pub async fn set_peer_limit(
        &self,
        peer_id: &str,
        limit_sats: u64,
        period: SpendingPeriod,
    ) -> Result<PeerLimit> {
        if peer_id.is_empty() {
            return Err(AutoPayError::validation("peer_id", "cannot be empty"));
        }
        let _peer_guard = self.locks.lock(&peer_lock(peer_id)).await;
        let now = self.now();
        let (mut peer, is_new) = self.load_peer(peer_id, now).await?;
        peer.reset_if_expired(now);
        peer.limit_sats = limit_sats;
        peer.period = period;
        self.save_peer(&peer).await?;
        if is_new {
            self.add_to_index(peer_id).await;
        }
        debug!(peer_id, limit_sats, %period, "Updated peer limit");
        Ok(peer)
    }

    /// Every persisted peer limit, sorted by peer id. Expired periods are
    /// shown reset but not written back.
    pub async fn list_peer_limits(&self) -> Result<Vec<PeerLimit>> {
        let index: BTreeSet<String> =
            load_json(self.store.as_ref(), &self.keys.peer_limits_index())
                .await?
                .unwrap_or_default();
        let now = self.now();

        let mut limits = Vec::with_capacity(index.len());
        for peer_id in index {
            let stored: Option<PeerLimit> =
                load_json(self.store.as_ref(), &self.keys.peer_limit(&peer_id)).await?;
            if let Some(mut limit) = stored {
                limit.reset_if_expired(now);
                limits.push(limit);
            }
        }
        Ok(limits)
    }

    /// Wallet-wide spend for the current UTC day.
    pub async fn global_spend(&self) -> Result<GlobalSpend> {
        let now = self.now();
        let mut global = self.load_global(now).await?;
        global.reset_if_expired(now);
        Ok(global)
    }

    /// Reservations that were neither committed nor rolled back, oldest first.
    pub async fn pending_reservations(&self) -> Result<Vec<ReservationRecord>> {
        let mut records: Vec<_> = self.load_journal().await?.into_values().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn load_peer(&self, peer_id: &str, now: DateTime<Utc>) -> Result<(PeerLimit, bool)> {
        let stored: Option<PeerLimit> =
            load_json(self.store.as_ref(), &self.keys.peer_limit(peer_id)).await?;
        Ok(match stored {
            Some(limit) => (limit, false),
            None => (
                PeerLimit::new(
                    peer_id,
                    self.config.default_peer_limit_sats,
                    self.config.default_period,
                    now,
                ),
                true,
            ),
        })
    }

    async fn save_peer(&self, limit: &PeerLimit) -> Result<()> {
        save_json(self.store.as_ref(), &self.keys.peer_limit(&limit.peer_id), limit).await
    }

    async fn load_global(&self, now: DateTime<Utc>) -> Result<GlobalSpend> {
        Ok(load_json(self.store.as_ref(), &self.keys.global_spend())
            .await?
            .unwrap_or_else(|| GlobalSpend::new(now)))
    }

    async fn save_global(&self, global: &GlobalSpend) -> Result<()> {
        save_json(self.store.as_ref(), &self.keys.global_spend(), global).await
    }

    async fn load_journal(&self) -> Result<Journal> {
        Ok(load_json(self.store.as_ref(), &self.keys.reservations())
            .await?
            .unwrap_or_default())
    }

    async fn save_journal(&self, journal: &Journal) -> Result<()> {
        save_json(self.store.as_ref(), &self.keys.reservations(), journal).await
    }

    async fn add_to_index(&self, peer_id: &str) {
        let _index_guard = self.locks.lock(INDEX_LOCK).await;
        let key = self.keys.peer_limits_index();
        let result = async {
            let mut index: BTreeSet<String> =
                load_json(self.store.as_ref(), &key).await?.unwrap_or_default();
            if index.insert(peer_id.to_string()) {
                save_json(self.store.as_ref(), &key, &index).await?;
            }
            Ok::<_, AutoPayError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(peer_id, error = %e, "Failed to index peer limit");
        }
    }

    fn compensate(&self, what: &str, result: Result<()>) {
        if let Err(e) = result {
            error!(what, error = %e, "Compensating write failed, ledger needs reconciliation");
        }
    }
}

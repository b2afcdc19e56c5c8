use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

use alloy::primitives::{Address, TxHash};
use serde::Serialize;

/// Kind of state-mutating transaction the controller submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TxKind {
    Approve,
    Activate,
}

impl std::fmt::Display for TxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxKind::Approve => f.write_str("approve"),
            TxKind::Activate => f.write_str("activate"),
        }
    }
}

/// A transaction between submission and receipt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    /// Unknown until the wallet returns (or an error leaks) a hash.
    pub hash: Option<TxHash>,
    pub submitted_at: SystemTime,
    pub kind: TxKind,
}

/// Per-page wallet session.
///
/// Created empty on load, filled by [`Session::pin_network`] and [`Session::connect`],
/// and wiped by [`Session::reset`] on disconnect or any wallet event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub connected: bool,
    pub address: Option<Address>,
    pub chain_id: Option<u64>,
    pub pending: Option<PendingTransaction>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the chain the provider was verified on.
    pub fn pin_network(&mut self, chain_id: u64) {
        self.chain_id = Some(chain_id);
    }

    /// Bind the session to `address`, replacing any previous account.
    pub fn connect(&mut self, address: Address) {
        if let Some(previous) = self.address.filter(|a| *a != address) {
            tracing::info!(%previous, current = %address, "wallet account changed");
        }
        self.address = Some(address);
        self.connected = true;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Connected account, if the session is on `chain_id`.
    pub fn ready_account(&self, chain_id: u64) -> Option<Address> {
        match (self.connected, self.address, self.chain_id) {
            (true, Some(address), Some(id)) if id == chain_id => Some(address),
            _ => None,
        }
    }

    pub fn begin_pending(&mut self, kind: TxKind) {
        self.pending = Some(PendingTransaction {
            hash: None,
            submitted_at: SystemTime::now(),
            kind,
        });
    }

    pub fn set_pending_hash(&mut self, hash: TxHash) {
        if let Some(pending) = self.pending.as_mut() {
            pending.hash = Some(hash);
        }
    }

    pub fn clear_pending(&mut self) {
        self.pending = None;
    }
}

/// [`Session`] shared between the controller and in-flight submissions.
///
/// Only locked for short synchronous updates, never across an `.await`, so it can
/// also be updated from `Drop`.
#[derive(Debug, Default)]
pub struct SharedSession(RwLock<Session>);

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Session {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.0.write().unwrap_or_else(PoisonError::into_inner))
    }
}

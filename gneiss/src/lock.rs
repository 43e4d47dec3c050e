//! Two-phase locking over tables and rows.
//!
//! The lock table is a single mutex-guarded map from lockable resource to
//! its current holders. Requests that cannot be granted immediately are
//! refused and the caller surfaces a `TransactionAbort`; this no-wait
//! flavour of deadlock prevention needs no waits-for graph.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{AbortReason, TransactionAbort};
use crate::txn::{Transaction, TxnState};
use crate::{FileId, Rid, TxnId};

/// Lock modes. Tables use the full hierarchy; rows use only `S` and `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

use LockMode::*;

impl LockMode {
    /// The classic multi-granularity compatibility matrix.
    pub fn compatible_with(self, other: LockMode) -> bool {
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Whether a holder of `self` already enjoys everything `req` grants.
    pub fn covers(self, req: LockMode) -> bool {
        match self {
            Exclusive => true,
            SharedIntentionExclusive => req != Exclusive,
            Shared => matches!(req, Shared | IntentionShared),
            IntentionExclusive => matches!(req, IntentionExclusive | IntentionShared),
            IntentionShared => req == IntentionShared,
        }
    }

    /// Least upper bound of two held modes (the upgrade target).
    pub fn combine(self, other: LockMode) -> LockMode {
        if self.covers(other) {
            self
        } else if other.covers(self) {
            other
        } else {
            // The only incomparable pair below X is {S, IX}.
            debug_assert!(matches!(
                (self, other),
                (Shared, IntentionExclusive) | (IntentionExclusive, Shared)
            ));
            SharedIntentionExclusive
        }
    }
}

/// A lockable resource: a whole table (by file) or one row within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockId {
    Table { file_id: FileId },
    Row { file_id: FileId, rid: Rid },
}

impl LockId {
    pub fn table(file_id: FileId) -> Self {
        LockId::Table { file_id }
    }

    pub fn row(file_id: FileId, rid: Rid) -> Self {
        LockId::Row { file_id, rid }
    }
}

#[derive(Debug, Default)]
struct LockStatus {
    holders: HashMap<TxnId, LockMode>,
}

/// The global lock table.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<HashMap<LockId, LockStatus>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires (or upgrades to) `mode` on `id` for the transaction, moving
    /// it into its growing phase. Refusals are immediate.
    pub fn lock(
        &self,
        txn: &mut Transaction,
        id: LockId,
        mode: LockMode,
    ) -> Result<(), TransactionAbort> {
        debug_assert!(
            matches!(id, LockId::Table { .. }) || matches!(mode, Shared | Exclusive),
            "row locks are only S or X"
        );
        if txn.state == TxnState::Shrinking {
            return Err(TransactionAbort {
                txn_id: txn.id,
                reason: AbortReason::LockOnShrinking,
            });
        }

        let mut table = self.table.lock().unwrap();
        let status = table.entry(id).or_default();

        if let Some(&held) = status.holders.get(&txn.id) {
            if held.covers(mode) {
                return Ok(());
            }
            let target = held.combine(mode);
            let blocked = status
                .holders
                .iter()
                .any(|(&other, &m)| other != txn.id && !target.compatible_with(m));
            if blocked {
                log::debug!(
                    "txn {} upgrade {:?} -> {:?} on {:?} refused",
                    txn.id,
                    held,
                    target,
                    id
                );
                return Err(TransactionAbort {
                    txn_id: txn.id,
                    reason: AbortReason::Upgrade,
                });
            }
            status.holders.insert(txn.id, target);
            txn.state = TxnState::Growing;
            return Ok(());
        }

        let blocked = status.holders.values().any(|&m| !mode.compatible_with(m));
        if blocked {
            log::debug!("txn {} lock {:?} on {:?} refused", txn.id, mode, id);
            return Err(TransactionAbort {
                txn_id: txn.id,
                reason: AbortReason::DeadlockPrevention,
            });
        }
        status.holders.insert(txn.id, mode);
        txn.lock_set.push(id);
        txn.state = TxnState::Growing;
        Ok(())
    }

    /// Releases one lock, moving the transaction into its shrinking phase.
    /// Returns false if the transaction held no lock on `id`.
    pub fn unlock(&self, txn: &mut Transaction, id: LockId) -> bool {
        txn.state = TxnState::Shrinking;
        let mut table = self.table.lock().unwrap();
        let Some(status) = table.get_mut(&id) else {
            return false;
        };
        let removed = status.holders.remove(&txn.id).is_some();
        if status.holders.is_empty() {
            table.remove(&id);
        }
        if removed {
            txn.lock_set.retain(|&held| held != id);
        }
        removed
    }

    /// Drops every lock the transaction holds, newest first. Used at commit
    /// and abort; does not itself change the transaction state.
    pub fn release_all(&self, txn: &mut Transaction) {
        let mut table = self.table.lock().unwrap();
        for id in txn.lock_set.drain(..).rev() {
            if let Some(status) = table.get_mut(&id) {
                status.holders.remove(&txn.id);
                if status.holders.is_empty() {
                    table.remove(&id);
                }
            }
        }
    }

    /// Mode the transaction currently holds on `id`, if any.
    pub fn held_mode(&self, txn_id: TxnId, id: LockId) -> Option<LockMode> {
        let table = self.table.lock().unwrap();
        table.get(&id).and_then(|s| s.holders.get(&txn_id).copied())
    }
}

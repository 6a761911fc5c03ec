use crate::billing::counter::{ConvertedUsage, CounterSnapshot};
use serde::{Deserialize, Serialize};

/// Settlement aggregate identity: (org, client, billing year, billing month).
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementId {
    pub org_id: String,
    pub client_id: String,
    pub year: u16,
    pub month: u8,
}

impl SettlementId {
    pub fn new(org_id: String, client_id: String, year: u16, month: u8) -> Self {
        SettlementId {
            org_id,
            client_id,
            year,
            month,
        }
    }

    /// Stable storage key
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{:02}",
            self.org_id, self.client_id, self.year, self.month
        )
    }
}

/// Settlement aggregate: one invoice-equivalent record for one client
/// for one billing period.
///
/// Invariants:
/// - At most one non-deleted settlement per (org, client, year, month),
///   enforced by a pre-insert existence check (advisory, not atomic)
/// - `total_amount` equals the sum of leader row amounts across details
/// - All amounts are pre-tax
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub id: SettlementId,

    pub total_amount: u64,

    pub is_paid: bool,

    /// Soft delete: deleted settlements no longer block the period
    pub is_deleted: bool,

    /// Deterministic digest over the detail rows, refreshed after
    /// retroactive edits
    pub detail_hash: String,
}

impl Settlement {
    pub fn new(id: SettlementId, total_amount: u64, detail_hash: String) -> Self {
        Settlement {
            id,
            total_amount,
            is_paid: false,
            is_deleted: false,
            detail_hash,
        }
    }

    pub fn mark_paid(&mut self) {
        self.is_paid = true;
    }

    pub fn mark_deleted(&mut self) {
        self.is_deleted = true;
    }

    /// Whether this settlement blocks another save for the same period
    pub fn blocks_period(&self) -> bool {
        !self.is_deleted
    }
}

/// One asset's billed line item within a settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementDetail {
    /// Sequential detail id, unique across the store
    pub id: u64,

    /// Owning settlement key (`SettlementId::key()`)
    pub settlement_key: String,

    pub asset_id: String,

    /// Billed period, denormalized for timeline queries
    pub year: u16,
    pub month: u8,

    /// Counter pair actually billed
    pub prev: CounterSnapshot,
    pub curr: CounterSnapshot,

    /// Derived per-category usage
    pub usage: CounterSnapshot,

    /// A3-normalized usage
    pub converted: ConvertedUsage,

    /// Computed charge for this row (0 on non-leader rows)
    pub amount: u64,

    /// Row corresponds to a withdrawal/replacement event
    pub is_replacement_record: bool,

    pub is_group_leader: bool,
    pub group_span: usize,

    pub is_paid: bool,
}

impl SettlementDetail {
    /// Billing period as an ordered (year, month) pair
    pub fn period(&self) -> (u16, u8) {
        (self.year, self.month)
    }
}

use crate::billing::counter::CounterSnapshot;
use serde::{Deserialize, Serialize};

/// Asset status over its rental lifecycle.
///
/// Created `Warehouse` → `Installed` at a client → billed repeatedly →
/// withdrawn or replaced (back to `Warehouse`). A machine that leaves a
/// client without an immediate replacement withdrawal sits in
/// `PendingReplacementWithdrawal` until its final settlement row lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetStatus {
    Installed,
    Warehouse,
    UnderRepair,
    Disposed,
    PendingReplacementWithdrawal,
}

/// Billing-group membership for an asset.
///
/// `Pending` is resolved into a real group id by the settlement writer at
/// persistence time; during live calculation it partitions as its own key,
/// distinct from any real id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupRef {
    /// Not pooled with anything; billed as a singleton.
    Solo,
    /// Member of an existing billing group.
    Existing(String),
    /// New group to be created, seeded by the named asset.
    Pending { seed_asset_id: String },
}

impl GroupRef {
    /// Stable partition key for live calculation.
    ///
    /// Solo rows key on their own asset id and are never merged; a pending
    /// group keys on its seed so all members referencing the same seed pool
    /// together without colliding with real group ids.
    pub fn partition_key(&self, asset_id: &str) -> String {
        match self {
            GroupRef::Solo => format!("solo:{}", asset_id),
            GroupRef::Existing(id) => format!("group:{}", id),
            GroupRef::Pending { seed_asset_id } => format!("pending:{}", seed_asset_id),
        }
    }
}

/// Plan parameters for one asset: fixed fee, free-page allowances,
/// per-page overage prices, and A3 weight factors.
///
/// All amounts are integer currency units, pre-tax.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanTerms {
    /// Monthly basic fee
    pub basic_fee: u64,

    /// Free monochrome pages (A4-equivalent) per month
    pub free_bw: u64,

    /// Free color pages (A4-equivalent) per month
    pub free_col: u64,

    /// Overage price per monochrome page
    pub price_bw: u64,

    /// Overage price per color page
    pub price_col: u64,

    /// A3 → A4-equivalent multiplier, monochrome (0 treated as 1)
    pub weight_bw_a3: u64,

    /// A3 → A4-equivalent multiplier, color (0 treated as 1)
    pub weight_col_a3: u64,
}

/// A metered machine in the rental fleet.
///
/// Identity: `id`. Owned by at most one client at a time; lifecycle
/// events are recorded in the machine history ledger, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Asset {
    pub id: String,

    /// Owning client while installed; None in the warehouse.
    pub client_id: Option<String>,

    pub status: AssetStatus,

    pub group: GroupRef,

    pub plan: PlanTerms,

    /// Lifetime counters at acquisition (or carried over from a prior life)
    pub initial_counts: CounterSnapshot,
}

impl Asset {
    /// Register a new machine in the warehouse
    pub fn new(id: String, plan: PlanTerms, initial_counts: CounterSnapshot) -> Self {
        Asset {
            id,
            client_id: None,
            status: AssetStatus::Warehouse,
            group: GroupRef::Solo,
            plan,
            initial_counts,
        }
    }

    /// Install at a client
    pub fn install(&mut self, client_id: String) {
        self.status = AssetStatus::Installed;
        self.client_id = Some(client_id);
    }

    /// Return to the warehouse, clearing the client association.
    ///
    /// Idempotent: re-applying after a partial save leaves the same state.
    pub fn send_to_warehouse(&mut self) {
        self.status = AssetStatus::Warehouse;
        self.client_id = None;
        self.group = GroupRef::Solo;
    }

    /// Whether this asset participates in a billing run for its client
    pub fn is_billable(&self) -> bool {
        matches!(
            self.status,
            AssetStatus::Installed | AssetStatus::PendingReplacementWithdrawal
        )
    }
}

/// A client renting machines from the fleet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Client {
    pub id: String,
    pub name: String,
}

impl Client {
    pub fn new(id: String, name: String) -> Self {
        Client { id, name }
    }
}

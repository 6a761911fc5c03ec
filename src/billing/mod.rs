pub mod apply;
pub mod asset;
pub mod calc;
pub mod counter;
pub mod history;
pub mod lifecycle;
pub mod settlement;

pub use apply::{apply_event, Event};
pub use asset::{Asset, AssetStatus, Client, GroupRef, PlanTerms};
pub use calc::{
    aggregate_groups, calculate_client_bill, BillResult, CalculatedAsset, RowCost, UsageBreakdown,
};
pub use counter::{
    compute_usage, normalize_a3, regressions, ConvertedUsage, CounterSnapshot, RegressionFlags,
};
pub use history::{HistoryAction, MachineHistoryEntry};
pub use lifecycle::{classify, Classification, CurrentSource, LifecycleFlags};
pub use settlement::{Settlement, SettlementDetail, SettlementId};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Core domain state: clients, assets, settlements, detail rows and the
/// machine history ledger.
///
/// One State per organization's data directory. Operations run as
/// independent request-scoped invocations: load, mutate, persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct State {
    /// Clients indexed by client id
    pub clients: HashMap<String, Client>,

    /// Assets indexed by asset id
    pub assets: HashMap<String, Asset>,

    /// Settlements indexed by `SettlementId::key()`
    pub settlements: HashMap<String, Settlement>,

    /// Settlement detail rows indexed by detail id
    pub details: HashMap<u64, SettlementDetail>,

    /// Append-only machine history ledger, in insertion order
    pub history: Vec<MachineHistoryEntry>,

    pub next_detail_id: u64,
    pub next_history_id: u64,

    /// Monotonic sequence for resolving pending billing groups
    pub next_group_seq: u64,
}

impl State {
    /// Create empty state
    pub fn new() -> Self {
        State {
            clients: HashMap::new(),
            assets: HashMap::new(),
            settlements: HashMap::new(),
            details: HashMap::new(),
            history: Vec::new(),
            next_detail_id: 0,
            next_history_id: 0,
            next_group_seq: 0,
        }
    }

    pub fn get_client(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn insert_client(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn get_asset(&self, id: &str) -> Option<&Asset> {
        self.assets.get(id)
    }

    pub fn get_asset_mut(&mut self, id: &str) -> Option<&mut Asset> {
        self.assets.get_mut(id)
    }

    pub fn insert_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.id.clone(), asset);
    }

    /// Billable assets for a client, ordered by asset id for deterministic
    /// iteration (the first group member becomes the leader)
    pub fn billable_assets_for_client(&self, client_id: &str) -> Vec<&Asset> {
        let mut assets: Vec<&Asset> = self
            .assets
            .values()
            .filter(|a| a.client_id.as_deref() == Some(client_id) && a.is_billable())
            .collect();
        assets.sort_by(|a, b| a.id.cmp(&b.id));
        assets
    }

    /// Find the non-deleted settlement for (org, client, year, month)
    pub fn find_settlement(
        &self,
        org_id: &str,
        client_id: &str,
        year: u16,
        month: u8,
    ) -> Option<&Settlement> {
        let key = SettlementId::new(
            org_id.to_string(),
            client_id.to_string(),
            year,
            month,
        )
        .key();
        self.settlements.get(&key).filter(|s| s.blocks_period())
    }

    pub fn get_settlement(&self, key: &str) -> Option<&Settlement> {
        self.settlements.get(key)
    }

    pub fn get_settlement_mut(&mut self, key: &str) -> Option<&mut Settlement> {
        self.settlements.get_mut(key)
    }

    pub fn insert_settlement(&mut self, settlement: Settlement) {
        self.settlements.insert(settlement.id.key(), settlement);
    }

    /// Insert a detail row, assigning its sequential id
    pub fn insert_detail(&mut self, mut detail: SettlementDetail) -> u64 {
        let id = self.next_detail_id;
        self.next_detail_id += 1;
        detail.id = id;
        self.details.insert(id, detail);
        id
    }

    pub fn get_detail(&self, id: u64) -> Option<&SettlementDetail> {
        self.details.get(&id)
    }

    pub fn get_detail_mut(&mut self, id: u64) -> Option<&mut SettlementDetail> {
        self.details.get_mut(&id)
    }

    /// Detail rows belonging to one settlement, in insertion order
    pub fn details_for_settlement(&self, settlement_key: &str) -> Vec<&SettlementDetail> {
        let mut rows: Vec<&SettlementDetail> = self
            .details
            .values()
            .filter(|d| d.settlement_key == settlement_key)
            .collect();
        rows.sort_by_key(|d| d.id);
        rows
    }

    /// One asset's detail rows across all periods, oldest first
    pub fn details_for_asset(&self, asset_id: &str) -> Vec<&SettlementDetail> {
        let mut rows: Vec<&SettlementDetail> = self
            .details
            .values()
            .filter(|d| d.asset_id == asset_id)
            .collect();
        rows.sort_by_key(|d| (d.year, d.month, d.id));
        rows
    }

    /// Whether any persisted detail for the asset lies in a strictly
    /// later period than (year, month)
    pub fn has_future_settlement(&self, asset_id: &str, year: u16, month: u8) -> bool {
        self.details
            .values()
            .any(|d| d.asset_id == asset_id && (d.year, d.month) > (year, month))
    }

    /// Previous-period closing counters per asset for a client.
    ///
    /// For each billable asset, the `curr` of its latest detail row before
    /// (year, month). Assets with no prior row are absent; callers fall
    /// back to the asset's initial counters.
    pub fn prev_counts_for_client(
        &self,
        client_id: &str,
        year: u16,
        month: u8,
    ) -> HashMap<String, CounterSnapshot> {
        let mut map = HashMap::new();
        for asset in self.billable_assets_for_client(client_id) {
            let prior = self
                .details_for_asset(&asset.id)
                .into_iter()
                .filter(|d| (d.year, d.month) < (year, month))
                .last();
            if let Some(d) = prior {
                map.insert(asset.id.clone(), d.curr);
            }
        }
        map
    }

    /// Append a machine history ledger entry, assigning its sequential id.
    /// Returns a clone of the stored entry (for the storage log).
    #[allow(clippy::too_many_arguments)]
    pub fn record_history(
        &mut self,
        asset_id: &str,
        action: HistoryAction,
        counts: CounterSnapshot,
        year: u16,
        month: u8,
        memo: &str,
        actor: &str,
        recorded_at: i64,
    ) -> MachineHistoryEntry {
        let entry = MachineHistoryEntry {
            id: self.next_history_id,
            asset_id: asset_id.to_string(),
            action,
            counts,
            year,
            month,
            memo: memo.to_string(),
            actor: actor.to_string(),
            recorded_at,
        };
        self.next_history_id += 1;
        self.history.push(entry.clone());
        entry
    }

    /// Ledger entries for one asset, in insertion order
    pub fn ledger_for_asset(&self, asset_id: &str) -> Vec<&MachineHistoryEntry> {
        self.history
            .iter()
            .filter(|e| e.asset_id == asset_id)
            .collect()
    }

    /// Allocate a fresh billing group id (pending-group resolution)
    pub fn next_group_id(&mut self) -> String {
        let id = format!("grp-{}", self.next_group_seq);
        self.next_group_seq += 1;
        id
    }
}

impl Default for State {
    fn default() -> Self {
        State::new()
    }
}

use crate::audit::detail_set_hash;
use crate::billing::{
    CalculatedAsset, GroupRef, RowCost, Settlement, SettlementDetail, SettlementId, State,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of a write operation. Persistence-path errors are converted into
/// `{success: false, message}` at this boundary; nothing is thrown past it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaveOutcome {
    pub success: bool,
    pub message: String,
}

impl SaveOutcome {
    pub fn ok(message: String) -> Self {
        SaveOutcome {
            success: true,
            message,
        }
    }

    pub fn fail(message: String) -> Self {
        SaveOutcome {
            success: false,
            message,
        }
    }
}

/// One client's selected detail rows for a settlement save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientSelection {
    pub client_id: String,
    pub rows: Vec<CalculatedAsset>,
    /// Sum of group-leader row totals for this client
    pub total_amount: u64,
}

/// Persist one settlement per client for a billing period.
///
/// 1. Duplicate check across the whole batch first: any existing
///    non-deleted settlement for a (client, period) rejects everything,
///    listing the offending client names.
/// 2. Per client: resolve pending billing groups to real group ids,
///    insert the settlement header, then all detail rows.
/// 3. Rows flagged withdrawal/replacement return the machine to the
///    warehouse. Not transactional with the detail insert.
/// 4. A mid-batch failure surfaces one error message; earlier clients in
///    the batch stay committed.
///
/// The duplicate check is read-then-write: two concurrent saves for the
/// same (client, period) can both pass it. Known gap, inherited from the
/// storage layer's per-statement atomicity.
pub fn save_settlement(
    state: &mut State,
    org_id: &str,
    year: u16,
    month: u8,
    selections: &[ClientSelection],
    _now: i64,
) -> SaveOutcome {
    if let Err(e) = validate_batch_shape(selections) {
        return SaveOutcome::fail(e.to_string());
    }

    // Duplicate check for the whole batch before any insert
    let duplicates: Vec<String> = selections
        .iter()
        .filter(|sel| {
            state
                .find_settlement(org_id, &sel.client_id, year, month)
                .is_some()
        })
        .map(|sel| client_display_name(state, &sel.client_id))
        .collect();
    if !duplicates.is_empty() {
        return SaveOutcome::fail(format!(
            "Settlement already exists for {}-{:02}: {}",
            year,
            month,
            duplicates.join(", ")
        ));
    }

    let mut saved = 0usize;
    for selection in selections {
        if let Err(e) = insert_client_settlement(state, org_id, year, month, selection) {
            // Earlier clients stay committed; callers must re-query state
            return SaveOutcome::fail(format!(
                "Failed to save settlement for client {}: {} ({} of {} clients committed)",
                client_display_name(state, &selection.client_id),
                e,
                saved,
                selections.len()
            ));
        }
        saved += 1;
    }

    SaveOutcome::ok(format!(
        "Saved {} settlement(s) for {}-{:02}",
        saved, year, month
    ))
}

fn validate_batch_shape(selections: &[ClientSelection]) -> Result<()> {
    if selections.is_empty() {
        return Err(Error::Validation("Empty settlement batch".to_string()));
    }
    let mut seen: Vec<&str> = Vec::new();
    for sel in selections {
        if seen.contains(&sel.client_id.as_str()) {
            return Err(Error::Validation(format!(
                "Client {} appears twice in the batch",
                sel.client_id
            )));
        }
        seen.push(&sel.client_id);

        if sel.rows.is_empty() {
            return Err(Error::Validation(format!(
                "No detail rows selected for client {}",
                sel.client_id
            )));
        }
        if let Some(row) = sel.rows.iter().find(|r| r.client_id != sel.client_id) {
            return Err(Error::Validation(format!(
                "Row for asset {} belongs to client {}, not {}",
                row.asset_id, row.client_id, sel.client_id
            )));
        }
        let leader_sum: u64 = sel
            .rows
            .iter()
            .filter(|r| r.is_group_leader)
            .map(|r| r.row_cost.total)
            .sum();
        if leader_sum != sel.total_amount {
            return Err(Error::Validation(format!(
                "Total {} does not match leader row sum {} for client {}",
                sel.total_amount, leader_sum, sel.client_id
            )));
        }
    }
    Ok(())
}

fn insert_client_settlement(
    state: &mut State,
    org_id: &str,
    year: u16,
    month: u8,
    selection: &ClientSelection,
) -> Result<()> {
    if state.get_client(&selection.client_id).is_none() {
        return Err(Error::StateError(format!(
            "Client {} does not exist",
            selection.client_id
        )));
    }

    resolve_pending_groups(state, selection);

    let settlement_id = SettlementId::new(
        org_id.to_string(),
        selection.client_id.to_string(),
        year,
        month,
    );
    let settlement_key = settlement_id.key();

    let details: Vec<SettlementDetail> = selection
        .rows
        .iter()
        .map(|row| SettlementDetail {
            id: 0, // assigned on insert
            settlement_key: settlement_key.clone(),
            asset_id: row.asset_id.clone(),
            year,
            month,
            prev: row.prev,
            curr: row.curr,
            usage: row.usage,
            converted: row.converted,
            amount: row.row_cost.total,
            is_replacement_record: row.is_replacement_record,
            is_group_leader: row.is_group_leader,
            group_span: row.group_span,
            is_paid: false,
        })
        .collect();
    let refs: Vec<&SettlementDetail> = details.iter().collect();
    let detail_hash = detail_set_hash(&refs);

    // Header first, then details, then lifecycle side effects.
    // Each step is an independent write; there is no rollback.
    state.insert_settlement(Settlement::new(
        settlement_id,
        selection.total_amount,
        detail_hash,
    ));
    for detail in details {
        state.insert_detail(detail);
    }

    for row in &selection.rows {
        if row.flags.triggers_warehouse_return() {
            if let Some(asset) = state.get_asset_mut(&row.asset_id) {
                asset.send_to_warehouse();
            }
        }
    }

    Ok(())
}

/// Resolve `GroupRef::Pending` into real group ids before membership is
/// persisted: one fresh id per distinct seed, applied to every asset in
/// the selection referencing that seed.
fn resolve_pending_groups(state: &mut State, selection: &ClientSelection) {
    let mut resolved: HashMap<String, String> = HashMap::new();
    for row in &selection.rows {
        let pending_seed = match state.get_asset(&row.asset_id).map(|a| &a.group) {
            Some(GroupRef::Pending { seed_asset_id }) => seed_asset_id.clone(),
            _ => continue,
        };
        let group_id = match resolved.get(&pending_seed) {
            Some(id) => id.clone(),
            None => {
                let id = state.next_group_id();
                resolved.insert(pending_seed.clone(), id.clone());
                id
            }
        };
        if let Some(asset) = state.get_asset_mut(&row.asset_id) {
            asset.group = GroupRef::Existing(group_id);
        }
    }
}

/// Mark an asset as intentionally not billed for one period.
///
/// A degenerate save: one detail row with zero amount and `prev == curr`,
/// preserving ledger continuity. Goes through the normal writer, so the
/// duplicate check applies.
pub fn exclude_asset(
    state: &mut State,
    org_id: &str,
    client_id: &str,
    asset_id: &str,
    year: u16,
    month: u8,
    now: i64,
) -> SaveOutcome {
    let asset = match state.get_asset(asset_id) {
        Some(a) => a,
        None => return SaveOutcome::fail(format!("Asset {} does not exist", asset_id)),
    };

    let prev = state
        .details_for_asset(asset_id)
        .into_iter()
        .filter(|d| (d.year, d.month) < (year, month))
        .last()
        .map(|d| d.curr)
        .unwrap_or(asset.initial_counts);

    let row = CalculatedAsset {
        asset_id: asset_id.to_string(),
        client_id: client_id.to_string(),
        prev,
        curr: prev,
        usage: Default::default(),
        converted: Default::default(),
        plan: asset.plan,
        breakdown: Default::default(),
        row_cost: RowCost::default(),
        is_group_leader: true,
        group_span: 1,
        flags: Default::default(),
        regression: Default::default(),
        group_key: format!("solo:{}", asset_id),
        is_replacement_record: false,
    };

    let selection = ClientSelection {
        client_id: client_id.to_string(),
        rows: vec![row],
        total_amount: 0,
    };
    save_settlement(state, org_id, year, month, &[selection], now)
}

/// Cancel a saved settlement so the period can be billed again.
///
/// The header is soft-deleted (a later save for the same period replaces
/// it); its detail rows are removed so counter continuity falls back to
/// the last billed period. Paid settlements cannot be cancelled.
pub fn cancel_settlement(
    state: &mut State,
    org_id: &str,
    client_id: &str,
    year: u16,
    month: u8,
) -> Result<()> {
    let key = match state.find_settlement(org_id, client_id, year, month) {
        Some(s) => {
            if s.is_paid {
                return Err(Error::Conflict(format!(
                    "Settlement for client {} in {}-{:02} is paid",
                    client_id, year, month
                )));
            }
            s.id.key()
        }
        None => {
            return Err(Error::Validation(format!(
                "No settlement for client {} in {}-{:02}",
                client_id, year, month
            )))
        }
    };

    state.details.retain(|_, d| d.settlement_key != key);
    if let Some(settlement) = state.get_settlement_mut(&key) {
        settlement.mark_deleted();
    }
    Ok(())
}

fn client_display_name(state: &State, client_id: &str) -> String {
    state
        .get_client(client_id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| client_id.to_string())
}

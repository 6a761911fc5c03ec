use crate::audit::detail_set_hash;
use crate::billing::{compute_usage, normalize_a3, CounterSnapshot, HistoryAction, State};
use crate::settle::writer::SaveOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One proposed retroactive edit of a persisted settlement detail row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEdit {
    pub detail_id: u64,
    pub prev: CounterSnapshot,
    pub curr: CounterSnapshot,
}

/// Apply a batch of retroactive edits to persisted, not-yet-paid rows.
///
/// Precondition: no targeted row (or its settlement) is paid; any paid
/// target aborts the whole batch with an error naming it, and no row is
/// mutated. Continuity breaks do not block the save.
///
/// Per row: usage and A3-normalized usage are recomputed from the new
/// counter pair; singleton-leader rows are repriced from their asset's
/// plan terms. The owning settlement's total and detail hash are
/// refreshed, and one UpdatePast ledger entry per row documents the
/// change for audit. The ledger entry never feeds back into billing.
pub fn update_bulk_history(
    state: &mut State,
    actor: &str,
    edits: &[HistoryEdit],
    now: i64,
) -> SaveOutcome {
    if edits.is_empty() {
        return SaveOutcome::fail("No edits supplied".to_string());
    }

    // Precheck the whole batch before touching anything
    for edit in edits {
        let detail = match state.get_detail(edit.detail_id) {
            Some(d) => d,
            None => {
                return SaveOutcome::fail(format!("Detail row {} does not exist", edit.detail_id))
            }
        };
        let settlement_paid = state
            .get_settlement(&detail.settlement_key)
            .map(|s| s.is_paid)
            .unwrap_or(false);
        if settlement_paid || detail.is_paid {
            return SaveOutcome::fail(format!(
                "Row {} (asset {}, {}-{:02}) belongs to a paid settlement and cannot be modified",
                edit.detail_id, detail.asset_id, detail.year, detail.month
            ));
        }
        if state.get_asset(&detail.asset_id).is_none() {
            return SaveOutcome::fail(format!(
                "Asset {} for row {} no longer exists",
                detail.asset_id, edit.detail_id
            ));
        }
    }

    let mut touched_settlements: BTreeSet<String> = BTreeSet::new();

    for edit in edits {
        let (asset_id, settlement_key, year, month, is_singleton_leader) = {
            let detail = state
                .get_detail(edit.detail_id)
                .expect("prechecked detail row");
            (
                detail.asset_id.clone(),
                detail.settlement_key.clone(),
                detail.year,
                detail.month,
                detail.is_group_leader && detail.group_span == 1,
            )
        };
        let plan = state.get_asset(&asset_id).expect("prechecked asset").plan;

        let usage = compute_usage(&edit.prev, &edit.curr);
        let converted = normalize_a3(&usage, plan.weight_bw_a3, plan.weight_col_a3);

        let detail = state
            .get_detail_mut(edit.detail_id)
            .expect("prechecked detail row");
        detail.prev = edit.prev;
        detail.curr = edit.curr;
        detail.usage = usage;
        detail.converted = converted;
        if is_singleton_leader {
            let extra_bw = converted.bw.saturating_sub(plan.free_bw);
            let extra_col = converted.col.saturating_sub(plan.free_col);
            detail.amount = plan
                .basic_fee
                .saturating_add(extra_bw.saturating_mul(plan.price_bw))
                .saturating_add(extra_col.saturating_mul(plan.price_col));
        }

        touched_settlements.insert(settlement_key);

        state.record_history(
            &asset_id,
            HistoryAction::UpdatePast,
            edit.curr,
            year,
            month,
            "retroactive counter edit",
            actor,
            now,
        );
    }

    for key in touched_settlements {
        let rows = state.details_for_settlement(&key);
        let total: u64 = rows
            .iter()
            .filter(|d| d.is_group_leader)
            .map(|d| d.amount)
            .sum();
        let hash = detail_set_hash(&rows);
        if let Some(settlement) = state.get_settlement_mut(&key) {
            settlement.total_amount = total;
            settlement.detail_hash = hash;
        }
    }

    SaveOutcome::ok(format!("Updated {} settlement detail row(s)", edits.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{
        apply_event, calculate_client_bill, Event, PlanTerms,
    };
    use crate::settle::writer::{save_settlement, ClientSelection};
    use std::collections::HashMap;

    fn plan() -> PlanTerms {
        PlanTerms {
            basic_fee: 1000,
            free_bw: 40,
            free_col: 10,
            price_bw: 10,
            price_col: 100,
            weight_bw_a3: 1,
            weight_col_a3: 1,
        }
    }

    fn state_with_saved_settlement() -> State {
        let mut state = State::new();
        apply_event(
            &mut state,
            &Event::RegisterClient {
                id: "c-1".to_string(),
                name: "Acme".to_string(),
            },
            "op-1",
            0,
        )
        .unwrap();
        apply_event(
            &mut state,
            &Event::RegisterAsset {
                id: "m-1".to_string(),
                plan: plan(),
                initial_counts: CounterSnapshot::new(100, 20, 0, 0),
            },
            "op-1",
            0,
        )
        .unwrap();
        apply_event(
            &mut state,
            &Event::Install {
                asset_id: "m-1".to_string(),
                client_id: "c-1".to_string(),
                counts: CounterSnapshot::new(100, 20, 0, 0),
                year: 2024,
                month: 4,
                memo: String::new(),
            },
            "op-1",
            0,
        )
        .unwrap();

        let assets = state.billable_assets_for_client("c-1");
        let mut input_map = HashMap::new();
        input_map.insert("m-1".to_string(), CounterSnapshot::new(150, 25, 0, 0));
        let bill = calculate_client_bill(
            "c-1",
            &assets,
            &state.prev_counts_for_client("c-1", 2024, 5),
            &input_map,
            &state.history,
            2024,
            5,
        );
        let selection = ClientSelection {
            client_id: "c-1".to_string(),
            rows: bill.details,
            total_amount: bill.total_amount,
        };
        assert!(save_settlement(&mut state, "org-1", 2024, 5, &[selection], 0).success);
        state
    }

    #[test]
    fn test_bulk_edit_recomputes_and_audits() {
        let mut state = state_with_saved_settlement();
        let detail_id = *state.details.keys().next().unwrap();
        let old_hash = state
            .find_settlement("org-1", "c-1", 2024, 5)
            .unwrap()
            .detail_hash
            .clone();

        let outcome = update_bulk_history(
            &mut state,
            "op-2",
            &[HistoryEdit {
                detail_id,
                prev: CounterSnapshot::new(100, 20, 0, 0),
                curr: CounterSnapshot::new(160, 25, 0, 0),
            }],
            500,
        );
        assert!(outcome.success, "{}", outcome.message);

        let detail = state.get_detail(detail_id).unwrap();
        assert_eq!(detail.usage.bw, 60);
        // extra bw = 60 - 40 = 20 at 10; extra col = 0
        assert_eq!(detail.amount, 1000 + 200);

        let settlement = state.find_settlement("org-1", "c-1", 2024, 5).unwrap();
        assert_eq!(settlement.total_amount, 1200);
        assert_ne!(settlement.detail_hash, old_hash);

        let audit_entries: Vec<_> = state
            .history
            .iter()
            .filter(|e| e.action == HistoryAction::UpdatePast)
            .collect();
        assert_eq!(audit_entries.len(), 1);
        assert_eq!(audit_entries[0].actor, "op-2");
        assert_eq!(audit_entries[0].counts, CounterSnapshot::new(160, 25, 0, 0));
        assert_eq!((audit_entries[0].year, audit_entries[0].month), (2024, 5));
    }

    #[test]
    fn test_paid_settlement_aborts_whole_batch() {
        let mut state = state_with_saved_settlement();
        let detail_id = *state.details.keys().next().unwrap();
        let key = state
            .find_settlement("org-1", "c-1", 2024, 5)
            .unwrap()
            .id
            .key();
        state.get_settlement_mut(&key).unwrap().mark_paid();

        let before = state.get_detail(detail_id).unwrap().clone();
        let outcome = update_bulk_history(
            &mut state,
            "op-2",
            &[HistoryEdit {
                detail_id,
                prev: CounterSnapshot::zero(),
                curr: CounterSnapshot::new(999, 0, 0, 0),
            }],
            500,
        );
        assert!(!outcome.success);
        assert!(outcome.message.contains("paid"));
        // No row mutated, no audit entry appended
        assert_eq!(state.get_detail(detail_id).unwrap(), &before);
        assert!(state
            .history
            .iter()
            .all(|e| e.action != HistoryAction::UpdatePast));
    }

    #[test]
    fn test_unknown_row_rejected() {
        let mut state = state_with_saved_settlement();
        let outcome = update_bulk_history(
            &mut state,
            "op-2",
            &[HistoryEdit {
                detail_id: 999,
                prev: CounterSnapshot::zero(),
                curr: CounterSnapshot::zero(),
            }],
            500,
        );
        assert!(!outcome.success);
    }

    #[test]
    fn test_edit_with_regression_clamps_to_zero_usage() {
        let mut state = state_with_saved_settlement();
        let detail_id = *state.details.keys().next().unwrap();
        let outcome = update_bulk_history(
            &mut state,
            "op-2",
            &[HistoryEdit {
                detail_id,
                prev: CounterSnapshot::new(200, 30, 0, 0),
                curr: CounterSnapshot::new(150, 25, 0, 0),
            }],
            500,
        );
        assert!(outcome.success);
        let detail = state.get_detail(detail_id).unwrap();
        assert!(detail.usage.is_zero());
        assert_eq!(detail.amount, 1000); // basic fee only
    }
}

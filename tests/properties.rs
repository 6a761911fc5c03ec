use fleet_billing::audit::detail_set_hash;
use fleet_billing::billing::{
    calculate_client_bill, compute_usage, normalize_a3, regressions, Asset, ConvertedUsage,
    CounterSnapshot, GroupRef, PlanTerms, SettlementDetail,
};
use proptest::prelude::*;
use std::collections::HashMap;

fn snapshot_strategy() -> impl Strategy<Value = CounterSnapshot> {
    (0u64..1_000_000, 0u64..1_000_000, 0u64..100_000, 0u64..100_000)
        .prop_map(|(bw, col, bw_a3, col_a3)| CounterSnapshot::new(bw, col, bw_a3, col_a3))
}

fn plan_strategy() -> impl Strategy<Value = PlanTerms> {
    (
        0u64..100_000,
        0u64..10_000,
        0u64..10_000,
        0u64..1_000,
        0u64..1_000,
        0u64..10,
        0u64..10,
    )
        .prop_map(
            |(basic_fee, free_bw, free_col, price_bw, price_col, weight_bw_a3, weight_col_a3)| {
                PlanTerms {
                    basic_fee,
                    free_bw,
                    free_col,
                    price_bw,
                    price_col,
                    weight_bw_a3,
                    weight_col_a3,
                }
            },
        )
}

fn group_strategy() -> impl Strategy<Value = GroupRef> {
    prop_oneof![
        Just(GroupRef::Solo),
        Just(GroupRef::Existing("g-1".to_string())),
        Just(GroupRef::Existing("g-2".to_string())),
    ]
}

/// One client's fleet with per-asset counter pairs.
fn fleet_strategy() -> impl Strategy<Value = Vec<(PlanTerms, GroupRef, CounterSnapshot, CounterSnapshot)>> {
    proptest::collection::vec(
        (plan_strategy(), group_strategy(), snapshot_strategy(), snapshot_strategy()),
        1..6,
    )
}

fn build_fleet(
    fleet_specs: &[(PlanTerms, GroupRef, CounterSnapshot, CounterSnapshot)],
) -> (
    Vec<Asset>,
    HashMap<String, CounterSnapshot>,
    HashMap<String, CounterSnapshot>,
) {
    let mut assets = Vec::new();
    let mut prev_map = HashMap::new();
    let mut input_map = HashMap::new();
    for (i, (plan, group, prev, curr)) in fleet_specs.iter().enumerate() {
        let id = format!("m-{}", i);
        let mut asset = Asset::new(id.clone(), *plan, CounterSnapshot::zero());
        asset.install("c-1".to_string());
        asset.group = group.clone();
        assets.push(asset);
        prev_map.insert(id.clone(), *prev);
        input_map.insert(id, *curr);
    }
    (assets, prev_map, input_map)
}

proptest! {
    #[test]
    fn usage_is_clamped_delta_per_field(prev in snapshot_strategy(), curr in snapshot_strategy()) {
        let usage = compute_usage(&prev, &curr);
        prop_assert_eq!(usage.bw, curr.bw.saturating_sub(prev.bw));
        prop_assert_eq!(usage.col, curr.col.saturating_sub(prev.col));
        prop_assert_eq!(usage.bw_a3, curr.bw_a3.saturating_sub(prev.bw_a3));
        prop_assert_eq!(usage.col_a3, curr.col_a3.saturating_sub(prev.col_a3));
    }

    #[test]
    fn regression_flag_iff_usage_clamped(prev in snapshot_strategy(), curr in snapshot_strategy()) {
        let usage = compute_usage(&prev, &curr);
        let flags = regressions(&prev, &curr);
        prop_assert_eq!(flags.bw, curr.bw < prev.bw);
        if flags.bw {
            prop_assert_eq!(usage.bw, 0);
        }
        prop_assert_eq!(flags.col, curr.col < prev.col);
        if flags.col {
            prop_assert_eq!(usage.col, 0);
        }
    }

    #[test]
    fn zero_a3_weight_behaves_as_one(usage in snapshot_strategy(), w_bw in 0u64..10, w_col in 0u64..10) {
        let converted = normalize_a3(&usage, w_bw, w_col);
        let effective_bw = if w_bw == 0 { 1 } else { w_bw };
        let effective_col = if w_col == 0 { 1 } else { w_col };
        prop_assert_eq!(converted.bw, usage.bw + usage.bw_a3 * effective_bw);
        prop_assert_eq!(converted.col, usage.col + usage.col_a3 * effective_col);
    }

    #[test]
    fn client_total_is_sum_of_leader_rows(fleet_specs in fleet_strategy()) {
        let (assets, prev_map, input_map) = build_fleet(&fleet_specs);
        let refs: Vec<&Asset> = assets.iter().collect();
        let bill = calculate_client_bill("c-1", &refs, &prev_map, &input_map, &[], 2024, 5);

        let leader_sum: u64 = bill
            .details
            .iter()
            .filter(|r| r.is_group_leader)
            .map(|r| r.row_cost.total)
            .sum();
        prop_assert_eq!(bill.total_amount, leader_sum);

        for row in &bill.details {
            if !row.is_group_leader {
                prop_assert_eq!(row.row_cost.total, 0);
                prop_assert_eq!(row.group_span, 0);
            }
        }
    }

    #[test]
    fn group_spans_partition_the_rows(fleet_specs in fleet_strategy()) {
        let (assets, prev_map, input_map) = build_fleet(&fleet_specs);
        let refs: Vec<&Asset> = assets.iter().collect();
        let bill = calculate_client_bill("c-1", &refs, &prev_map, &input_map, &[], 2024, 5);

        let span_sum: usize = bill.details.iter().map(|r| r.group_span).sum();
        prop_assert_eq!(span_sum, bill.details.len());
    }

    #[test]
    fn pooled_split_conserves_usage(fleet_specs in fleet_strategy()) {
        let (assets, prev_map, input_map) = build_fleet(&fleet_specs);
        let refs: Vec<&Asset> = assets.iter().collect();
        let bill = calculate_client_bill("c-1", &refs, &prev_map, &input_map, &[], 2024, 5);

        for leader in bill.details.iter().filter(|r| r.is_group_leader) {
            let pooled_bw: u64 = bill
                .details
                .iter()
                .filter(|r| r.group_key == leader.group_key)
                .map(|r| r.converted.bw)
                .sum();
            let pooled_col: u64 = bill
                .details
                .iter()
                .filter(|r| r.group_key == leader.group_key)
                .map(|r| r.converted.col)
                .sum();
            prop_assert_eq!(
                leader.breakdown.used_basic_bw + leader.breakdown.used_extra_bw,
                pooled_bw
            );
            prop_assert_eq!(
                leader.breakdown.used_basic_col + leader.breakdown.used_extra_col,
                pooled_col
            );
        }
    }

    #[test]
    fn leader_charge_is_basic_plus_priced_overage(fleet_specs in fleet_strategy()) {
        let (assets, prev_map, input_map) = build_fleet(&fleet_specs);
        let refs: Vec<&Asset> = assets.iter().collect();
        let bill = calculate_client_bill("c-1", &refs, &prev_map, &input_map, &[], 2024, 5);

        for leader in bill.details.iter().filter(|r| r.is_group_leader) {
            let basic_sum: u64 = bill
                .details
                .iter()
                .filter(|r| r.group_key == leader.group_key)
                .map(|r| r.plan.basic_fee)
                .sum();
            let expected_extra = leader.breakdown.used_extra_bw * leader.plan.price_bw
                + leader.breakdown.used_extra_col * leader.plan.price_col;
            prop_assert_eq!(leader.row_cost.basic, basic_sum);
            prop_assert_eq!(leader.row_cost.extra, expected_extra);
            prop_assert_eq!(leader.row_cost.total, basic_sum + expected_extra);
        }
    }

    #[test]
    fn detail_hash_ignores_row_order(prev in snapshot_strategy(), curr in snapshot_strategy(), n in 2usize..5) {
        let rows: Vec<SettlementDetail> = (0..n as u64)
            .map(|id| SettlementDetail {
                id,
                settlement_key: "org-1:c-1:2024:05".to_string(),
                asset_id: format!("m-{}", id),
                year: 2024,
                month: 5,
                prev,
                curr,
                usage: compute_usage(&prev, &curr),
                converted: ConvertedUsage::default(),
                amount: id * 100,
                is_replacement_record: false,
                is_group_leader: id == 0,
                group_span: if id == 0 { n } else { 0 },
                is_paid: false,
            })
            .collect();

        let forward: Vec<&SettlementDetail> = rows.iter().collect();
        let reversed: Vec<&SettlementDetail> = rows.iter().rev().collect();
        prop_assert_eq!(detail_set_hash(&forward), detail_set_hash(&reversed));
    }
}

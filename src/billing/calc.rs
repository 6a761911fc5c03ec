use crate::billing::asset::{Asset, PlanTerms};
use crate::billing::counter::{
    compute_usage, normalize_a3, regressions, ConvertedUsage, CounterSnapshot, RegressionFlags,
};
use crate::billing::history::MachineHistoryEntry;
use crate::billing::lifecycle::{classify, CurrentSource, LifecycleFlags};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Charge attributed to one settlement detail row.
///
/// Within a billing group only the leader row carries non-zero values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowCost {
    /// Pooled basic fee
    pub basic: u64,
    /// Pooled overage charge
    pub extra: u64,
    /// basic + extra
    pub total: u64,
}

/// How the pooled usage split against the pooled free allowance,
/// per color channel. Carried on the group leader row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageBreakdown {
    pub used_basic_bw: u64,
    pub used_extra_bw: u64,
    pub used_basic_col: u64,
    pub used_extra_col: u64,
}

/// One computed billing row for one asset in one period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalculatedAsset {
    pub asset_id: String,
    pub client_id: String,

    /// Counter pair actually billed
    pub prev: CounterSnapshot,
    pub curr: CounterSnapshot,

    /// Clamped per-category usage
    pub usage: CounterSnapshot,

    /// A4-equivalent usage per color channel
    pub converted: ConvertedUsage,

    pub plan: PlanTerms,

    pub breakdown: UsageBreakdown,
    pub row_cost: RowCost,

    /// True for the single row carrying the group's full charge
    pub is_group_leader: bool,

    /// Group size on the leader row, 0 on dependent rows
    /// (used by callers to render a merged cell)
    pub group_span: usize,

    pub flags: LifecycleFlags,

    /// Meter regression detected on the billed counter pair (advisory)
    pub regression: RegressionFlags,

    /// Partition key the row was pooled under
    pub group_key: String,

    /// Row corresponds to a withdrawal/replacement event, not ordinary use
    pub is_replacement_record: bool,
}

/// Result of one client's bill calculation for one period.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BillResult {
    pub details: Vec<CalculatedAsset>,
    /// Sum of group-leader row totals
    pub total_amount: u64,
}

/// Compute one client's bill for one period.
///
/// Pure function of its inputs; no I/O. `prev_map` holds each asset's
/// previous-period closing counters (caller falls back to the asset's
/// initial counters); `input_map` holds operator-entered current counts.
/// The ledger decides, per asset, which counter pair is actually billed.
pub fn calculate_client_bill(
    client_id: &str,
    assets: &[&Asset],
    prev_map: &HashMap<String, CounterSnapshot>,
    input_map: &HashMap<String, CounterSnapshot>,
    ledger: &[MachineHistoryEntry],
    year: u16,
    month: u8,
) -> BillResult {
    let mut rows: Vec<CalculatedAsset> = Vec::with_capacity(assets.len());

    for asset in assets {
        let classification = classify(asset, ledger, year, month);

        let prev = prev_map
            .get(&asset.id)
            .copied()
            .unwrap_or(asset.initial_counts);

        let curr = match &classification.current_source {
            CurrentSource::OperatorInput => input_map.get(&asset.id).copied().unwrap_or(prev),
            CurrentSource::LedgerFinal(counts) => *counts,
            CurrentSource::LastKnown => prev,
        };

        let usage = compute_usage(&prev, &curr);
        let regression = regressions(&prev, &curr);
        let converted = normalize_a3(&usage, asset.plan.weight_bw_a3, asset.plan.weight_col_a3);

        rows.push(CalculatedAsset {
            asset_id: asset.id.clone(),
            client_id: client_id.to_string(),
            prev,
            curr,
            usage,
            converted,
            plan: asset.plan,
            breakdown: UsageBreakdown::default(),
            row_cost: RowCost::default(),
            is_group_leader: false,
            group_span: 0,
            flags: classification.flags,
            regression,
            group_key: asset.group.partition_key(&asset.id),
            is_replacement_record: classification.flags.is_replacement_record(),
        });
    }

    aggregate_groups(&mut rows);

    let total_amount = rows
        .iter()
        .filter(|r| r.is_group_leader)
        .map(|r| r.row_cost.total)
        .sum();

    BillResult {
        details: rows,
        total_amount,
    }
}

/// Pool rows sharing a partition key and apportion the combined charge.
///
/// Per group: basic fees, free allowances and converted usage are summed;
/// `used_basic = min(usage, allowance)` and `used_extra` is the remainder,
/// per channel. The overage unit price comes from the first asset in the
/// group (grouped assets are expected to share one price; not enforced
/// here). The first row in iteration order becomes the leader and carries
/// the full cost; every other row carries zero.
pub fn aggregate_groups(rows: &mut [CalculatedAsset]) {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut index_of: HashMap<String, usize> = HashMap::new();

    for (i, row) in rows.iter().enumerate() {
        match index_of.get(&row.group_key) {
            Some(&g) => groups[g].1.push(i),
            None => {
                index_of.insert(row.group_key.clone(), groups.len());
                groups.push((row.group_key.clone(), vec![i]));
            }
        }
    }

    for (_, members) in &groups {
        let basic_sum: u64 = members.iter().map(|&i| rows[i].plan.basic_fee).sum();
        let free_bw: u64 = members.iter().map(|&i| rows[i].plan.free_bw).sum();
        let free_col: u64 = members.iter().map(|&i| rows[i].plan.free_col).sum();
        let usage_bw: u64 = members.iter().map(|&i| rows[i].converted.bw).sum();
        let usage_col: u64 = members.iter().map(|&i| rows[i].converted.col).sum();

        let used_basic_bw = usage_bw.min(free_bw);
        let used_extra_bw = usage_bw - used_basic_bw;
        let used_basic_col = usage_col.min(free_col);
        let used_extra_col = usage_col - used_basic_col;

        // Unit price from the first asset in the group
        let leader = members[0];
        let price_bw = rows[leader].plan.price_bw;
        let price_col = rows[leader].plan.price_col;

        let extra_fee = used_extra_bw
            .saturating_mul(price_bw)
            .saturating_add(used_extra_col.saturating_mul(price_col));

        for &i in members {
            rows[i].row_cost = RowCost::default();
            rows[i].breakdown = UsageBreakdown::default();
            rows[i].is_group_leader = false;
            rows[i].group_span = 0;
        }

        rows[leader].is_group_leader = true;
        rows[leader].group_span = members.len();
        rows[leader].breakdown = UsageBreakdown {
            used_basic_bw,
            used_extra_bw,
            used_basic_col,
            used_extra_col,
        };
        rows[leader].row_cost = RowCost {
            basic: basic_sum,
            extra: extra_fee,
            total: basic_sum.saturating_add(extra_fee),
        };
    }
}

use crate::billing::{SettlementDetail, State};
use serde::Serialize;
use std::collections::BTreeMap;

/// One detected continuity break: a period whose opening counters do not
/// match the prior period's closing counters for the same asset.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ContinuityBreak {
    pub asset_id: String,
    /// (year, month) of the earlier of the two adjacent periods
    pub prior_period: (u16, u8),
    /// (year, month) of the later period whose `prev` is off
    pub next_period: (u16, u8),
    /// Names of the counter fields that mismatch
    pub fields: Vec<&'static str>,
}

/// Fetch a client's persisted detail rows across a year range, sorted
/// chronologically by (year, month), then detail id.
pub fn fetch_client_timeline(
    state: &State,
    org_id: &str,
    client_id: &str,
    start_year: u16,
    end_year: u16,
) -> Vec<SettlementDetail> {
    let prefix_match = |d: &SettlementDetail| {
        d.year >= start_year
            && d.year <= end_year
            && state
                .get_settlement(&d.settlement_key)
                .map(|s| s.id.org_id == org_id && s.id.client_id == client_id && !s.is_deleted)
                .unwrap_or(false)
    };

    let mut rows: Vec<SettlementDetail> = state
        .details
        .values()
        .filter(|d| prefix_match(d))
        .cloned()
        .collect();
    rows.sort_by_key(|d| (d.year, d.month, d.id));
    rows
}

/// Flag every adjacent period pair where a period's `prev` counters do
/// not equal the prior period's `curr` counters for the same asset.
///
/// Advisory only: breaks are surfaced for operator review and never
/// block a save.
pub fn validate_continuity(rows: &[SettlementDetail]) -> Vec<ContinuityBreak> {
    let mut per_asset: BTreeMap<&str, Vec<&SettlementDetail>> = BTreeMap::new();
    for row in rows {
        per_asset.entry(&row.asset_id).or_default().push(row);
    }

    let mut breaks = Vec::new();
    for (asset_id, mut details) in per_asset {
        details.sort_by_key(|d| (d.year, d.month, d.id));
        for pair in details.windows(2) {
            let (prior, next) = (pair[0], pair[1]);
            let mut fields = Vec::new();
            if next.prev.bw != prior.curr.bw {
                fields.push("bw");
            }
            if next.prev.col != prior.curr.col {
                fields.push("col");
            }
            if next.prev.bw_a3 != prior.curr.bw_a3 {
                fields.push("bw_a3");
            }
            if next.prev.col_a3 != prior.curr.col_a3 {
                fields.push("col_a3");
            }
            if !fields.is_empty() {
                breaks.push(ContinuityBreak {
                    asset_id: asset_id.to_string(),
                    prior_period: prior.period(),
                    next_period: next.period(),
                    fields,
                });
            }
        }
    }
    breaks
}

/// Read-only guard used before allowing an edit that would precede an
/// already-billed later period for the same asset.
pub fn check_future_settlements(state: &State, asset_id: &str, year: u16, month: u8) -> bool {
    state.has_future_settlement(asset_id, year, month)
}

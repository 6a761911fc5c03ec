use crate::billing::asset::{Asset, AssetStatus};
use crate::billing::counter::CounterSnapshot;
use crate::billing::history::{HistoryAction, MachineHistoryEntry};
use serde::{Deserialize, Serialize};

/// Lifecycle flags for one asset in one billing period.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleFlags {
    /// An Install ledger entry exists within the period
    pub newly_installed: bool,

    /// A plain Withdraw ledger entry exists within the period
    pub withdrawn: bool,

    /// A replacement Withdraw entry exists within the period (old machine)
    pub replacement_before: bool,

    /// Installed this period as the replacement machine (new machine)
    pub replacement_after: bool,

    /// Status is pending-replacement-withdrawal: final settlement row,
    /// excluded from future billing runs
    pub pending_withdrawal: bool,
}

impl LifecycleFlags {
    /// Whether this row corresponds to a withdrawal/replacement event
    /// rather than ordinary use
    pub fn is_replacement_record(&self) -> bool {
        self.withdrawn || self.replacement_before || self.pending_withdrawal
    }

    /// Whether saving this row must return the machine to the warehouse
    pub fn triggers_warehouse_return(&self) -> bool {
        self.withdrawn || self.replacement_before || self.pending_withdrawal
    }
}

/// Which counter pair serves as "current" for billing this period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentSource {
    /// Operator-entered current counts
    OperatorInput,
    /// Final counters captured at withdrawal in the ledger
    LedgerFinal(CounterSnapshot),
    /// No further operator input expected; bill from last known counters
    /// (previous == current, zero usage)
    LastKnown,
}

/// Lifecycle classification for one asset in one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub flags: LifecycleFlags,
    pub current_source: CurrentSource,
}

/// Classify an asset for a billing period from its status and its
/// appearance in the machine history ledger.
///
/// A Withdraw entry within the period takes precedence: the ledger's final
/// counters become "current". Otherwise a pending-replacement-withdrawal
/// status bills from last known counters. Otherwise the operator input
/// applies. Install entries only set flags; they never change the source.
pub fn classify(asset: &Asset, ledger: &[MachineHistoryEntry], year: u16, month: u8) -> Classification {
    let mut flags = LifecycleFlags::default();
    let mut current_source = CurrentSource::OperatorInput;

    let in_period = |e: &&MachineHistoryEntry| e.asset_id == asset.id && e.in_period(year, month);

    let withdraw = ledger
        .iter()
        .filter(in_period)
        .find(|e| e.action == HistoryAction::Withdraw);

    let install = ledger
        .iter()
        .filter(in_period)
        .find(|e| e.action == HistoryAction::Install);

    if let Some(entry) = withdraw {
        if entry.is_replacement() {
            flags.replacement_before = true;
        } else {
            flags.withdrawn = true;
        }
        current_source = CurrentSource::LedgerFinal(entry.counts);
    } else if asset.status == AssetStatus::PendingReplacementWithdrawal {
        flags.pending_withdrawal = true;
        current_source = CurrentSource::LastKnown;
    }

    if let Some(entry) = install {
        flags.newly_installed = true;
        if entry.memo.contains(crate::billing::history::REPLACEMENT_MEMO_TAG) {
            flags.replacement_after = true;
        }
    }

    Classification {
        flags,
        current_source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::asset::PlanTerms;

    fn installed_asset(id: &str) -> Asset {
        let mut asset = Asset::new(id.to_string(), PlanTerms::default(), CounterSnapshot::zero());
        asset.install("c-1".to_string());
        asset
    }

    fn ledger_entry(
        id: u64,
        asset_id: &str,
        action: HistoryAction,
        counts: CounterSnapshot,
        year: u16,
        month: u8,
        memo: &str,
    ) -> MachineHistoryEntry {
        MachineHistoryEntry {
            id,
            asset_id: asset_id.to_string(),
            action,
            counts,
            year,
            month,
            memo: memo.to_string(),
            actor: "op-1".to_string(),
            recorded_at: 0,
        }
    }

    #[test]
    fn test_ordinary_installed_asset_uses_operator_input() {
        let asset = installed_asset("m-1");
        let c = classify(&asset, &[], 2024, 5);
        assert_eq!(c.current_source, CurrentSource::OperatorInput);
        assert!(!c.flags.is_replacement_record());
    }

    #[test]
    fn test_withdraw_in_period_uses_ledger_final_counts() {
        let asset = installed_asset("m-1");
        let final_counts = CounterSnapshot::new(500, 50, 0, 0);
        let ledger = vec![ledger_entry(
            0,
            "m-1",
            HistoryAction::Withdraw,
            final_counts,
            2024,
            5,
            "end of contract",
        )];
        let c = classify(&asset, &ledger, 2024, 5);
        assert!(c.flags.withdrawn);
        assert!(!c.flags.replacement_before);
        assert_eq!(c.current_source, CurrentSource::LedgerFinal(final_counts));
        assert!(c.flags.triggers_warehouse_return());
    }

    #[test]
    fn test_replacement_withdraw_sets_replacement_before() {
        let asset = installed_asset("m-1");
        let ledger = vec![ledger_entry(
            0,
            "m-1",
            HistoryAction::Withdraw,
            CounterSnapshot::new(500, 50, 0, 0),
            2024,
            5,
            "replacement for m-2",
        )];
        let c = classify(&asset, &ledger, 2024, 5);
        assert!(c.flags.replacement_before);
        assert!(!c.flags.withdrawn);
    }

    #[test]
    fn test_withdraw_outside_period_ignored() {
        let asset = installed_asset("m-1");
        let ledger = vec![ledger_entry(
            0,
            "m-1",
            HistoryAction::Withdraw,
            CounterSnapshot::new(500, 50, 0, 0),
            2024,
            4,
            "",
        )];
        let c = classify(&asset, &ledger, 2024, 5);
        assert_eq!(c.current_source, CurrentSource::OperatorInput);
        assert!(!c.flags.withdrawn);
    }

    #[test]
    fn test_install_in_period_flags_newly_installed() {
        let asset = installed_asset("m-2");
        let ledger = vec![ledger_entry(
            0,
            "m-2",
            HistoryAction::Install,
            CounterSnapshot::zero(),
            2024,
            5,
            "replacement for m-1",
        )];
        let c = classify(&asset, &ledger, 2024, 5);
        assert!(c.flags.newly_installed);
        assert!(c.flags.replacement_after);
        // New machine still bills from operator input
        assert_eq!(c.current_source, CurrentSource::OperatorInput);
        assert!(!c.flags.triggers_warehouse_return());
    }

    #[test]
    fn test_pending_withdrawal_bills_from_last_known() {
        let mut asset = installed_asset("m-1");
        asset.status = AssetStatus::PendingReplacementWithdrawal;
        let c = classify(&asset, &[], 2024, 5);
        assert!(c.flags.pending_withdrawal);
        assert_eq!(c.current_source, CurrentSource::LastKnown);
        assert!(c.flags.triggers_warehouse_return());
    }

    #[test]
    fn test_other_assets_entries_ignored() {
        let asset = installed_asset("m-1");
        let ledger = vec![ledger_entry(
            0,
            "m-9",
            HistoryAction::Withdraw,
            CounterSnapshot::new(500, 50, 0, 0),
            2024,
            5,
            "",
        )];
        let c = classify(&asset, &ledger, 2024, 5);
        assert!(!c.flags.withdrawn);
        assert_eq!(c.current_source, CurrentSource::OperatorInput);
    }
}

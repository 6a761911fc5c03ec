use crate::billing::counter::CounterSnapshot;
use serde::{Deserialize, Serialize};

/// Memo marker convention: a Withdraw entry whose memo contains this tag
/// records a replacement, not a plain removal.
pub const REPLACEMENT_MEMO_TAG: &str = "replacement";

/// Machine history ledger action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    /// Machine installed at a client
    Install,
    /// Machine withdrawn from a client (final counters captured)
    Withdraw,
    /// Retroactive edit of an already-persisted settlement row (audit only)
    UpdatePast,
}

/// One append-only machine history ledger entry.
///
/// Entries are inserted, never mutated. They serve three purposes:
/// whether an asset newly appeared in a period, its final counters at
/// withdrawal, and the audit trail for retroactive edits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineHistoryEntry {
    /// Sequential ledger id (0, 1, 2, ...)
    pub id: u64,

    pub asset_id: String,

    pub action: HistoryAction,

    /// Counter snapshot at the time of the event
    pub counts: CounterSnapshot,

    /// Billing period the event falls in
    pub year: u16,
    pub month: u8,

    pub memo: String,

    /// Who recorded the entry (operator id; audit trail)
    pub actor: String,

    /// Unix timestamp
    pub recorded_at: i64,
}

impl MachineHistoryEntry {
    /// Whether a Withdraw entry records a replacement rather than a plain
    /// withdrawal, per the memo marker convention.
    pub fn is_replacement(&self) -> bool {
        self.action == HistoryAction::Withdraw && self.memo.contains(REPLACEMENT_MEMO_TAG)
    }

    /// Whether this entry falls in the given billing period
    pub fn in_period(&self, year: u16, month: u8) -> bool {
        self.year == year && self.month == month
    }
}

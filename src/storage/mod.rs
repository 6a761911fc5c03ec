pub mod kv;

pub use kv::FileStorage;

use crate::billing::{MachineHistoryEntry, State};
use crate::error::Result;

/// Storage abstraction for the machine history ledger and state snapshots.
///
/// Implementations must preserve:
/// - Append-only semantics for the ledger log
/// - Atomic snapshot writes (crash-safe)
///
/// Each call is an independent round trip; there is no cross-call
/// transaction. Multi-step writers are built on top of this and inherit
/// per-statement atomicity only.
pub trait Storage {
    /// Append a ledger entry to the log (append-only, fsync before ack)
    fn append_history(&mut self, entry: &MachineHistoryEntry) -> Result<()>;

    /// Load the latest state snapshot with its ledger high-water mark
    ///
    /// Returns `None` if no snapshot exists (empty state).
    fn load_state(&self) -> Result<Option<(State, u64)>>;

    /// Persist state snapshot atomically (write to temp file, fsync, rename)
    ///
    /// `history_watermark` is the next ledger id; every entry below it is
    /// reflected in this state.
    fn persist_state(&mut self, state: &State, history_watermark: u64) -> Result<()>;

    /// Load ledger entries from the log starting from `from_id` (inclusive)
    fn load_history_from(&self, from_id: u64) -> Result<Vec<MachineHistoryEntry>>;
}

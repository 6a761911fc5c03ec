pub mod bulk;
pub mod timeline;
pub mod writer;

pub use bulk::{update_bulk_history, HistoryEdit};
pub use timeline::{
    check_future_settlements, fetch_client_timeline, validate_continuity, ContinuityBreak,
};
pub use writer::{
    cancel_settlement, exclude_asset, save_settlement, ClientSelection, SaveOutcome,
};

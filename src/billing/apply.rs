use crate::billing::asset::{Asset, AssetStatus, Client, GroupRef, PlanTerms};
use crate::billing::counter::CounterSnapshot;
use crate::billing::history::{HistoryAction, MachineHistoryEntry};
use crate::billing::State;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fleet lifecycle event.
///
/// Events mutate fleet composition and the machine history ledger.
/// Settlement writes go through `settle::writer`, not through events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    RegisterClient {
        id: String,
        name: String,
    },
    RegisterAsset {
        id: String,
        plan: PlanTerms,
        initial_counts: CounterSnapshot,
    },
    /// Place a warehouse machine at a client; appends an Install ledger entry
    Install {
        asset_id: String,
        client_id: String,
        counts: CounterSnapshot,
        year: u16,
        month: u8,
        memo: String,
    },
    /// Record removal from a client with final counters; the machine sits
    /// pending until its final settlement row is saved
    Withdraw {
        asset_id: String,
        counts: CounterSnapshot,
        year: u16,
        month: u8,
        memo: String,
    },
    /// Change an asset's billing-group membership
    AssignGroup {
        asset_id: String,
        group: GroupRef,
    },
}

/// Validate and apply one fleet event.
///
/// Validation rejects before any mutation. Returns the ledger entries the
/// event appended (for the storage log); registration and group changes
/// append none.
pub fn apply_event(
    state: &mut State,
    event: &Event,
    actor: &str,
    now: i64,
) -> Result<Vec<MachineHistoryEntry>> {
    match event {
        Event::RegisterClient { id, name } => {
            if state.get_client(id).is_some() {
                return Err(Error::Validation(format!("Client {} already exists", id)));
            }
            state.insert_client(Client::new(id.clone(), name.clone()));
            Ok(Vec::new())
        }

        Event::RegisterAsset {
            id,
            plan,
            initial_counts,
        } => {
            if state.get_asset(id).is_some() {
                return Err(Error::Validation(format!("Asset {} already exists", id)));
            }
            state.insert_asset(Asset::new(id.clone(), *plan, *initial_counts));
            Ok(Vec::new())
        }

        Event::Install {
            asset_id,
            client_id,
            counts,
            year,
            month,
            memo,
        } => {
            if state.get_client(client_id).is_none() {
                return Err(Error::Validation(format!(
                    "Client {} does not exist",
                    client_id
                )));
            }
            let asset = state
                .get_asset(asset_id)
                .ok_or_else(|| Error::Validation(format!("Asset {} does not exist", asset_id)))?;
            if asset.status == AssetStatus::Installed {
                return Err(Error::Validation(format!(
                    "Asset {} is already installed",
                    asset_id
                )));
            }
            if asset.status == AssetStatus::Disposed {
                return Err(Error::Validation(format!(
                    "Asset {} has been disposed",
                    asset_id
                )));
            }

            let entry = state.record_history(
                asset_id,
                HistoryAction::Install,
                *counts,
                *year,
                *month,
                memo,
                actor,
                now,
            );
            let asset = state
                .get_asset_mut(asset_id)
                .ok_or_else(|| Error::StateError(format!("Asset {} vanished", asset_id)))?;
            asset.install(client_id.clone());
            Ok(vec![entry])
        }

        Event::Withdraw {
            asset_id,
            counts,
            year,
            month,
            memo,
        } => {
            let asset = state
                .get_asset(asset_id)
                .ok_or_else(|| Error::Validation(format!("Asset {} does not exist", asset_id)))?;
            if asset.status != AssetStatus::Installed {
                return Err(Error::Validation(format!(
                    "Asset {} is not installed",
                    asset_id
                )));
            }

            let entry = state.record_history(
                asset_id,
                HistoryAction::Withdraw,
                *counts,
                *year,
                *month,
                memo,
                actor,
                now,
            );
            // Keeps its client until the final settlement row is saved;
            // the settlement writer performs the warehouse return.
            let asset = state
                .get_asset_mut(asset_id)
                .ok_or_else(|| Error::StateError(format!("Asset {} vanished", asset_id)))?;
            asset.status = AssetStatus::PendingReplacementWithdrawal;
            Ok(vec![entry])
        }

        Event::AssignGroup { asset_id, group } => {
            if let GroupRef::Pending { seed_asset_id } = group {
                if state.get_asset(seed_asset_id).is_none() {
                    return Err(Error::Validation(format!(
                        "Group seed asset {} does not exist",
                        seed_asset_id
                    )));
                }
            }
            let asset = state
                .get_asset_mut(asset_id)
                .ok_or_else(|| Error::Validation(format!("Asset {} does not exist", asset_id)))?;
            asset.group = group.clone();
            Ok(Vec::new())
        }
    }
}

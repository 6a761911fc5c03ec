use clap::{Parser, Subcommand};
use fleet_billing::billing::{apply_event, calculate_client_bill, CounterSnapshot, Event, State};
use fleet_billing::config::Config;
use fleet_billing::error::{Error, Result};
use fleet_billing::logger::Logger;
use fleet_billing::settle::{
    cancel_settlement, exclude_asset, fetch_client_timeline, save_settlement,
    update_bulk_history, validate_continuity, ClientSelection, HistoryEdit,
};
use fleet_billing::storage::{FileStorage, Storage};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Read};

#[derive(Parser)]
#[command(name = "fleet-billing")]
#[command(about = "Fleet Billing CLI - Rental fleet meter-to-invoice engine")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: "human" or "json"
    #[arg(short, long, default_value = "human")]
    pub format: String,

    /// Data directory path
    #[arg(short, long)]
    pub data_dir: Option<String>,

    /// Organization id scoping every operation
    #[arg(long, default_value = "default")]
    pub org: String,

    /// Operator recorded on ledger entries
    #[arg(long, default_value = "operator")]
    pub actor: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the data directory
    Init,

    /// Apply a fleet event (register/install/withdraw/assign-group)
    Apply {
        /// Event JSON (or read from stdin if not provided)
        #[arg(short, long)]
        event: Option<String>,

        /// Event file path
        #[arg(long)]
        file: Option<String>,

        /// Dry-run: validate but don't apply
        #[arg(long)]
        dry_run: bool,
    },

    /// Compute a client's bill for a period (no persistence)
    Calculate {
        client: String,
        year: u16,
        month: u8,

        /// Operator-entered current counts JSON: {"asset-id": {"bw":..,..}}
        #[arg(short, long)]
        input: Option<String>,

        /// Counts file path
        #[arg(long)]
        file: Option<String>,
    },

    /// Compute and persist a client's settlement for a period
    Save {
        client: String,
        year: u16,
        month: u8,

        /// Operator-entered current counts JSON
        #[arg(short, long)]
        input: Option<String>,

        /// Counts file path
        #[arg(long)]
        file: Option<String>,
    },

    /// Mark an asset as intentionally not billed for one period
    Exclude {
        client: String,
        asset: String,
        year: u16,
        month: u8,
    },

    /// Show a client's settlement timeline with continuity warnings
    Timeline {
        client: String,
        start_year: u16,
        end_year: u16,
    },

    /// Apply retroactive edits to persisted, unpaid detail rows
    BulkUpdate {
        /// Edits JSON: [{"detail_id":..,"prev":{..},"curr":{..}}]
        #[arg(short, long)]
        edits: Option<String>,

        /// Edits file path
        #[arg(long)]
        file: Option<String>,
    },

    /// Cancel an unpaid settlement so the period can be billed again
    Cancel {
        client: String,
        year: u16,
        month: u8,
    },

    /// Mark a client's settlement for a period as paid
    MarkPaid {
        client: String,
        year: u16,
        month: u8,
    },

    /// Show machine history ledger entries from the log
    History {
        /// Only entries for this asset
        #[arg(short, long)]
        asset: Option<String>,

        /// First ledger id to include
        #[arg(long, default_value_t = 0)]
        from: u64,
    },

    /// List a client's billable assets
    Assets {
        client: String,
    },
}

/// Load state from the snapshot or start empty
pub fn load_or_create_state(storage: &FileStorage) -> Result<State> {
    match storage.load_state()? {
        Some((state, _)) => Ok(state),
        None => Ok(State::new()),
    }
}

/// Read a JSON payload from an inline argument, a file, or stdin
fn read_payload(inline: Option<String>, file: Option<&str>) -> Result<String> {
    if let Some(json) = inline {
        return Ok(json);
    }
    match file {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("Failed to read file {}: {}", path, e))),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| Error::Validation(format!("Failed to read from stdin: {}", e)))?;
            Ok(buffer)
        }
    }
}

fn parse_counts(json: &str) -> Result<HashMap<String, CounterSnapshot>> {
    serde_json::from_str(json)
        .map_err(|e| Error::Validation(format!("Failed to parse counts JSON: {}", e)))
}

/// Format output based on format type
fn format_output<T: serde::Serialize + std::fmt::Debug>(data: &T, format: &str) -> Result<String> {
    match format {
        "json" => serde_json::to_string_pretty(data)
            .map_err(|e| Error::StateError(format!("Failed to serialize JSON: {}", e))),
        _ => Ok(format!("{:#?}", data)),
    }
}

/// Append newly recorded ledger entries and persist the snapshot
fn commit(
    storage: &mut FileStorage,
    state: &State,
    entries_before: usize,
) -> Result<()> {
    for entry in &state.history[entries_before..] {
        storage.append_history(entry)?;
    }
    storage.persist_state(state, state.next_history_id)?;
    Ok(())
}

/// Build one client's selection for a period from state + operator counts
fn build_selection(
    state: &State,
    client_id: &str,
    year: u16,
    month: u8,
    input_map: &HashMap<String, CounterSnapshot>,
) -> ClientSelection {
    let assets = state.billable_assets_for_client(client_id);
    let prev_map = state.prev_counts_for_client(client_id, year, month);
    let bill = calculate_client_bill(
        client_id,
        &assets,
        &prev_map,
        input_map,
        &state.history,
        year,
        month,
    );
    ClientSelection {
        client_id: client_id.to_string(),
        rows: bill.details,
        total_amount: bill.total_amount,
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(std::path::PathBuf::from(dir));
    }
    if cli.format == "json" {
        config.set_output_format("json".to_string());
    }

    let mut storage = FileStorage::new(&config);
    let now = fleet_billing::current_timestamp();

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(config.get_data_dir())
                .map_err(|e| Error::StateError(format!("Failed to create data directory: {}", e)))?;
            println!(
                "Initialized data directory at: {}",
                config.get_data_dir().display()
            );
            Ok(())
        }

        Commands::Apply {
            event,
            file,
            dry_run,
        } => {
            let mut state = load_or_create_state(&storage)?;
            let json = read_payload(event, file.as_deref())?;
            let event: Event = serde_json::from_str(&json)
                .map_err(|e| Error::Validation(format!("Failed to parse event JSON: {}", e)))?;

            if dry_run {
                // Validate against a scratch copy, discard the result
                let mut scratch = state.clone();
                apply_event(&mut scratch, &event, &cli.actor, now)?;
                println!("✓ Event is valid");
                return Ok(());
            }

            let before = state.history.len();
            apply_event(&mut state, &event, &cli.actor, now)?;
            commit(&mut storage, &state, before)?;
            println!("✓ Event applied");
            Ok(())
        }

        Commands::Calculate {
            client,
            year,
            month,
            input,
            file,
        } => {
            let state = load_or_create_state(&storage)?;
            let input_map = parse_counts(&read_payload(input, file.as_deref())?)?;
            let selection = build_selection(&state, &client, year, month, &input_map);

            for row in &selection.rows {
                if row.regression.any() {
                    Logger::warn(&format!(
                        "Meter regression detected for asset {} in {}-{:02}",
                        row.asset_id, year, month
                    ));
                }
            }

            println!("{}", format_output(&selection, &cli.format)?);
            Ok(())
        }

        Commands::Save {
            client,
            year,
            month,
            input,
            file,
        } => {
            let mut state = load_or_create_state(&storage)?;
            let input_map = parse_counts(&read_payload(input, file.as_deref())?)?;
            let selection = build_selection(&state, &client, year, month, &input_map);

            let before = state.history.len();
            let outcome = save_settlement(&mut state, &cli.org, year, month, &[selection], now);
            if outcome.success {
                commit(&mut storage, &state, before)?;
            }
            println!("{}", format_output(&outcome, &cli.format)?);
            Ok(())
        }

        Commands::Exclude {
            client,
            asset,
            year,
            month,
        } => {
            let mut state = load_or_create_state(&storage)?;
            let before = state.history.len();
            let outcome = exclude_asset(&mut state, &cli.org, &client, &asset, year, month, now);
            if outcome.success {
                commit(&mut storage, &state, before)?;
            }
            println!("{}", format_output(&outcome, &cli.format)?);
            Ok(())
        }

        Commands::Timeline {
            client,
            start_year,
            end_year,
        } => {
            let state = load_or_create_state(&storage)?;
            let rows = fetch_client_timeline(&state, &cli.org, &client, start_year, end_year);
            let breaks = validate_continuity(&rows);
            for b in &breaks {
                Logger::warn(&format!(
                    "Counter continuity break for asset {} between {}-{:02} and {}-{:02} ({})",
                    b.asset_id,
                    b.prior_period.0,
                    b.prior_period.1,
                    b.next_period.0,
                    b.next_period.1,
                    b.fields.join(", ")
                ));
            }
            let output = TimelineOutput {
                client: client.clone(),
                rows,
                continuity_breaks: breaks,
            };
            println!("{}", format_output(&output, &cli.format)?);
            Ok(())
        }

        Commands::BulkUpdate { edits, file } => {
            let mut state = load_or_create_state(&storage)?;
            let json = read_payload(edits, file.as_deref())?;
            let edits: Vec<HistoryEdit> = serde_json::from_str(&json)
                .map_err(|e| Error::Validation(format!("Failed to parse edits JSON: {}", e)))?;

            let before = state.history.len();
            let outcome = update_bulk_history(&mut state, &cli.actor, &edits, now);
            if outcome.success {
                commit(&mut storage, &state, before)?;
            }
            println!("{}", format_output(&outcome, &cli.format)?);
            Ok(())
        }

        Commands::Cancel {
            client,
            year,
            month,
        } => {
            let mut state = load_or_create_state(&storage)?;
            let before = state.history.len();
            cancel_settlement(&mut state, &cli.org, &client, year, month)?;
            commit(&mut storage, &state, before)?;
            println!("✓ Settlement cancelled");
            Ok(())
        }

        Commands::MarkPaid {
            client,
            year,
            month,
        } => {
            let mut state = load_or_create_state(&storage)?;
            let key = match state.find_settlement(&cli.org, &client, year, month) {
                Some(s) => {
                    if s.is_paid {
                        return Err(Error::Conflict(format!(
                            "Settlement for client {} in {}-{:02} is already paid",
                            client, year, month
                        )));
                    }
                    s.id.key()
                }
                None => {
                    return Err(Error::StateError(format!(
                        "No settlement for client {} in {}-{:02}",
                        client, year, month
                    )))
                }
            };
            if let Some(settlement) = state.get_settlement_mut(&key) {
                settlement.mark_paid();
            }
            for id in state
                .details
                .values()
                .filter(|d| d.settlement_key == key)
                .map(|d| d.id)
                .collect::<Vec<u64>>()
            {
                if let Some(detail) = state.get_detail_mut(id) {
                    detail.is_paid = true;
                }
            }
            let before = state.history.len();
            commit(&mut storage, &state, before)?;
            println!("✓ Settlement marked paid");
            Ok(())
        }

        Commands::History { asset, from } => {
            let mut entries = storage.load_history_from(from)?;
            if let Some(asset_id) = asset {
                entries.retain(|e| e.asset_id == asset_id);
            }
            println!("{}", format_output(&entries, &cli.format)?);
            Ok(())
        }

        Commands::Assets { client } => {
            let state = load_or_create_state(&storage)?;
            let assets: Vec<AssetOutput> = state
                .billable_assets_for_client(&client)
                .iter()
                .map(|a| AssetOutput {
                    id: a.id.clone(),
                    status: format!("{:?}", a.status),
                    group: format!("{:?}", a.group),
                    basic_fee: a.plan.basic_fee,
                })
                .collect();
            let output = AssetsOutput { client, assets };
            println!("{}", format_output(&output, &cli.format)?);
            Ok(())
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct TimelineOutput {
    client: String,
    rows: Vec<fleet_billing::billing::SettlementDetail>,
    continuity_breaks: Vec<fleet_billing::settle::ContinuityBreak>,
}

#[derive(Debug, serde::Serialize)]
struct AssetOutput {
    id: String,
    status: String,
    group: String,
    basic_fee: u64,
}

#[derive(Debug, serde::Serialize)]
struct AssetsOutput {
    client: String,
    assets: Vec<AssetOutput>,
}

use crate::billing::{MachineHistoryEntry, State};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::Storage;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;

/// File-based storage using an append-only ledger log and state snapshots.
///
/// Files:
/// - `ledger.log`: append-only machine history log (bincode, length-prefixed)
/// - `state.bin`: state snapshot (bincode State + u64 history_watermark)
/// - `state.bin.tmp`: temporary file for atomic snapshot writes
pub struct FileStorage {
    ledger_log_path: PathBuf,
    state_path: PathBuf,
    state_tmp_path: PathBuf,
}

impl FileStorage {
    /// Create a new FileStorage with paths from config
    pub fn new(config: &Config) -> Self {
        FileStorage {
            ledger_log_path: config.get_ledger_log_path(),
            state_path: config.get_state_path(),
            state_tmp_path: config.get_state_path().with_extension("bin.tmp"),
        }
    }

    /// Create FileStorage with custom paths (for testing)
    pub fn with_paths(ledger_log_path: PathBuf, state_path: PathBuf) -> Self {
        let state_tmp_path = state_path.with_extension("bin.tmp");
        FileStorage {
            ledger_log_path,
            state_path,
            state_tmp_path,
        }
    }

    fn ensure_dir(&self) -> Result<()> {
        if let Some(parent) = self.ledger_log_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::StateError(format!("Failed to create data directory: {}", e))
            })?;
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn append_history(&mut self, entry: &MachineHistoryEntry) -> Result<()> {
        self.ensure_dir()?;

        let entry_bytes = bincode::serialize(entry)
            .map_err(|e| Error::StateError(format!("Failed to serialize ledger entry: {}", e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_log_path)
            .map_err(|e| Error::StateError(format!("Failed to open ledger log: {}", e)))?;

        // Length prefix (u64 little-endian) + entry data
        let len = entry_bytes.len() as u64;
        file.write_all(&len.to_le_bytes())
            .map_err(|e| Error::StateError(format!("Failed to write entry length: {}", e)))?;
        file.write_all(&entry_bytes)
            .map_err(|e| Error::StateError(format!("Failed to write entry data: {}", e)))?;

        // Fsync for crash safety (append-only semantics)
        file.sync_all()
            .map_err(|e| Error::StateError(format!("Failed to fsync ledger log: {}", e)))?;

        Ok(())
    }

    fn load_state(&self) -> Result<Option<(State, u64)>> {
        if !self.state_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.state_path)
            .map_err(|e| Error::StateError(format!("Failed to open state file: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Error::StateError(format!("Failed to read state file: {}", e)))?;

        // Format: [State bytes][history_watermark: u64]
        if data.len() < 8 {
            return Err(Error::StateError("State file too short".to_string()));
        }

        let split = data.len() - 8;
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&data[split..]);
        let history_watermark = u64::from_le_bytes(id_bytes);

        let state: State = bincode::deserialize(&data[..split])
            .map_err(|e| Error::StateError(format!("Failed to deserialize state: {}", e)))?;

        Ok(Some((state, history_watermark)))
    }

    fn persist_state(&mut self, state: &State, history_watermark: u64) -> Result<()> {
        self.ensure_dir()?;

        let state_bytes = bincode::serialize(state)
            .map_err(|e| Error::StateError(format!("Failed to serialize state: {}", e)))?;

        let mut file = File::create(&self.state_tmp_path)
            .map_err(|e| Error::StateError(format!("Failed to create temp state file: {}", e)))?;
        file.write_all(&state_bytes)
            .map_err(|e| Error::StateError(format!("Failed to write state: {}", e)))?;
        file.write_all(&history_watermark.to_le_bytes())
            .map_err(|e| Error::StateError(format!("Failed to write history_watermark: {}", e)))?;

        // Fsync before rename (crash safety)
        file.sync_all()
            .map_err(|e| Error::StateError(format!("Failed to fsync temp state file: {}", e)))?;
        drop(file);

        // Atomic rename (crash-safe snapshot)
        fs::rename(&self.state_tmp_path, &self.state_path)
            .map_err(|e| Error::StateError(format!("Failed to rename temp state file: {}", e)))?;

        // Fsync parent directory so the rename itself is persisted
        if let Some(parent) = self.state_path.parent() {
            let parent_file = File::open(parent)
                .map_err(|e| Error::StateError(format!("Failed to open parent directory: {}", e)))?;
            parent_file
                .sync_all()
                .map_err(|e| Error::StateError(format!("Failed to fsync parent directory: {}", e)))?;
        }

        Ok(())
    }

    fn load_history_from(&self, from_id: u64) -> Result<Vec<MachineHistoryEntry>> {
        if !self.ledger_log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.ledger_log_path)
            .map_err(|e| Error::StateError(format!("Failed to open ledger log: {}", e)))?;
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        loop {
            let mut len_buf = [0u8; 8];
            match reader.read_exact(&mut len_buf) {
                Ok(_) => {
                    let len = u64::from_le_bytes(len_buf) as usize;
                    let mut entry_buf = vec![0u8; len];
                    reader.read_exact(&mut entry_buf).map_err(|e| {
                        Error::StateError(format!("Failed to read entry data: {}", e))
                    })?;

                    let entry: MachineHistoryEntry =
                        bincode::deserialize(&entry_buf).map_err(|e| {
                            Error::StateError(format!("Failed to deserialize entry: {}", e))
                        })?;
                    if entry.id >= from_id {
                        entries.push(entry);
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(e) => {
                    return Err(Error::StateError(format!("Failed to read ledger log: {}", e)));
                }
            }
        }

        Ok(entries)
    }
}

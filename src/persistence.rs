//! Ledger snapshot on disk, written after every settled round and read back at startup
//! so a restarted server keeps completed rounds, resumes, and termination flags.
//!
//! Writes go to a sibling `.tmp` file that is then renamed over the ledger, so a
//! crash mid-write leaves the previous ledger intact.

use crate::history::HistoryLedger;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct LedgerFile {
    path: PathBuf,
}

impl LedgerFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Replaces the on-disk ledger with `ledger`.
    pub fn save(&self, ledger: &HistoryLedger) -> Result<(), String> {
        let json = serde_json::to_vec_pretty(ledger).map_err(|e| format!("encode ledger: {}", e))?;
        let staging = self.staging_path();
        let mut file = std::fs::File::create(&staging).map_err(|e| format!("create {}: {}", staging.display(), e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| format!("write {}: {}", staging.display(), e))?;
        std::fs::rename(&staging, &self.path).map_err(|e| format!("rename onto {}: {}", self.path.display(), e))
    }

    /// `None` when no ledger has been written yet.
    pub fn load(&self) -> Result<Option<HistoryLedger>, String> {
        let data = match std::fs::read(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("read {}: {}", self.path.display(), e)),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| format!("decode {}: {}", self.path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEntry;
    use crate::types::AgentId;
    use rust_decimal::Decimal;
    use std::collections::BTreeMap;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("firm_formation_{}_{}.json", name, std::process::id()))
    }

    #[test]
    fn missing_file_loads_as_none() {
        let file = LedgerFile::new(temp_path("missing"));
        let _ = std::fs::remove_file(file.path());
        assert!(file.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_restores_termination_flags() {
        let file = LedgerFile::new(temp_path("restore"));
        let mut ledger = HistoryLedger::new();
        let mut rows = BTreeMap::new();
        rows.insert(
            AgentId(2),
            HistoryEntry {
                firm_owner_id: Some(AgentId(1)),
                firm_size: 2,
                firm_members: vec![AgentId(1), AgentId(2)],
                effort: Decimal::from(3),
                per_capita_effort: Decimal::new(25, 1),
                per_capita_payout: Decimal::new(325, 2),
                payoff: Decimal::new(825, 2),
                was_terminated: false,
            },
        );
        ledger.append(1, rows).unwrap();
        ledger.mark_terminated(1, AgentId(2));
        file.save(&ledger).unwrap();

        let loaded = file.load().unwrap().unwrap();
        assert_eq!(loaded, ledger);
        assert!(loaded.round(1).unwrap().get(AgentId(2)).unwrap().was_terminated);
        let _ = std::fs::remove_file(file.path());
    }

    #[test]
    fn save_replaces_previous_ledger_and_leaves_no_staging_file() {
        let file = LedgerFile::new(temp_path("replace"));
        std::fs::write(file.path(), b"{ not a ledger").unwrap();
        assert!(file.load().unwrap_err().starts_with("decode"));

        file.save(&HistoryLedger::new()).unwrap();
        assert_eq!(file.load().unwrap(), Some(HistoryLedger::new()));
        assert!(!file.staging_path().exists());
        let _ = std::fs::remove_file(file.path());
    }

    #[test]
    fn interrupted_write_keeps_last_good_ledger() {
        let file = LedgerFile::new(temp_path("interrupted"));
        file.save(&HistoryLedger::new()).unwrap();
        // A crash between create and rename leaves only a partial staging file.
        std::fs::write(file.staging_path(), b"{\"rounds\": {").unwrap();
        assert_eq!(file.load().unwrap(), Some(HistoryLedger::new()));
        let _ = std::fs::remove_file(file.staging_path());
        let _ = std::fs::remove_file(file.path());
    }
}

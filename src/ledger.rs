use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

pub const MAX_ATTEMPTS: u32 = 2;

const DATA_FILE: &str = "data.json";
const TRIES_FILE: &str = "tries.json";
const FAILED_FILE: &str = "failed";
const BETSLIPS_DIR: &str = "betslips";

/// Durable per-entity attempt/outcome state under the export root.
///
/// Layout, one directory per entity id:
///   `<root>/<id>/data.json`  - the record; its existence marks success
///   `<root>/<id>/tries.json` - attempt counter
///   `<root>/<id>/failed`     - zero-byte terminal marker
///
/// Granularity is deliberately per entity: a partial write of one entity's
/// state can never lose another entity's progress.
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
    max_attempts: u32,
}

/// Ledger state of one entity. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Untried,
    Attempted(u32),
    Done,
    Failed,
}

impl Ledger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_attempts: MAX_ATTEMPTS,
        }
    }

    pub fn entity_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    pub fn betslip_path(&self, user_id: &str, bet_slip_id: &str) -> PathBuf {
        self.entity_dir(user_id)
            .join(BETSLIPS_DIR)
            .join(format!("{bet_slip_id}.json"))
    }

    /// Current state of `id`. A success marker wins over anything else, so a
    /// stale counter left behind by an interrupted run can never cause a
    /// completed entity to be re-attempted.
    pub fn state(&self, id: &str) -> Result<EntryState> {
        let dir = self.entity_dir(id);
        if dir.join(DATA_FILE).exists() {
            return Ok(EntryState::Done);
        }
        if dir.join(FAILED_FILE).exists() {
            return Ok(EntryState::Failed);
        }
        let tries_path = dir.join(TRIES_FILE);
        if !tries_path.exists() {
            return Ok(EntryState::Untried);
        }
        let raw = fs::read_to_string(&tries_path)
            .with_context(|| format!("reading {}", tries_path.display()))?;
        let count: u32 = serde_json::from_str(&raw)
            .with_context(|| format!("parsing {}", tries_path.display()))?;
        Ok(EntryState::Attempted(count))
    }

    /// Whether `id` still has attempt budget left.
    pub fn should_attempt(&self, id: &str) -> Result<bool> {
        Ok(match self.state(id)? {
            EntryState::Done | EntryState::Failed => false,
            EntryState::Attempted(count) => count < self.max_attempts,
            EntryState::Untried => true,
        })
    }

    /// Bump the attempt counter, durably, *before* extraction starts. A
    /// crash mid-extraction is thereby counted against the budget and cannot
    /// loop forever on an entity that kills the driver.
    pub fn record_attempt(&self, id: &str) -> Result<u32> {
        let dir = self.entity_dir(id);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let count = match self.state(id)? {
            EntryState::Attempted(count) => count + 1,
            _ => 1,
        };
        write_json(&dir.join(TRIES_FILE), &count)?;
        debug!(id, attempt = count, "recorded attempt");
        Ok(count)
    }

    /// Write the record; its presence is the success marker.
    pub fn record_success<T: Serialize>(&self, id: &str, record: &T) -> Result<()> {
        let dir = self.entity_dir(id);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        write_json(&dir.join(DATA_FILE), record)?;
        info!(id, "entity done");
        Ok(())
    }

    /// Terminal failure marker, distinguishable from "never attempted".
    pub fn record_failure(&self, id: &str) -> Result<()> {
        let dir = self.entity_dir(id);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let path = dir.join(FAILED_FILE);
        fs::write(&path, []).with_context(|| format!("writing {}", path.display()))?;
        info!(id, "entity marked failed");
        Ok(())
    }

    pub fn has_betslip(&self, user_id: &str, bet_slip_id: &str) -> bool {
        self.betslip_path(user_id, bet_slip_id).exists()
    }

    pub fn record_betslip<T: Serialize>(
        &self,
        user_id: &str,
        bet_slip_id: &str,
        record: &T,
    ) -> Result<PathBuf> {
        let path = self.betslip_path(user_id, bet_slip_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        write_json(&path, record)?;
        Ok(path)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        (dir, ledger)
    }

    #[test]
    fn untried_entity_should_be_attempted() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.state("1").unwrap(), EntryState::Untried);
        assert!(ledger.should_attempt("1").unwrap());
    }

    #[test]
    fn done_entity_is_never_reattempted() {
        let (_dir, ledger) = ledger();
        ledger.record_attempt("1").unwrap();
        ledger.record_success("1", &json!({"id": "1"})).unwrap();
        assert_eq!(ledger.state("1").unwrap(), EntryState::Done);
        assert!(!ledger.should_attempt("1").unwrap());
    }

    #[test]
    fn success_takes_precedence_over_stale_counter() {
        let (_dir, ledger) = ledger();
        // Stale counter at the cap plus a success marker: success wins.
        ledger.record_attempt("1").unwrap();
        ledger.record_attempt("1").unwrap();
        ledger.record_success("1", &json!({"id": "1"})).unwrap();
        assert_eq!(ledger.state("1").unwrap(), EntryState::Done);
        assert!(!ledger.should_attempt("1").unwrap());
    }

    #[test]
    fn attempt_counter_reaches_terminal_failure() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.record_attempt("1").unwrap(), 1);
        assert!(ledger.should_attempt("1").unwrap());
        assert_eq!(ledger.record_attempt("1").unwrap(), 2);
        // Budget exhausted, a caller now records the terminal marker.
        assert!(!ledger.should_attempt("1").unwrap());
        ledger.record_failure("1").unwrap();
        assert_eq!(ledger.state("1").unwrap(), EntryState::Failed);
        assert!(!ledger.should_attempt("1").unwrap());
    }

    #[test]
    fn failure_survives_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = Ledger::new(dir.path());
            ledger.record_attempt("7").unwrap();
            ledger.record_attempt("7").unwrap();
            ledger.record_failure("7").unwrap();
        }
        // A fresh ledger over the same root sees the terminal state.
        let ledger = Ledger::new(dir.path());
        assert_eq!(ledger.state("7").unwrap(), EntryState::Failed);
        assert!(!ledger.should_attempt("7").unwrap());
        assert!(dir.path().join("7").join("failed").exists());
    }

    #[test]
    fn attempt_count_survives_process_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let ledger = Ledger::new(dir.path());
            ledger.record_attempt("9").unwrap();
        }
        let ledger = Ledger::new(dir.path());
        assert_eq!(ledger.state("9").unwrap(), EntryState::Attempted(1));
        assert!(ledger.should_attempt("9").unwrap());
    }

    #[test]
    fn entity_crashing_every_run_is_abandoned_on_the_third() {
        let dir = tempfile::tempdir().unwrap();

        // Two runs that each count an attempt and then die mid-extraction.
        for _ in 0..2 {
            let ledger = Ledger::new(dir.path());
            assert!(ledger.should_attempt("3").unwrap());
            ledger.record_attempt("3").unwrap();
        }

        // Third run: budget exhausted, entity goes terminal untouched.
        let ledger = Ledger::new(dir.path());
        assert!(!ledger.should_attempt("3").unwrap());
        ledger.record_failure("3").unwrap();

        // Any later run sees the terminal marker.
        let ledger = Ledger::new(dir.path());
        assert_eq!(ledger.state("3").unwrap(), EntryState::Failed);
        assert!(!ledger.should_attempt("3").unwrap());
    }

    #[test]
    fn betslip_skip_is_by_file_existence_only() {
        let (_dir, ledger) = ledger();
        assert!(!ledger.has_betslip("1", "100"));
        let path = ledger.record_betslip("1", "100", &json!({"s": 1})).unwrap();
        assert!(path.ends_with("1/betslips/100.json"));
        assert!(ledger.has_betslip("1", "100"));
    }

    #[test]
    fn record_round_trips_through_disk() {
        let (_dir, ledger) = ledger();
        let record = json!({
            "id": "1",
            "nested": {"a": ["x", "y"], "b": {"c": true}},
        });
        ledger.record_success("1", &record).unwrap();
        let raw = fs::read_to_string(ledger.entity_dir("1").join("data.json")).unwrap();
        let back: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, record);
    }
}

//! Latest execution outcome per target

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Latest captured outcome for one target. Overwritten by each run.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExecutionRecord {
    pub run_id: Option<String>,
    pub event_type: Option<String>,
    pub delivery_id: Option<String>,
    pub command_line: String,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    /// `None` until a process has exited with a code
    pub return_code: Option<i32>,
    pub error: Option<String>,
    pub in_progress: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Fresh in-progress record; clears anything left by the previous run.
    pub fn begin(
        &mut self,
        run_id: String,
        event_type: &str,
        delivery_id: Option<&str>,
        command_line: String,
    ) {
        *self = ExecutionRecord {
            run_id: Some(run_id),
            event_type: Some(event_type.to_string()),
            delivery_id: delivery_id.map(String::from),
            command_line,
            in_progress: true,
            started_at: Some(Utc::now()),
            ..ExecutionRecord::default()
        };
    }

    pub fn finish(&mut self) {
        self.in_progress = false;
        self.finished_at = Some(Utc::now());
    }
}

/// Process-wide table of [`ExecutionRecord`]s keyed by target name.
///
/// Readers get a cloned snapshot; a record may be observed mid-run with
/// `in_progress == true`.
#[derive(Debug, Default)]
pub struct StatusStore {
    records: RwLock<HashMap<String, ExecutionRecord>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<ExecutionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target)
            .cloned()
    }

    /// Apply `mutator` to the record for `target`, creating an empty one first if needed
    pub fn update<F>(&self, target: &str, mutator: F)
    where
        F: FnOnce(&mut ExecutionRecord),
    {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        mutator(records.entry(target.to_string()).or_default());
    }

    /// Evict the oldest records whose target fails `keep` until at most `limit` remain
    pub fn prune<F>(&self, keep: F, limit: usize)
    where
        F: Fn(&str) -> bool,
    {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let mut unkept: Vec<_> = records
            .iter()
            .filter(|(target, _)| !keep(target))
            .map(|(target, r)| (r.started_at, r.run_id.clone(), target.clone()))
            .collect();
        if unkept.len() <= limit {
            return;
        }

        unkept.sort();
        let excess = unkept.len() - limit;
        for (_, _, target) in unkept.into_iter().take(excess) {
            records.remove(&target);
        }
    }

    /// All records, ordered by target name
    pub fn snapshot(&self) -> BTreeMap<String, ExecutionRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

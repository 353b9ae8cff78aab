//! State types for tracking reconciled resources.
//!
//! These types are the engine's memory of what it actually created or
//! adopted for each logical resource, used for diffing and idempotent
//! operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::descriptor::{PropertyValue, ResourceKind};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// The complete persisted engine state for one project/environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied descriptor.
    pub descriptor_hash: String,
    /// Physical records keyed by logical name.
    pub records: HashMap<String, PhysicalRecord>,
    /// Resolved exports of the last successful run.
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// The engine's record of one physical resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalRecord {
    /// Logical name (from the descriptor).
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Provider-assigned physical identifier.
    pub physical_id: String,
    /// Hash of the last applied resolved property bag.
    pub properties_hash: String,
    /// Resolved property snapshot used for diffing.
    pub last_applied: BTreeMap<String, PropertyValue>,
    /// Outputs reported by the provider (e.g. `arn`, `dns_name`).
    pub outputs: BTreeMap<String, String>,
    /// Mirrors the last applied protect flag.
    pub protect: bool,
    /// Current status.
    pub status: RecordStatus,
    /// True if the resource was adopted rather than created.
    #[serde(default)]
    pub imported: bool,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Physical record status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// A step for this resource is in flight.
    Pending,
    /// The resource exists and its outputs are usable.
    Ready,
    /// The last step for this resource failed.
    Failed,
    /// The resource was deleted.
    Deleted,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: RunOperation,
    /// Descriptor hash at the time of the run.
    pub descriptor_hash: String,
    /// Resources affected.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of reconciliation operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// A plan was applied.
    Apply,
    /// Managed resources were destroyed.
    Destroy,
}

impl EngineState {
    /// Creates a new empty engine state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            descriptor_hash: String::new(),
            records: HashMap::new(),
            exports: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a record by logical name.
    #[must_use]
    pub fn get_record(&self, name: &str) -> Option<&PhysicalRecord> {
        self.records.get(name)
    }

    /// Gets a mutable reference to a record by logical name.
    pub fn get_record_mut(&mut self, name: &str) -> Option<&mut PhysicalRecord> {
        self.records.get_mut(name)
    }

    /// Adds or updates a record.
    pub fn set_record(&mut self, record: PhysicalRecord) {
        self.records.insert(record.name.clone(), record);
        self.last_updated = Utc::now();
    }

    /// Removes a record by logical name.
    pub fn remove_record(&mut self, name: &str) -> Option<PhysicalRecord> {
        let result = self.records.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        // Keep only the last 100 entries
        const MAX_HISTORY: usize = 100;
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all ready records.
    #[must_use]
    pub fn ready_records(&self) -> Vec<&PhysicalRecord> {
        self.records
            .values()
            .filter(|r| r.status == RecordStatus::Ready)
            .collect()
    }

    /// Returns all recorded logical names, sorted.
    #[must_use]
    pub fn record_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.records.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl PhysicalRecord {
    /// Creates a new record in `Pending` status.
    #[must_use]
    pub fn new(name: &str, kind: ResourceKind, physical_id: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            kind,
            physical_id: physical_id.to_string(),
            properties_hash: String::new(),
            last_applied: BTreeMap::new(),
            outputs: BTreeMap::new(),
            protect: false,
            status: RecordStatus::Pending,
            imported: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Updates the status.
    pub fn set_status(&mut self, status: RecordStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Looks up an output value by field name.
    #[must_use]
    pub fn output(&self, field: &str) -> Option<&str> {
        self.outputs.get(field).map(String::as_str)
    }

    /// Returns true if the resource exists and its outputs are usable.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.status, RecordStatus::Ready)
    }
}

impl RunHistoryEntry {
    /// Creates a new successful history entry.
    #[must_use]
    pub fn new(operation: RunOperation, descriptor_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            descriptor_hash: descriptor_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: RunOperation,
        descriptor_hash: &str,
        resources: Vec<String>,
        error: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            descriptor_hash: descriptor_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        write!(f, "{status}")
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_record() {
        let mut state = EngineState::new("voting-app", "prod");
        let record = PhysicalRecord::new("cluster", ResourceKind::Cluster, "c-123");

        state.set_record(record);

        let fetched = state.get_record("cluster").unwrap();
        assert_eq!(fetched.physical_id, "c-123");
        assert_eq!(fetched.status, RecordStatus::Pending);
        assert!(!fetched.imported);
    }

    #[test]
    fn test_remove_record() {
        let mut state = EngineState::new("p", "dev");
        state.set_record(PhysicalRecord::new("a", ResourceKind::Role, "r-1"));

        assert!(state.remove_record("a").is_some());
        assert!(state.remove_record("a").is_none());
        assert!(state.get_record("a").is_none());
    }

    #[test]
    fn test_ready_records_filter() {
        let mut state = EngineState::new("p", "dev");
        let mut ready = PhysicalRecord::new("a", ResourceKind::Role, "r-1");
        ready.set_status(RecordStatus::Ready);
        state.set_record(ready);
        state.set_record(PhysicalRecord::new("b", ResourceKind::Role, "r-2"));

        let names: Vec<&str> = state.ready_records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = EngineState::new("p", "dev");
        for i in 0..150 {
            state.add_history(RunHistoryEntry::new(
                RunOperation::Apply,
                &format!("hash-{i}"),
                vec![],
            ));
        }
        assert_eq!(state.history.len(), 100);
        assert_eq!(state.history.last().unwrap().descriptor_hash, "hash-149");
    }

    #[test]
    fn test_record_output_lookup() {
        let mut record = PhysicalRecord::new("cluster", ResourceKind::Cluster, "c-1");
        record
            .outputs
            .insert(String::from("arn"), String::from("arn:aws:ecs:c-1"));

        assert_eq!(record.output("arn"), Some("arn:aws:ecs:c-1"));
        assert_eq!(record.output("missing"), None);
    }
}

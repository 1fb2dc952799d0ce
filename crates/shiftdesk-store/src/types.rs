//! Core types for shift table documents.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch, the unit of every modification timestamp.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// A single shift table.
///
/// Only the envelope fields are interpreted by the sync layer. Everything else
/// (shift type, time slots, senior, split flags, ...) travels untouched in
/// `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTable {
    pub id: String,
    pub country: String,
    pub date: String,
    /// Agent rows for the grid. Opaque to the sync layer.
    pub agents: Vec<Value>,
    /// Milliseconds since epoch of the newest version of this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_to: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ShiftTable {
    /// Create a table with an empty agent grid and no payload.
    pub fn new(id: impl Into<String>, country: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            country: country.into(),
            date: date.into(),
            agents: Vec::new(),
            last_modified: None,
            is_deleted: false,
            is_archived: false,
            published_to: None,
            payload: Map::new(),
        }
    }

    /// Modification timestamp, with a missing value ordered before any real one.
    pub fn modified_at(&self) -> i64 {
        self.last_modified.unwrap_or(0)
    }

    /// Whether the archived/published/deleted flags of two versions differ.
    pub fn lifecycle_differs(&self, other: &ShiftTable) -> bool {
        self.is_archived != other.is_archived
            || self.is_deleted != other.is_deleted
            || self.published_to != other.published_to
    }

    /// Stamp the record as modified now.
    pub fn touch(&mut self) {
        self.last_modified = Some(now_millis());
    }

    /// Whether two versions match in everything but their timestamp.
    pub fn same_content(&self, other: &ShiftTable) -> bool {
        self.id == other.id
            && self.country == other.country
            && self.date == other.date
            && self.agents == other.agents
            && !self.lifecycle_differs(other)
            && self.payload == other.payload
    }
}

/// The full set of shift tables at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tables: Vec<ShiftTable>,
}

impl Snapshot {
    /// Create a snapshot from a list of tables.
    pub fn new(tables: Vec<ShiftTable>) -> Self {
        Self { tables }
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether the snapshot holds no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look up a table by id.
    pub fn get(&self, id: &str) -> Option<&ShiftTable> {
        self.tables.iter().find(|t| t.id == id)
    }

    /// Drop soft-deleted tables.
    pub fn without_deleted(mut self) -> Self {
        self.tables.retain(|t| !t.is_deleted);
        self
    }

    /// Tables currently shown to the given audience.
    pub fn published_for(&self, country: &str) -> Vec<ShiftTable> {
        self.tables
            .iter()
            .filter(|t| !t.is_deleted && !t.is_archived)
            .filter(|t| t.published_to.as_deref() == Some(country))
            .cloned()
            .collect()
    }

    /// Soft-deleted tables that still need a backup copy.
    pub fn deleted(&self) -> impl Iterator<Item = &ShiftTable> {
        self.tables.iter().filter(|t| t.is_deleted)
    }

    /// Serialize to the document layout `{ tables: [...] }`.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Agent names grouped by country, stored as `{ agents: { <country>: [..] } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRoster {
    pub agents: BTreeMap<String, Vec<String>>,
}

impl AgentRoster {
    /// An empty roster with one empty list per country.
    pub fn empty_for<S: AsRef<str>>(countries: &[S]) -> Self {
        Self {
            agents: countries
                .iter()
                .map(|c| (c.as_ref().to_string(), Vec::new()))
                .collect(),
        }
    }
}

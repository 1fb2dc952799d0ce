//! Collection and document name constants.

/// Collection holding the shift table document.
pub const SHIFTS_COLLECTION: &str = "shifts";

/// Single document that holds every shift table.
pub const SHIFT_TABLES_DOCUMENT: &str = "shiftTables";

/// Append-only copies of soft-deleted tables, one document per table id.
pub const DELETED_BACKUP_COLLECTION: &str = "deletedShiftTables";

/// Collection holding the agent roster document.
pub const AGENTS_COLLECTION: &str = "agents";

/// Single document that holds the agent roster.
pub const AGENTS_DOCUMENT: &str = "agentsList";

/// Countries recognized when no explicit list is configured.
pub const DEFAULT_COUNTRIES: &[&str] = &["Egypt", "Morocco"];

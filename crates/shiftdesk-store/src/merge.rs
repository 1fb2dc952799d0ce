//! Per-record reconciliation of a remote and a local snapshot.
//!
//! For every id seen on either side the merged snapshot holds exactly one
//! version:
//!
//! - present on one side only: that side's record
//! - present on both: the strictly newer `lastModified` wins, ties keep remote
//! - local archived/published/deleted flags differing from remote force the
//!   local version when the timestamps tie or either one is missing
//! - a record soft-deleted locally is dropped from the result (its backup copy
//!   is written separately before the commit)
//!
//! Remote order is kept; ids only known locally are appended in local order.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::{ShiftTable, Snapshot, ValidationError, Validator};

/// Merge a remotely persisted snapshot with a locally proposed one.
pub fn merge(remote: &Snapshot, local: &Snapshot) -> Snapshot {
    // Later duplicates win within a single input.
    let local_by_id: HashMap<&str, &ShiftTable> =
        local.tables.iter().map(|t| (t.id.as_str(), t)).collect();
    let remote_by_id: HashMap<&str, &ShiftTable> =
        remote.tables.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut seen = HashSet::new();
    let order: Vec<&str> = remote
        .tables
        .iter()
        .chain(local.tables.iter())
        .map(|t| t.id.as_str())
        .filter(|id| seen.insert(*id))
        .collect();

    let mut tables = Vec::with_capacity(order.len());
    for id in order {
        let chosen = match (remote_by_id.get(id).copied(), local_by_id.get(id).copied()) {
            (Some(remote), Some(local)) => pick(remote, local),
            (Some(remote), None) => remote,
            (None, Some(local)) => local,
            (None, None) => continue,
        };

        let deleted_locally = local_by_id.get(id).is_some_and(|t| t.is_deleted);
        if deleted_locally || chosen.is_deleted {
            trace!(record_id = %id, "dropping soft-deleted record from merge");
            continue;
        }

        tables.push(chosen.clone());
    }

    Snapshot::new(tables)
}

fn pick<'a>(remote: &'a ShiftTable, local: &'a ShiftTable) -> &'a ShiftTable {
    let (local_at, remote_at) = (local.modified_at(), remote.modified_at());
    if local_at > remote_at {
        return local;
    }

    // A lifecycle change only beats the stored copy when that copy is not newer.
    let undated = local.last_modified.is_none() || remote.last_modified.is_none();
    if local.lifecycle_differs(remote) && (undated || local_at == remote_at) {
        local
    } else {
        remote
    }
}

/// Merge and check the result, refusing to hand back an invalid snapshot.
pub fn merge_checked(
    validator: &Validator,
    remote: &Snapshot,
    local: &Snapshot,
) -> Result<Snapshot, ValidationError> {
    let merged = merge(remote, local);
    validator.check_snapshot(&merged)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(id: &str, modified: i64) -> ShiftTable {
        let mut t = ShiftTable::new(id, "Egypt", "2024-05-01");
        t.last_modified = Some(modified);
        t
    }

    fn ids(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.tables.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn test_one_sided_records_are_kept() {
        let remote = Snapshot::new(vec![table("a", 1)]);
        let local = Snapshot::new(vec![table("b", 1)]);
        let merged = merge(&remote, &local);
        assert_eq!(ids(&merged), vec!["a", "b"]);
    }

    #[test]
    fn test_newer_local_wins() {
        let remote = Snapshot::new(vec![table("a", 1)]);
        let mut newer = table("a", 2);
        newer.date = "2024-06-01".into();
        let merged = merge(&remote, &Snapshot::new(vec![newer.clone()]));
        assert_eq!(merged.tables, vec![newer]);
    }

    #[test]
    fn test_newer_remote_wins() {
        let mut newer = table("a", 5);
        newer.date = "2024-06-01".into();
        let remote = Snapshot::new(vec![newer.clone()]);
        let merged = merge(&remote, &Snapshot::new(vec![table("a", 3)]));
        assert_eq!(merged.tables, vec![newer]);
    }

    #[test]
    fn test_tie_keeps_remote() {
        let mut remote_version = table("a", 4);
        remote_version.date = "remote".into();
        let mut local_version = table("a", 4);
        local_version.date = "local".into();

        let merged = merge(
            &Snapshot::new(vec![remote_version]),
            &Snapshot::new(vec![local_version]),
        );
        assert_eq!(merged.tables[0].date, "remote");
    }

    #[test]
    fn test_lifecycle_change_forces_local() {
        let remote = Snapshot::new(vec![table("a", 10)]);
        let mut archived = table("a", 10);
        archived.is_archived = true;

        let merged = merge(&remote, &Snapshot::new(vec![archived]));
        assert!(merged.tables[0].is_archived);

        let mut published = table("a", 0);
        published.last_modified = None;
        published.published_to = Some("Morocco".into());
        let merged = merge(&remote, &Snapshot::new(vec![published]));
        assert_eq!(merged.tables[0].published_to.as_deref(), Some("Morocco"));
    }

    #[test]
    fn test_stale_lifecycle_change_loses_to_newer_remote() {
        let mut newer = table("a", 2);
        newer.published_to = Some("Egypt".into());
        newer.date = "new".into();
        let mut stale = table("a", 1);
        stale.date = "old".into();

        let merged = merge(&Snapshot::new(vec![newer.clone()]), &Snapshot::new(vec![stale.clone()]));
        assert_eq!(merged.tables, vec![newer.clone()]);

        let merged = merge(&Snapshot::new(vec![stale]), &Snapshot::new(vec![newer.clone()]));
        assert_eq!(merged.tables, vec![newer]);
    }

    #[test]
    fn test_local_soft_delete_removes_record() {
        let remote = Snapshot::new(vec![table("a", 1), table("b", 1)]);
        let mut gone = table("a", 1);
        gone.is_deleted = true;

        let merged = merge(&remote, &Snapshot::new(vec![gone, table("b", 1)]));
        assert_eq!(ids(&merged), vec!["b"]);
    }

    #[test]
    fn test_empty_inputs() {
        let some = Snapshot::new(vec![table("a", 1)]);
        assert_eq!(merge(&Snapshot::default(), &Snapshot::default()), Snapshot::default());
        assert_eq!(merge(&some, &Snapshot::default()), some);
        assert_eq!(merge(&Snapshot::default(), &some), some);
    }

    #[test]
    fn test_duplicate_ids_later_occurrence_wins() {
        let mut first = table("a", 9);
        first.date = "first".into();
        let mut second = table("a", 9);
        second.date = "second".into();
        let local = Snapshot::new(vec![first, second]);

        let merged = merge(&Snapshot::default(), &local);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.tables[0].date, "second");
    }

    #[test]
    fn test_merge_checked_rejects_invalid_result() {
        let validator = Validator::default();
        let mut bad = table("a", 9);
        bad.country = "Atlantis".into();

        let result = merge_checked(&validator, &Snapshot::default(), &Snapshot::new(vec![bad]));
        assert!(result.is_err());

        let ok = merge_checked(&validator, &Snapshot::default(), &Snapshot::new(vec![table("a", 1)]));
        assert!(ok.is_ok());
    }
}

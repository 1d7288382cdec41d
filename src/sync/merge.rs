//! Last-writer-wins reconciliation of two versions of a collection.
//!
//! Records are matched by `id`. When both sides hold the same id, the record
//! with the strictly later `updatedAt` wins as a whole; ties keep the local
//! copy. Deletions are ordinary tombstone records, so a delete only loses to
//! an update made after it.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::Record;

/// Compares two records' versions.
///
/// Parsed timestamps order chronologically, so the same instant written in
/// different formats is a tie. A record without a parseable `updatedAt` sorts
/// before one that has it; when neither parses, the raw strings decide.
fn compare_versions(a: &Record, b: &Record) -> Ordering {
    match (a.updated_at_time(), b.updated_at_time()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.updated_at().cmp(&b.updated_at()),
    }
}

/// Returns true if `candidate` is strictly newer than `existing`.
pub fn is_newer(candidate: &Record, existing: &Record) -> bool {
    compare_versions(candidate, existing) == Ordering::Greater
}

/// Merges `remote` into `local`.
///
/// The result holds one record per id: local order first, then ids only
/// present remotely in their remote order. Remote records without an id
/// cannot be matched and are dropped; local ones are kept untouched.
pub fn merge_records(local: &[Record], remote: &[Record]) -> Vec<Record> {
    let mut merged: Vec<Record> = Vec::with_capacity(local.len() + remote.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(local.len());

    for record in local {
        match record.key() {
            Some(key) => upsert(&mut merged, &mut index, key, record),
            None => merged.push(record.clone()),
        }
    }

    for record in remote {
        if let Some(key) = record.key() {
            upsert(&mut merged, &mut index, key, record);
        }
    }

    merged
}

fn upsert(
    merged: &mut Vec<Record>,
    index: &mut HashMap<String, usize>,
    key: String,
    record: &Record,
) {
    match index.get(&key) {
        Some(&slot) => {
            if is_newer(record, &merged[slot]) {
                merged[slot] = record.clone();
            }
        }
        None => {
            index.insert(key, merged.len());
            merged.push(record.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_json::json;

    fn record(id: &str, updated_at: &str, name: &str) -> Record {
        serde_json::from_value(json!({"id": id, "updatedAt": updated_at, "name": name})).unwrap()
    }

    fn ids(records: &[Record]) -> Vec<String> {
        records.iter().filter_map(Record::key).collect()
    }

    #[test]
    fn test_remote_only_records_are_added() {
        let local = vec![record("1", "2024-01-01T00:00:00.000Z", "a")];
        let remote = vec![record("2", "2024-01-01T00:00:00.000Z", "b")];

        let merged = merge_records(&local, &remote);
        assert_eq!(ids(&merged), vec!["1", "2"]);
    }

    #[test]
    fn test_disjoint_ids_keep_every_record() {
        let a: Vec<Record> = (0..4)
            .map(|i| record(&format!("a{}", i), "2024-01-01T00:00:00.000Z", "a"))
            .collect();
        let b: Vec<Record> = (0..3)
            .map(|i| record(&format!("b{}", i), "2024-01-01T00:00:00.000Z", "b"))
            .collect();

        assert_eq!(merge_records(&a, &b).len(), a.len() + b.len());
        assert_eq!(merge_records(&b, &a).len(), a.len() + b.len());
    }

    #[test]
    fn test_later_update_wins_regardless_of_order() {
        let older = record("1", "2024-01-01T00:00:00.000Z", "old");
        let newer = record("1", "2024-02-01T00:00:00.000Z", "new");

        let merged = merge_records(&[older.clone()], &[newer.clone()]);
        assert_eq!(merged, vec![newer.clone()]);

        let merged = merge_records(&[newer.clone()], &[older]);
        assert_eq!(merged, vec![newer]);
    }

    #[test]
    fn test_timestamps_compare_chronologically_across_offsets() {
        // 10:00+02:00 is 08:00Z, earlier than 09:00Z.
        let local = record("1", "2024-01-01T10:00:00+02:00", "local");
        let remote = record("1", "2024-01-01T09:00:00.000Z", "remote");

        let merged = merge_records(&[local], &[remote.clone()]);
        assert_eq!(merged, vec![remote]);
    }

    #[test]
    fn test_tie_keeps_local_copy() {
        let local = record("1", "2024-01-01T00:00:00.000Z", "local");
        let remote = record("1", "2024-01-01T00:00:00.000Z", "remote");

        let merged = merge_records(&[local.clone()], &[remote]);
        assert_eq!(merged, vec![local]);
    }

    #[test]
    fn test_same_instant_in_other_format_is_a_tie() {
        let local = record("1", "2024-01-01T00:00:00.000Z", "local");

        for written in ["2024-01-01T00:00:00Z", "2024-01-01T02:00:00+02:00"] {
            let remote = record("1", written, "remote");
            assert!(!is_newer(&remote, &local));
            assert_eq!(merge_records(&[local.clone()], &[remote]), vec![local.clone()]);
        }
    }

    #[test]
    fn test_unparseable_timestamps_compare_as_strings() {
        let a = record("1", "b-version", "a");
        let b = record("1", "a-version", "b");

        assert!(is_newer(&a, &b));
        assert!(!is_newer(&b, &a));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let a = vec![
            record("1", "2024-01-01T00:00:00.000Z", "a1"),
            record("2", "2024-03-01T00:00:00.000Z", "a2"),
            record("3", "2024-01-01T00:00:00.000Z", "a3"),
        ];
        let b = vec![
            record("2", "2024-02-01T00:00:00.000Z", "b2"),
            record("3", "2024-05-01T00:00:00.000Z", "b3"),
            record("4", "2024-01-01T00:00:00.000Z", "b4"),
        ];

        let once = merge_records(&a, &b);
        let twice = merge_records(&a, &once);
        assert_eq!(twice, once);
        assert_eq!(merge_records(&once, &b), once);
    }

    #[test]
    fn test_missing_timestamp_loses_to_any_timestamp() {
        let undated: Record = serde_json::from_value(json!({"id": "1", "name": "x"})).unwrap();
        let dated = record("1", "2020-01-01T00:00:00.000Z", "y");

        assert!(is_newer(&dated, &undated));
        assert!(!is_newer(&undated, &dated));
        assert_eq!(merge_records(&[undated], &[dated.clone()]), vec![dated]);
    }

    #[test]
    fn test_newer_tombstone_removes_record() {
        let alive = record("1", "2024-01-01T00:00:00.000Z", "a");
        let deleted = alive.tombstone(
            DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );

        let merged = merge_records(&[alive.clone()], &[deleted.clone()]);
        assert_eq!(merged, vec![deleted.clone()]);

        // An older copy elsewhere does not resurrect it.
        let merged = merge_records(&[deleted.clone()], &[alive]);
        assert_eq!(merged, vec![deleted]);
    }

    #[test]
    fn test_update_after_delete_wins() {
        let alive = record("1", "2024-01-01T00:00:00.000Z", "a");
        let deleted = alive.tombstone(
            DateTime::parse_from_rfc3339("2024-01-02T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        );
        let edited = record("1", "2024-01-03T00:00:00.000Z", "edited");

        let merged = merge_records(&[deleted], &[edited.clone()]);
        assert_eq!(merged, vec![edited]);
    }

    #[test]
    fn test_records_without_id() {
        let local_orphan: Record = serde_json::from_value(json!({"name": "orphan"})).unwrap();
        let remote_orphan: Record = serde_json::from_value(json!({"name": "stray"})).unwrap();

        let merged = merge_records(&[local_orphan.clone()], &[remote_orphan]);
        assert_eq!(merged, vec![local_orphan]);
    }

    #[test]
    fn test_duplicate_local_ids_collapse() {
        let first = record("1", "2024-01-01T00:00:00.000Z", "first");
        let second = record("1", "2024-02-01T00:00:00.000Z", "second");

        let merged = merge_records(&[first, second.clone()], &[]);
        assert_eq!(merged, vec![second]);
    }
}

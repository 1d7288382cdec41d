use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::{timestamp, Record};
use super::{Collection, NodeMode};

/// Point-in-time export of every tracked collection, as stored in the
/// shared snapshot file.
///
/// Collection names are kept as strings so a snapshot written by a newer
/// node with extra collections still parses; unknown ones are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_lastModified")]
    pub last_modified: String,
    #[serde(rename = "_source")]
    pub source: String,
    #[serde(rename = "_nodeId", default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(flatten)]
    pub collections: BTreeMap<String, Vec<Record>>,
}

impl Snapshot {
    pub fn new(mode: NodeMode, node_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            last_modified: timestamp(now),
            source: mode.as_str().to_string(),
            node_id: Some(node_id.to_string()),
            collections: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, collection: Collection, records: Vec<Record>) {
        self.collections
            .insert(collection.name().to_string(), records);
    }

    pub fn get(&self, collection: Collection) -> Option<&Vec<Record>> {
        self.collections.get(collection.name())
    }

    /// Known collections present in the snapshot.
    pub fn known_collections(&self) -> impl Iterator<Item = (Collection, &Vec<Record>)> {
        self.collections
            .iter()
            .filter_map(|(name, records)| Collection::parse(name).map(|c| (c, records)))
    }

    /// Returns true if this snapshot was written by the given node.
    ///
    /// Files without `_nodeId` only carry the writer's mode, so they are
    /// compared by `_source` instead.
    pub fn written_by(&self, mode: NodeMode, node_id: &str) -> bool {
        match &self.node_id {
            Some(writer) => writer == node_id,
            None => self.source == mode.as_str(),
        }
    }

    /// Returns true if the collection contents equal `other`'s, ignoring
    /// metadata and record order.
    pub fn same_contents(&self, other: &Snapshot) -> bool {
        fn by_key(records: &[Record]) -> Vec<&Record> {
            let mut sorted: Vec<&Record> = records.iter().collect();
            sorted.sort_by_key(|r| r.key());
            sorted
        }

        self.collections.len() == other.collections.len()
            && self.collections.iter().all(|(name, records)| {
                other
                    .collections
                    .get(name)
                    .map(|theirs| by_key(records) == by_key(theirs))
                    .unwrap_or(false)
            })
    }
}

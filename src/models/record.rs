use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const ID: &str = "id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const DELETED_AT: &str = "deletedAt";
pub const DELETED: &str = "_deleted";

/// How long deletion markers are kept before being purged on write.
pub const TOMBSTONE_RETENTION_DAYS: i64 = 30;

/// Formats a timestamp the way records store it (RFC 3339, millis, `Z`).
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A schema-less record: a JSON object that always carries `id`,
/// `createdAt` and `updatedAt` once it has been created through the server.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Creates a new record from user-supplied fields.
    ///
    /// Any `id`, `createdAt` or `updatedAt` in `fields` is replaced by a
    /// freshly generated id and `now`.
    pub fn create(mut fields: Map<String, Value>, now: DateTime<Utc>) -> Self {
        let at = Value::String(timestamp(now));
        fields.remove(DELETED);
        fields.remove(DELETED_AT);
        fields.insert(ID.to_string(), Value::String(Uuid::new_v4().to_string()));
        fields.insert(CREATED_AT.to_string(), at.clone());
        fields.insert(UPDATED_AT.to_string(), at);
        Self(fields)
    }

    /// Identity key of the record. Numeric ids are accepted and stringified.
    pub fn key(&self) -> Option<String> {
        match self.0.get(ID)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.0.get(UPDATED_AT).and_then(Value::as_str)
    }

    /// Parsed `updatedAt`, if present and valid RFC 3339.
    pub fn updated_at_time(&self) -> Option<DateTime<Utc>> {
        self.updated_at()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(DELETED), Some(Value::Bool(true)))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Merges `patch` into this record and bumps `updatedAt`.
    ///
    /// `id`, `createdAt` and `updatedAt` are owned by the record and any
    /// values for them in `patch` are ignored.
    pub fn apply_patch(&mut self, patch: Map<String, Value>, now: DateTime<Utc>) {
        let at = self.next_update(now);
        for (field, value) in patch {
            if matches!(
                field.as_str(),
                ID | CREATED_AT | UPDATED_AT | DELETED | DELETED_AT
            ) {
                continue;
            }
            self.0.insert(field, value);
        }
        self.0
            .insert(UPDATED_AT.to_string(), Value::String(timestamp(at)));
    }

    /// `now`, or one millisecond past the current `updatedAt` if that is not
    /// earlier, so a local change always wins merges against the prior state.
    fn next_update(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.updated_at_time() {
            Some(prev) if prev >= now => prev + Duration::milliseconds(1),
            _ => now,
        }
    }

    /// Builds the deletion marker that replaces this record.
    pub fn tombstone(&self, now: DateTime<Utc>) -> Record {
        let at = Value::String(timestamp(self.next_update(now)));
        let mut fields = Map::new();
        if let Some(id) = self.0.get(ID) {
            fields.insert(ID.to_string(), id.clone());
        }
        if let Some(created) = self.0.get(CREATED_AT) {
            fields.insert(CREATED_AT.to_string(), created.clone());
        }
        fields.insert(UPDATED_AT.to_string(), at.clone());
        fields.insert(DELETED_AT.to_string(), at);
        fields.insert(DELETED.to_string(), Value::Bool(true));
        Record(fields)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.0)
    }
}

/// Records visible to users, i.e. everything that is not a tombstone.
pub fn live(records: &[Record]) -> Vec<Record> {
    records.iter().filter(|r| !r.is_deleted()).cloned().collect()
}

/// Drops tombstones whose deletion is older than the retention window.
pub fn purge_tombstones(records: Vec<Record>, now: DateTime<Utc>) -> Vec<Record> {
    let cutoff = now - Duration::days(TOMBSTONE_RETENTION_DAYS);
    records
        .into_iter()
        .filter(|r| {
            !r.is_deleted() || r.updated_at_time().map(|t| t >= cutoff).unwrap_or(true)
        })
        .collect()
}

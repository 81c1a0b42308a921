use serde_json::Value;

use crate::error::{Error, Result};

/// One persisted record: `[id, data, ts]` on the wire, one JSON array
/// per NDJSON line. `data == null` is the tombstone.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub data: Value,
    pub ts: u64,
}

impl StoredRecord {
    pub fn is_tombstone(&self) -> bool {
        self.data.is_null()
    }

    /// Expired iff the declared TTL field is present and in the past.
    pub fn is_expired(&self, ttl_field: Option<&str>, now: u64) -> bool {
        let Some(field) = ttl_field else { return false };
        match self.data.get(field).and_then(Value::as_u64) {
            Some(expires_at) => expires_at < now,
            None => false,
        }
    }

    pub fn encode_line(&self) -> Vec<u8> {
        // Tuples serialize as JSON arrays; infallible for these types.
        serde_json::to_vec(&(&self.id, &self.data, self.ts)).unwrap_or_default()
    }
}

/// Encode a mutation batch body: a JSON array of record arrays.
pub fn encode_batch(records: &[StoredRecord]) -> Result<Vec<u8>> {
    let rows: Vec<(&str, &Value, u64)> = records
        .iter()
        .map(|r| (r.id.as_str(), &r.data, r.ts))
        .collect();
    Ok(serde_json::to_vec(&rows)?)
}

/// Parse one record out of an already-decoded JSON value. Accepts the
/// legacy two-element `[id, data]` form (ts 0). Returns `None` for
/// anything malformed; callers log and skip.
pub fn parse_record_value(value: Value) -> Option<StoredRecord> {
    let Value::Array(mut parts) = value else {
        return None;
    };
    if parts.len() != 2 && parts.len() != 3 {
        return None;
    }
    let ts = if parts.len() == 3 {
        parts.pop()?.as_u64()?
    } else {
        0
    };
    let data = parts.pop()?;
    let id = match parts.pop()? {
        Value::String(id) if !id.is_empty() => id,
        _ => return None,
    };
    Some(StoredRecord { id, data, ts })
}

/// Parse one NDJSON snapshot line.
pub fn parse_record_line(line: &[u8]) -> Option<StoredRecord> {
    let value: Value = serde_json::from_slice(line).ok()?;
    parse_record_value(value)
}

/// Parse a mutation blob body. Malformed bodies yield `None`;
/// malformed elements inside an otherwise valid array are dropped.
pub fn parse_batch(body: &[u8]) -> Option<Vec<StoredRecord>> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let Value::Array(rows) = value else {
        return None;
    };
    Some(rows.into_iter().filter_map(parse_record_value).collect())
}

/// A caller-supplied document must be a JSON object whose `"id"` field
/// is a non-empty string; returns that id.
pub fn validate_document(data: &Value) -> Result<String> {
    let Some(obj) = data.as_object() else {
        return Err(Error::InvalidRecord("document must be a JSON object".into()));
    };
    match obj.get("id").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        Some(_) => Err(Error::InvalidRecord("document id must be non-empty".into())),
        None => Err(Error::InvalidRecord(
            "document must carry a string \"id\" field".into(),
        )),
    }
}

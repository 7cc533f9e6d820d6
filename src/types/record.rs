use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ValidationError;

/// One yearly observation. `id` is the position in the sorted dataset and is
/// reassigned on every merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: usize,
    pub year: u32,
    pub spots: u32,
}

/// A record as submitted by the ingestion path, before it has a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewRecord {
    pub year: u32,
    pub spots: u32,
}

impl From<Record> for NewRecord {
    fn from(record: Record) -> Self {
        Self {
            year: record.year,
            spots: record.spots,
        }
    }
}

const ALLOWED_KEYS: [&str; 3] = ["id", "year", "spots"];

impl NewRecord {
    /// Validates an ingestion payload: a JSON list of objects carrying `year`
    /// and `spots` (and optionally an `id`, which is ignored).
    pub fn parse_batch(payload: &Value) -> Result<Vec<NewRecord>, ValidationError> {
        let Some(items) = payload.as_array() else {
            return Err(ValidationError::single(
                "Post data must be a json list of dicts",
            ));
        };
        let mut errors = Vec::new();
        let mut records = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match Self::parse_one(item) {
                Ok(record) => records.push(record),
                Err(message) => errors.push(format!("Entry #{index}: {message}")),
            }
        }
        if errors.is_empty() {
            Ok(records)
        } else {
            Err(ValidationError::new(errors))
        }
    }

    fn parse_one(item: &Value) -> Result<NewRecord, String> {
        let Some(object) = item.as_object() else {
            return Err("entries must be dicts".to_owned());
        };
        if let Some(key) = object.keys().find(|k| !ALLOWED_KEYS.contains(&k.as_str())) {
            return Err(format!(
                "unexpected key '{key}', dicts may only have keys for 'id', 'year', and 'spots'"
            ));
        }
        let year = non_negative_field(object.get("year"), "year")?;
        let spots = non_negative_field(object.get("spots"), "spots")?;
        Ok(NewRecord { year, spots })
    }
}

fn non_negative_field(value: Option<&Value>, name: &str) -> Result<u32, String> {
    let value = value.ok_or_else(|| format!("a value for '{name}' is required"))?;
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("value for '{name}' must be a positive int"))
}

/// Sorts the records by year (stable) and assigns dense ids.
pub fn reindex(mut records: Vec<NewRecord>) -> Vec<Record> {
    records.sort_by_key(|r| r.year);
    records
        .into_iter()
        .enumerate()
        .map(|(id, r)| Record {
            id,
            year: r.year,
            spots: r.spots,
        })
        .collect()
}

//! Line-oriented `year,spots` text form of the dataset.

use std::fmt::Write;

use camino::Utf8Path as Path;

use super::{local_fs, StoreError};
use crate::types::{NewRecord, Record};

pub fn parse(text: &str) -> Result<Vec<NewRecord>, StoreError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            parse_line(line)
                .ok_or_else(|| StoreError::Corrupt(format!("line {}: '{}'", index + 1, line)))
        })
        .collect()
}

fn parse_line(line: &str) -> Option<NewRecord> {
    let (year, spots) = line.split_once(',')?;
    Some(NewRecord {
        year: year.trim().parse().ok()?,
        spots: spots.trim().parse().ok()?,
    })
}

pub fn render(records: &[Record]) -> String {
    let mut result = String::with_capacity(records.len() * 9);
    for record in records {
        // Writing into a String can't fail
        let _ = writeln!(result, "{},{}", record.year, record.spots);
    }
    result
}

pub async fn load(path: &Path) -> Result<Vec<NewRecord>, StoreError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse(&text).map_err(|e| match e {
        StoreError::Corrupt(msg) => StoreError::Corrupt(format!("{path}, {msg}")),
        other => other,
    })
}

/// Atomically rewrites the file. Blocking; meant for the database thread.
pub fn store(path: &Path, records: &[Record]) -> std::io::Result<()> {
    local_fs::write_atomic_blocking(path, render(records).as_bytes())
}

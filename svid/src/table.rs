use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;

use crate::error::SvidError;

/// a single tabular row with dynamic, order-preserving columns. provider
/// records carry provider-specific fields plus user id columns, so rows
/// are maps rather than fixed structs.
pub type Row = IndexMap<String, String>;

/// the union of column names across all rows, in first-seen order.
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut columns = vec![];
    for row in rows {
        for key in row.keys() {
            if seen.insert(key) {
                columns.push(key.clone());
            }
        }
    }
    columns
}

/// reorders the column union so that `preferred` columns (those actually
/// present) come first, followed by the remaining columns in first-seen
/// order.
pub fn preferred_columns(preferred: &[&str], rows: &[Row]) -> Vec<String> {
    let union = columns_of(rows);
    let mut columns: Vec<String> = preferred
        .iter()
        .filter(|c| union.iter().any(|u| u == *c))
        .map(|c| c.to_string())
        .collect();
    for column in union {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    columns
}

pub fn write_rows(path: &Path, rows: &[Row]) -> Result<(), SvidError> {
    let columns = columns_of(rows);
    write_rows_with_columns(path, &columns, rows)
}

/// writes rows under an explicit header; cells missing from a row are
/// written as empty fields.
pub fn write_rows_with_columns(
    path: &Path,
    columns: &[String],
    rows: &[Row],
) -> Result<(), SvidError> {
    if columns.is_empty() {
        // a stage can legitimately reduce to nothing; leave an empty file
        // rather than a zero-field csv record
        std::fs::write(path, "").map_err(|e| SvidError::filesystem(path, e))?;
        return Ok(());
    }
    let mut writer = csv::Writer::from_path(path).map_err(|e| SvidError::csv(path, e))?;
    writer
        .write_record(columns)
        .map_err(|e| SvidError::csv(path, e))?;
    for row in rows {
        let record = columns
            .iter()
            .map(|c| row.get(c).map(|v| v.as_str()).unwrap_or(""));
        writer
            .write_record(record)
            .map_err(|e| SvidError::csv(path, e))?;
    }
    writer
        .flush()
        .map_err(|e| SvidError::filesystem(path, e))?;
    Ok(())
}

pub fn read_rows(path: &Path) -> Result<Vec<Row>, SvidError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| SvidError::csv(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| SvidError::csv(path, e))?
        .clone();
    let mut rows = vec![];
    for record in reader.records() {
        let record = record.map_err(|e| SvidError::csv(path, e))?;
        let row: Row = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

/// drops duplicate rows on the composite key built from `key_columns`,
/// keeping the first occurrence. rows missing a key column contribute an
/// empty field to the key.
pub fn dedup_rows(rows: Vec<Row>, key_columns: &[String]) -> Vec<Row> {
    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut result = vec![];
    for row in rows {
        let key: Vec<String> = key_columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or_default())
            .collect();
        if seen.insert(key) {
            result.push(row);
        }
    }
    result
}

/// removes the named columns from every row.
pub fn drop_columns(rows: &mut [Row], columns: &[&str]) {
    for row in rows.iter_mut() {
        for column in columns {
            row.shift_remove(*column);
        }
    }
}

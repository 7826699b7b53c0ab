//! Reading datasets from JSON files and writing query rows as NDJSON.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bqsync_core::{Dataset, Record};
use serde_json::Value as JsonValue;

/// Parse a JSON array of objects, or newline-delimited objects.
pub fn parse_records(text: &str) -> Result<Vec<JsonValue>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let records: Vec<JsonValue> =
            serde_json::from_str(trimmed).context("Invalid JSON array input")?;
        return Ok(records);
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid JSON on line {}", n + 1))
        })
        .collect()
}

/// Load a dataset from `path`, parsing `timestamp_columns` as RFC 3339.
pub fn load_dataset(path: &Path, timestamp_columns: &[String]) -> Result<Dataset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input {}", path.display()))?;
    let records = parse_records(&text)?;
    if let Some(bad) = records.iter().position(|r| !r.is_object()) {
        bail!("Input record {} is not a JSON object", bad + 1);
    }
    let dataset = Dataset::from_json_records(&records)?;
    Ok(dataset.with_timestamp_columns(timestamp_columns)?)
}

/// Write one JSON object per row.
pub fn write_ndjson<W: Write>(out: &mut W, rows: &[Record]) -> Result<()> {
    for row in rows {
        let object: serde_json::Map<String, JsonValue> = row
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        serde_json::to_writer(&mut *out, &JsonValue::Object(object))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bqsync_core::Value;

    #[test]
    fn parses_array_and_ndjson() {
        let array = parse_records(r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        assert_eq!(array.len(), 2);

        let ndjson = parse_records("{\"id\": 1}\n\n{\"id\": 2}\n").unwrap();
        assert_eq!(ndjson, array);
    }

    #[test]
    fn reports_bad_ndjson_line() {
        let err = parse_records("{\"id\": 1}\n{oops}\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn loads_dataset_with_timestamp_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[{{"id": "x1", "seen": "2024-01-01T00:00:00Z"}}, {{"id": "x2", "seen": null}}]"#
        )
        .unwrap();

        let dataset = load_dataset(file.path(), &["seen".to_string()]).unwrap();
        assert_eq!(dataset.num_rows(), 2);
        let seen = dataset.row(0).unwrap().get("seen").cloned();
        assert!(matches!(seen, Some(Value::Timestamp(_))));
    }

    #[test]
    fn rejects_non_object_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[1, 2]").unwrap();
        assert!(load_dataset(file.path(), &[]).is_err());
    }

    #[test]
    fn writes_rows_as_ndjson() {
        let mut row = Record::new();
        row.insert("id".into(), Value::from("x1"));
        row.insert("score".into(), Value::Int(10));
        let mut out = Vec::new();
        write_ndjson(&mut out, &[row]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\"id\":\"x1\",\"score\":10}\n");
    }
}

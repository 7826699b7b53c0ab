//! BigQuery REST v2 resources and their conversion to engine types.

use bqsync_core::value::canonical_json;
use bqsync_core::{
    ColumnType, ParamValue, QueryParam, Record, SchemaField, StoreError, TableId, TableSchema,
    Value,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl From<&TableId> for TableReference {
    fn from(table: &TableId) -> Self {
        Self {
            project_id: table.project.clone(),
            dataset_id: table.dataset.clone(),
            table_id: table.table.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldResource {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldResource>>,
}

impl FieldResource {
    fn is_repeated(&self) -> bool {
        self.mode.as_deref() == Some("REPEATED")
    }

    fn is_record(&self) -> bool {
        matches!(self.field_type.as_str(), "RECORD" | "STRUCT")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemaResource {
    #[serde(default)]
    pub fields: Vec<FieldResource>,
}

impl From<&TableSchema> for SchemaResource {
    fn from(schema: &TableSchema) -> Self {
        Self {
            fields: schema
                .fields
                .iter()
                .map(|f| FieldResource {
                    name: f.name.clone(),
                    field_type: f.field_type.clone(),
                    mode: None,
                    fields: None,
                })
                .collect(),
        }
    }
}

impl From<SchemaResource> for TableSchema {
    fn from(schema: SchemaResource) -> Self {
        TableSchema::new(
            schema
                .fields
                .into_iter()
                .map(|f| SchemaField {
                    name: f.name,
                    field_type: f.field_type,
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResource {
    pub table_reference: TableReference,
    #[serde(default)]
    pub schema: Option<SchemaResource>,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobReference {
    pub project_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterType {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_type: Option<Box<ParameterType>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_values: Option<Vec<ParameterValue>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameter {
    pub name: String,
    pub parameter_type: ParameterType,
    pub parameter_value: ParameterValue,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryConfiguration {
    pub query: String,
    pub use_legacy_sql: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_mode: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub query_parameters: Vec<QueryParameter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobConfiguration {
    pub query: QueryConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInsert {
    pub job_reference: JobReference,
    pub configuration: JobConfiguration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResource {
    pub job_reference: JobReference,
    #[serde(default)]
    pub status: Option<JobStatusResource>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResource {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error_result: Option<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CellResource {
    #[serde(default)]
    pub v: JsonValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowResource {
    #[serde(default)]
    pub f: Vec<CellResource>,
}

/// `jobs.getQueryResults` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    #[serde(default)]
    pub job_complete: bool,
    #[serde(default)]
    pub schema: Option<SchemaResource>,
    #[serde(default)]
    pub rows: Vec<RowResource>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ErrorProto {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

// ---------------------------------------------------------------------------
// Parameter encoding
// ---------------------------------------------------------------------------

fn scalar_type(column_type: ColumnType) -> ParameterType {
    ParameterType {
        type_name: column_type.sql_type().to_string(),
        array_type: None,
    }
}

fn encode_value(value: &Value) -> ParameterValue {
    let text = match value {
        Value::Null => None,
        Value::Float(f) if f.is_nan() => None,
        Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.6f UTC").to_string()),
        Value::Json(v) => Some(canonical_json(v)),
        other => other.to_text(),
    };
    ParameterValue {
        value: text,
        array_values: None,
    }
}

/// Encode a named parameter in the REST wire form.
pub fn encode_parameter(param: &QueryParam) -> QueryParameter {
    let (parameter_type, parameter_value) = match &param.value {
        ParamValue::Scalar { column_type, value } => (scalar_type(*column_type), encode_value(value)),
        ParamValue::Array {
            element_type,
            values,
        } => (
            ParameterType {
                type_name: "ARRAY".to_string(),
                array_type: Some(Box::new(scalar_type(*element_type))),
            },
            ParameterValue {
                value: None,
                array_values: Some(values.iter().map(encode_value).collect()),
            },
        ),
    };
    QueryParameter {
        name: param.name.clone(),
        parameter_type,
        parameter_value,
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn decode_error(field: &FieldResource, cell: &JsonValue) -> StoreError {
    StoreError::Decode(format!(
        "cannot decode {} value {} for column {}",
        field.field_type, cell, field.name
    ))
}

/// Decode a TIMESTAMP cell: integer microseconds (`useInt64Timestamp`) or
/// floating-point epoch seconds.
fn decode_timestamp(field: &FieldResource, text: &str, cell: &JsonValue) -> Result<Value, StoreError> {
    if let Ok(micros) = text.parse::<i64>() {
        return DateTime::from_timestamp_micros(micros)
            .map(Value::Timestamp)
            .ok_or_else(|| decode_error(field, cell));
    }
    let seconds: f64 = text.parse().map_err(|_| decode_error(field, cell))?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .map(Value::Timestamp)
        .ok_or_else(|| decode_error(field, cell))
}

fn decode_scalar(field: &FieldResource, cell: &JsonValue) -> Result<Value, StoreError> {
    let text = match cell {
        JsonValue::Null => return Ok(Value::Null),
        JsonValue::String(s) => s.as_str(),
        _ => return Err(decode_error(field, cell)),
    };
    match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text
            .parse()
            .map(Value::Int)
            .map_err(|_| decode_error(field, cell)),
        "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => text
            .parse()
            .map(Value::Float)
            .map_err(|_| decode_error(field, cell)),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(decode_error(field, cell)),
        },
        "TIMESTAMP" => decode_timestamp(field, text, cell),
        _ => Ok(Value::Text(text.to_string())),
    }
}

/// Nested cells as plain JSON, keyed by sub-field name.
fn cell_to_json(field: &FieldResource, cell: &JsonValue, repeated: bool) -> Result<JsonValue, StoreError> {
    if repeated {
        let items = match cell {
            JsonValue::Null => return Ok(JsonValue::Array(Vec::new())),
            JsonValue::Array(items) => items,
            _ => return Err(decode_error(field, cell)),
        };
        return items
            .iter()
            .map(|item| cell_to_json(field, item.get("v").unwrap_or(&JsonValue::Null), false))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array);
    }

    if field.is_record() {
        if cell.is_null() {
            return Ok(JsonValue::Null);
        }
        let subfields = field.fields.as_deref().unwrap_or_default();
        let cells = cell
            .get("f")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| decode_error(field, cell))?;
        let mut object = serde_json::Map::new();
        for (sub, sub_cell) in subfields.iter().zip(cells) {
            let v = sub_cell.get("v").unwrap_or(&JsonValue::Null);
            object.insert(sub.name.clone(), cell_to_json(sub, v, sub.is_repeated())?);
        }
        return Ok(JsonValue::Object(object));
    }

    Ok(decode_scalar(field, cell)?.to_json())
}

fn decode_cell(field: &FieldResource, cell: &JsonValue) -> Result<Value, StoreError> {
    if field.is_repeated() || field.is_record() {
        return cell_to_json(field, cell, field.is_repeated()).map(|json| match json {
            JsonValue::Null => Value::Null,
            other => Value::Json(other),
        });
    }
    decode_scalar(field, cell)
}

/// Turn result rows into records keyed by column name.
pub fn decode_rows(schema: &SchemaResource, rows: &[RowResource]) -> Result<Vec<Record>, StoreError> {
    rows.iter()
        .map(|row| {
            schema
                .fields
                .iter()
                .zip(&row.f)
                .map(|(field, cell)| Ok((field.name.clone(), decode_cell(field, &cell.v)?)))
                .collect::<Result<Record, StoreError>>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, ty: &str) -> FieldResource {
        FieldResource {
            name: name.into(),
            field_type: ty.into(),
            mode: None,
            fields: None,
        }
    }

    #[test]
    fn encodes_scalar_and_array_parameters() {
        let scalar = encode_parameter(&QueryParam {
            name: "r0_c1".into(),
            value: ParamValue::Scalar {
                column_type: ColumnType::Integer,
                value: Value::Int(42),
            },
        });
        assert_eq!(
            serde_json::to_value(&scalar).unwrap(),
            json!({
                "name": "r0_c1",
                "parameterType": {"type": "INT64"},
                "parameterValue": {"value": "42"}
            })
        );

        let array = encode_parameter(&QueryParam {
            name: "ref_ids".into(),
            value: ParamValue::Array {
                element_type: ColumnType::String,
                values: vec![Value::from("x1"), Value::from("x2")],
            },
        });
        assert_eq!(
            serde_json::to_value(&array).unwrap(),
            json!({
                "name": "ref_ids",
                "parameterType": {"type": "ARRAY", "arrayType": {"type": "STRING"}},
                "parameterValue": {"arrayValues": [{"value": "x1"}, {"value": "x2"}]}
            })
        );
    }

    #[test]
    fn null_parameters_omit_the_value() {
        let param = encode_parameter(&QueryParam {
            name: "c0".into(),
            value: ParamValue::Scalar {
                column_type: ColumnType::Bool,
                value: Value::Null,
            },
        });
        assert_eq!(
            serde_json::to_value(&param.parameter_value).unwrap(),
            json!({})
        );
    }

    #[test]
    fn timestamps_use_bigquery_literal_format() {
        let ts = DateTime::from_timestamp(1_704_067_200, 500_000_000).unwrap();
        assert_eq!(
            encode_value(&Value::Timestamp(ts)).value.as_deref(),
            Some("2024-01-01 00:00:00.500000 UTC")
        );
    }

    #[test]
    fn decodes_scalar_cells_by_schema() {
        let schema = SchemaResource {
            fields: vec![
                field("id", "STRING"),
                field("score", "INTEGER"),
                field("ratio", "FLOAT"),
                field("active", "BOOLEAN"),
                field("_synced_at", "TIMESTAMP"),
                field("missing", "INTEGER"),
            ],
        };
        let rows: Vec<RowResource> = serde_json::from_value(json!([
            {"f": [
                {"v": "x1"}, {"v": "10"}, {"v": "0.5"}, {"v": "true"},
                {"v": "1704067200000000"}, {"v": null}
            ]}
        ]))
        .unwrap();

        let records = decode_rows(&schema, &rows).unwrap();
        let r = &records[0];
        assert_eq!(r["id"], Value::from("x1"));
        assert_eq!(r["score"], Value::Int(10));
        assert_eq!(r["ratio"], Value::Float(0.5));
        assert_eq!(r["active"], Value::Bool(true));
        assert_eq!(
            r["_synced_at"],
            Value::Timestamp(DateTime::from_timestamp(1_704_067_200, 0).unwrap())
        );
        assert_eq!(r["missing"], Value::Null);
    }

    #[test]
    fn float_second_timestamps_are_accepted() {
        let f = field("at", "TIMESTAMP");
        let v = decode_scalar(&f, &json!("1.7040672E9")).unwrap();
        assert_eq!(v, Value::Timestamp(DateTime::from_timestamp(1_704_067_200, 0).unwrap()));
    }

    #[test]
    fn nested_and_repeated_cells_become_json() {
        let schema = SchemaResource {
            fields: vec![
                FieldResource {
                    name: "tags".into(),
                    field_type: "STRING".into(),
                    mode: Some("REPEATED".into()),
                    fields: None,
                },
                FieldResource {
                    name: "owner".into(),
                    field_type: "RECORD".into(),
                    mode: None,
                    fields: Some(vec![field("name", "STRING"), field("age", "INTEGER")]),
                },
            ],
        };
        let rows: Vec<RowResource> = serde_json::from_value(json!([
            {"f": [
                {"v": [{"v": "a"}, {"v": "b"}]},
                {"v": {"f": [{"v": "Ada"}, {"v": "36"}]}}
            ]}
        ]))
        .unwrap();

        let records = decode_rows(&schema, &rows).unwrap();
        assert_eq!(records[0]["tags"], Value::Json(json!(["a", "b"])));
        assert_eq!(records[0]["owner"], Value::Json(json!({"name": "Ada", "age": 36})));
    }

    #[test]
    fn malformed_cells_are_decode_errors() {
        let schema = SchemaResource {
            fields: vec![field("score", "INTEGER")],
        };
        let rows: Vec<RowResource> =
            serde_json::from_value(json!([{"f": [{"v": "ten"}]}])).unwrap();
        assert!(matches!(decode_rows(&schema, &rows), Err(StoreError::Decode(_))));
    }

    #[test]
    fn schema_resources_convert_both_ways() {
        let schema = TableSchema::new(vec![
            SchemaField::new("id", ColumnType::String),
            SchemaField::new("_synced_at", ColumnType::Timestamp),
        ]);
        let resource = SchemaResource::from(&schema);
        assert_eq!(
            serde_json::to_value(&resource).unwrap(),
            json!({"fields": [
                {"name": "id", "type": "STRING"},
                {"name": "_synced_at", "type": "TIMESTAMP"}
            ]})
        );
        assert_eq!(TableSchema::from(resource), schema);
    }
}

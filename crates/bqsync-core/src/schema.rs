//! Target table identity, schema, and additive schema reconciliation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dataset::Dataset;
use crate::error::{StoreError, SyncError};
use crate::store::RemoteStore;
use crate::types::{ColumnType, ColumnTypes, SYNCED_AT};

/// Three-part table name: project, dataset, table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableId {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// `project.dataset.table`
    pub fn qualified(&self) -> String {
        format!("{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl FromStr for TableId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table]
                if !project.is_empty() && !dataset.is_empty() && !table.is_empty() =>
            {
                Ok(TableId::new(*project, *dataset, *table))
            }
            _ => Err(SyncError::Validation(format!(
                "table id '{}' is not of the form project.dataset.table",
                s
            ))),
        }
    }
}

/// A column of a remote table. `field_type` is kept verbatim so columns of
/// types the engine does not create survive untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: String,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            field_type: column_type.as_str().to_string(),
        }
    }

    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_remote(&self.field_type)
    }
}

/// Ordered, name-unique list of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<SchemaField>,
}

impl TableSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Types to bind dataset values with: the remote type of a column when it
    /// is one of the five kinds, otherwise the inferred one.
    pub fn binding_types(&self, inferred: &ColumnTypes) -> ColumnTypes {
        inferred
            .iter()
            .map(|(name, inferred_type)| {
                let remote = self.field(name).and_then(SchemaField::column_type);
                (name.clone(), remote.unwrap_or(*inferred_type))
            })
            .collect()
    }
}

/// Result of schema reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChange {
    /// The table schema after the change.
    pub schema: TableSchema,
    /// Columns created or appended, in schema order.
    pub added: Vec<SchemaField>,
    pub created: bool,
}

/// Make sure `table` exists and holds every dataset column plus `_synced_at`.
/// Returns the schema as it stands afterwards.
pub async fn ensure_schema<S: RemoteStore + ?Sized>(
    store: &S,
    table: &TableId,
    dataset: &Dataset,
    types: &ColumnTypes,
) -> Result<TableSchema, SyncError> {
    reconcile_schema(store, table, dataset, types)
        .await
        .map(|change| change.schema)
}

/// Like [`ensure_schema`], also reporting what was added.
///
/// Issues exactly one describe call and at most one create or alter call.
/// Existing columns are never removed, renamed or retyped.
pub async fn reconcile_schema<S: RemoteStore + ?Sized>(
    store: &S,
    table: &TableId,
    dataset: &Dataset,
    types: &ColumnTypes,
) -> Result<SchemaChange, SyncError> {
    let field_for = |name: &str| {
        SchemaField::new(
            name,
            types.get(name).copied().unwrap_or(ColumnType::String),
        )
    };
    let rejected = |source: StoreError| SyncError::Schema {
        table: table.to_string(),
        source,
    };

    let existing = store
        .describe_table(table)
        .await
        .map_err(|e| SyncError::remote("describe table", table, e))?;

    match existing {
        None => {
            let mut fields: Vec<SchemaField> = dataset.column_names().map(field_for).collect();
            if !dataset.has_column(SYNCED_AT) {
                fields.push(SchemaField::new(SYNCED_AT, ColumnType::Timestamp));
            }
            let schema = TableSchema::new(fields);
            store
                .create_table(table, &schema)
                .await
                .map_err(rejected)?;
            info!("Created table {}", table);
            Ok(SchemaChange {
                added: schema.fields.clone(),
                schema,
                created: true,
            })
        }
        Some(mut schema) => {
            let existing_names: HashSet<&str> = schema.names().collect();
            let mut new_fields: Vec<SchemaField> = dataset
                .column_names()
                .filter(|name| !existing_names.contains(name))
                .map(field_for)
                .collect();
            if !existing_names.contains(SYNCED_AT) && !dataset.has_column(SYNCED_AT) {
                new_fields.push(SchemaField::new(SYNCED_AT, ColumnType::Timestamp));
            }

            if !new_fields.is_empty() {
                store
                    .alter_table(table, &new_fields)
                    .await
                    .map_err(rejected)?;
                info!(
                    "Updated table schema {} with new columns: {:?}",
                    table,
                    new_fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()
                );
                schema.fields.extend(new_fields.iter().cloned());
            }
            Ok(SchemaChange {
                schema,
                added: new_fields,
                created: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Column;
    use crate::memory::MemoryStore;
    use crate::types::infer_column_types;
    use crate::value::Value;

    fn table() -> TableId {
        TableId::new("proj", "ds", "events")
    }

    fn dataset() -> Dataset {
        Dataset::new(vec![
            Column::new("id", vec![Value::from("x1")]),
            Column::new("score", vec![Value::Int(10)]),
            Column::new("active", vec![Value::Bool(true)]),
        ])
        .unwrap()
    }

    #[test]
    fn table_id_parses_three_parts() {
        let id: TableId = "proj.ds.events".parse().unwrap();
        assert_eq!(id, table());
        assert_eq!(id.to_string(), "proj.ds.events");
        assert!("proj.events".parse::<TableId>().is_err());
        assert!("proj..events".parse::<TableId>().is_err());
    }

    #[tokio::test]
    async fn creates_missing_table_with_synced_at_last() {
        let store = MemoryStore::new();
        let ds = dataset();
        let schema = ensure_schema(&store, &table(), &ds, &infer_column_types(&ds))
            .await
            .unwrap();

        let expected = vec![
            SchemaField::new("id", ColumnType::String),
            SchemaField::new("score", ColumnType::Integer),
            SchemaField::new("active", ColumnType::Bool),
            SchemaField::new(SYNCED_AT, ColumnType::Timestamp),
        ];
        assert_eq!(schema.fields, expected);
        assert_eq!(store.schema(&table()).unwrap().fields, expected);
        let calls = store.calls();
        assert_eq!((calls.describe, calls.create, calls.alter), (1, 1, 0));
    }

    #[tokio::test]
    async fn appends_only_missing_columns() {
        let existing = TableSchema::new(vec![
            SchemaField {
                name: "id".into(),
                field_type: "STRING".into(),
            },
            SchemaField {
                name: "score".into(),
                field_type: "NUMERIC".into(),
            },
        ]);
        let store = MemoryStore::new().with_table(&table(), existing, vec![]);
        let ds = dataset();

        let schema = ensure_schema(&store, &table(), &ds, &infer_column_types(&ds))
            .await
            .unwrap();

        let names: Vec<&str> = schema.names().collect();
        assert_eq!(names, vec!["id", "score", "active", SYNCED_AT]);
        // Existing column keeps its remote type.
        assert_eq!(schema.field("score").unwrap().field_type, "NUMERIC");
        assert_eq!(store.calls().alter, 1);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let store = MemoryStore::new();
        let ds = dataset();
        let types = infer_column_types(&ds);

        ensure_schema(&store, &table(), &ds, &types).await.unwrap();
        let first = store.schema(&table()).unwrap();
        ensure_schema(&store, &table(), &ds, &types).await.unwrap();
        let second = store.schema(&table()).unwrap();

        assert_eq!(first, second);
        let calls = store.calls();
        assert_eq!((calls.describe, calls.create, calls.alter), (2, 1, 0));
    }

    #[tokio::test]
    async fn rejected_alter_surfaces_schema_error() {
        let existing = TableSchema::new(vec![SchemaField::new("id", ColumnType::String)]);
        let store = MemoryStore::new().with_table(&table(), existing, vec![]);
        let ds = dataset();
        let types = infer_column_types(&ds);

        // First call (describe) succeeds, the alter is refused.
        store.fail_call(2, StoreError::PermissionDenied("bigquery.tables.update".into()));
        let err = ensure_schema(&store, &table(), &ds, &types).await.unwrap_err();
        assert!(matches!(err, SyncError::Schema { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn reconcile_reports_added_columns() {
        let existing = TableSchema::new(vec![SchemaField::new("id", ColumnType::String)]);
        let store = MemoryStore::new().with_table(&table(), existing, vec![]);
        let ds = dataset();
        let change = reconcile_schema(&store, &table(), &ds, &infer_column_types(&ds))
            .await
            .unwrap();
        assert!(!change.created);
        let added: Vec<&str> = change.added.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(added, vec!["score", "active", SYNCED_AT]);
    }

    #[test]
    fn binding_types_prefer_known_remote_types() {
        let schema = TableSchema::new(vec![
            SchemaField::new("active", ColumnType::Bool),
            SchemaField {
                name: "day".into(),
                field_type: "DATE".into(),
            },
        ]);
        let mut inferred = ColumnTypes::new();
        inferred.insert("active".into(), ColumnType::String);
        inferred.insert("day".into(), ColumnType::String);
        inferred.insert("fresh".into(), ColumnType::Integer);

        let types = schema.binding_types(&inferred);
        assert_eq!(types["active"], ColumnType::Bool);
        assert_eq!(types["day"], ColumnType::String);
        assert_eq!(types["fresh"], ColumnType::Integer);
    }
}

// ABOUTME: Maps SQL Server column descriptors to a BigQuery table schema
// ABOUTME: Fixed type lookup, nullability pass-through and primary-key clustering hints

use crate::types::ColumnDescriptor;

/// BigQuery limits clustering to four columns.
pub const MAX_CLUSTERING_COLUMNS: usize = 4;

/// Target column types (BigQuery legacy type names, as accepted by `tables.insert`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    String,
    Integer,
    Numeric,
    Float,
    Date,
    Time,
    DateTime,
    Timestamp,
    Boolean,
    Bytes,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::String => "STRING",
            TargetType::Integer => "INTEGER",
            TargetType::Numeric => "NUMERIC",
            TargetType::Float => "FLOAT",
            TargetType::Date => "DATE",
            TargetType::Time => "TIME",
            TargetType::DateTime => "DATETIME",
            TargetType::Timestamp => "TIMESTAMP",
            TargetType::Boolean => "BOOLEAN",
            TargetType::Bytes => "BYTES",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Nullable,
    Required,
}

impl FieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldMode::Nullable => "NULLABLE",
            FieldMode::Required => "REQUIRED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetField {
    pub name: String,
    pub field_type: TargetType,
    pub mode: FieldMode,
}

/// Schema for a target table plus the clustering hints derived from the key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetSchema {
    pub fields: Vec<TargetField>,
    pub clustering: Vec<String>,
    /// Columns whose source type had no mapping and fell back to STRING
    pub warnings: Vec<String>,
}

/// Look up the target type for a source type name.
///
/// Returns `None` for types outside the lookup table.
pub fn map_type(source_type: &str) -> Option<TargetType> {
    let normalized = source_type.trim().to_ascii_lowercase();
    // Strip any length/precision suffix such as "nvarchar(50)"
    let base = normalized
        .split('(')
        .next()
        .unwrap_or_default()
        .trim();

    let mapped = match base {
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "sysname" | "xml" => {
            TargetType::String
        }
        "tinyint" | "smallint" | "int" | "bigint" => TargetType::Integer,
        "decimal" | "numeric" | "money" | "smallmoney" => TargetType::Numeric,
        "float" | "real" => TargetType::Float,
        "date" => TargetType::Date,
        "time" => TargetType::Time,
        "datetime" | "datetime2" | "smalldatetime" => TargetType::DateTime,
        "datetimeoffset" => TargetType::Timestamp,
        "bit" => TargetType::Boolean,
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => TargetType::Bytes,
        "uniqueidentifier" => TargetType::String,
        _ => return None,
    };
    Some(mapped)
}

/// Translate a column list into a target schema.
///
/// Unrecognised types become STRING and are listed in `warnings`; the caller
/// decides how to surface them. Clustering takes the first four key columns
/// in key order.
pub fn map_schema(columns: &[ColumnDescriptor], primary_key: &[String]) -> TargetSchema {
    let mut schema = TargetSchema::default();

    for column in columns {
        let field_type = match map_type(&column.data_type) {
            Some(t) => t,
            None => {
                schema.warnings.push(format!(
                    "column '{}' has unmapped type '{}', using STRING",
                    column.name, column.data_type
                ));
                TargetType::String
            }
        };
        schema.fields.push(TargetField {
            name: column.name.clone(),
            field_type,
            mode: if column.nullable {
                FieldMode::Nullable
            } else {
                FieldMode::Required
            },
        });
    }

    schema.clustering = primary_key
        .iter()
        .take(MAX_CLUSTERING_COLUMNS)
        .cloned()
        .collect();

    schema
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_families() {
        assert_eq!(map_type("nvarchar"), Some(TargetType::String));
        assert_eq!(map_type("NVARCHAR(50)"), Some(TargetType::String));
        assert_eq!(map_type("bigint"), Some(TargetType::Integer));
        assert_eq!(map_type("money"), Some(TargetType::Numeric));
        assert_eq!(map_type("decimal(18,2)"), Some(TargetType::Numeric));
        assert_eq!(map_type("real"), Some(TargetType::Float));
        assert_eq!(map_type("date"), Some(TargetType::Date));
        assert_eq!(map_type("time"), Some(TargetType::Time));
        assert_eq!(map_type("datetime2"), Some(TargetType::DateTime));
        assert_eq!(map_type("smalldatetime"), Some(TargetType::DateTime));
        assert_eq!(map_type("datetimeoffset"), Some(TargetType::Timestamp));
        assert_eq!(map_type("bit"), Some(TargetType::Boolean));
        assert_eq!(map_type("varbinary"), Some(TargetType::Bytes));
        assert_eq!(map_type("rowversion"), Some(TargetType::Bytes));
        assert_eq!(map_type("uniqueidentifier"), Some(TargetType::String));
        assert_eq!(map_type("geography"), None);
    }

    #[test]
    fn test_unknown_type_falls_back_with_warning() {
        let columns = vec![
            ColumnDescriptor::new("id", "int", false),
            ColumnDescriptor::new("shape", "geometry", true),
        ];
        let schema = map_schema(&columns, &["id".to_string()]);

        assert_eq!(schema.fields[1].field_type, TargetType::String);
        assert_eq!(schema.warnings.len(), 1);
        assert!(schema.warnings[0].contains("shape"));
    }

    #[test]
    fn test_nullability_passes_through() {
        let columns = vec![
            ColumnDescriptor::new("id", "int", false),
            ColumnDescriptor::new("note", "nvarchar", true),
        ];
        let schema = map_schema(&columns, &[]);

        assert_eq!(schema.fields[0].mode, FieldMode::Required);
        assert_eq!(schema.fields[1].mode, FieldMode::Nullable);
        assert!(schema.clustering.is_empty());
    }

    #[test]
    fn test_clustering_takes_first_four_key_columns_in_order() {
        let names = ["e", "d", "c", "b", "a"];
        let columns: Vec<_> = names
            .iter()
            .map(|n| ColumnDescriptor::new(*n, "int", false))
            .collect();
        let key: Vec<String> = names.iter().map(|n| n.to_string()).collect();

        let schema = map_schema(&columns, &key);
        assert_eq!(schema.clustering, vec!["e", "d", "c", "b"]);
    }
}

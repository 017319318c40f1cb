// ABOUTME: T-SQL text for catalog introspection, change-tracking reads and paged scans
// ABOUTME: Pure builders; values are always bound as @P parameters, identifiers are bracket-quoted

use crate::sync::schema::map_type;
use crate::types::{ColumnDescriptor, TableDescriptor};
use crate::utils::quote_tsql_ident;

/// Result column carrying the change operation code.
pub const OPERATION_COLUMN: &str = "__ct_operation";
/// Result column carrying the change version.
pub const VERSION_COLUMN: &str = "__ct_version";
/// Prefix of the result columns carrying key values from the change table.
pub const KEY_COLUMN_PREFIX: &str = "__ct_key_";

pub const CHANGE_TRACKING_ENABLED: &str = "\
SELECT CAST(CASE WHEN ctt.object_id IS NULL THEN 0 ELSE 1 END AS BIT) AS enabled \
FROM sys.tables t \
LEFT JOIN sys.change_tracking_tables ctt ON ctt.object_id = t.object_id \
WHERE t.name = @P1";

// Alias types report their base type; CLR types (geography, hierarchyid, ...)
// have no base row and keep their own name
pub const TABLE_COLUMNS: &str = "\
SELECT c.name AS column_name, COALESCE(base.name, ty.name) AS data_type, c.is_nullable \
FROM sys.columns c \
INNER JOIN sys.types ty ON ty.user_type_id = c.user_type_id \
LEFT JOIN sys.types base ON ty.is_user_defined = 1 AND ty.is_assembly_type = 0 \
    AND base.user_type_id = ty.system_type_id \
INNER JOIN sys.tables t ON t.object_id = c.object_id \
WHERE t.name = @P1 \
ORDER BY c.column_id";

pub const PRIMARY_KEY_COLUMNS: &str = "\
SELECT c.name AS column_name \
FROM sys.indexes i \
INNER JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
INNER JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
INNER JOIN sys.tables t ON t.object_id = i.object_id \
WHERE i.is_primary_key = 1 AND t.name = @P1 \
ORDER BY ic.key_ordinal";

pub const CURRENT_VERSION: &str = "SELECT CHANGE_TRACKING_CURRENT_VERSION() AS version";

pub const MIN_VALID_VERSION: &str = "\
SELECT CHANGE_TRACKING_MIN_VALID_VERSION(t.object_id) AS version \
FROM sys.tables t \
WHERE t.name = @P1";

/// Change feed for `(@P1, @P2]`, joined to the current row content.
///
/// Key values come from the change table so deleted rows still report them;
/// the base-table columns are NULL for rows that no longer exist.
pub fn changes_query(table: &TableDescriptor) -> String {
    let table_ident = quote_tsql_ident(&table.name);
    let primary_key = &table.primary_key;

    let mut select = vec![
        format!("CT.SYS_CHANGE_OPERATION AS {}", quote_tsql_ident(OPERATION_COLUMN)),
        format!("CT.SYS_CHANGE_VERSION AS {}", quote_tsql_ident(VERSION_COLUMN)),
    ];
    for (i, key) in primary_key.iter().enumerate() {
        let alias = format!("{}{}", KEY_COLUMN_PREFIX, i);
        let expr = format!("CT.{}", quote_tsql_ident(key));
        select.push(match table.column(key) {
            Some(column) if reads_as_string(column) => {
                format!("CAST({} AS nvarchar(max)) AS {}", expr, quote_tsql_ident(&alias))
            }
            _ => format!("{} AS {}", expr, quote_tsql_ident(&alias)),
        });
    }
    for column in &table.columns {
        select.push(select_expr("src.", column));
    }

    let join = primary_key
        .iter()
        .map(|key| {
            let key = quote_tsql_ident(key);
            format!("src.{} = CT.{}", key, key)
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "SELECT {} FROM CHANGETABLE(CHANGES {}, @P1) AS CT \
         LEFT JOIN {} AS src ON {} \
         WHERE CT.SYS_CHANGE_VERSION <= @P2 \
         ORDER BY CT.SYS_CHANGE_VERSION",
        select.join(", "),
        table_ident,
        table_ident,
        join
    )
}

/// Next page in key order. With `has_cursor`, the cursor values are bound
/// as `@P1..@Pn` in key-column order.
///
/// Composite keys compare lexicographically:
/// `(k1 > @P1) OR (k1 = @P1 AND k2 > @P2) OR ...`.
pub fn keyed_page_query(
    table: &str,
    columns: &[ColumnDescriptor],
    key_columns: &[String],
    has_cursor: bool,
    limit: usize,
) -> String {
    let mut query = format!(
        "SELECT TOP ({}) {} FROM {}",
        limit,
        column_list(columns),
        quote_tsql_ident(table)
    );

    if has_cursor {
        query.push_str(" WHERE ");
        query.push_str(&keyset_predicate(key_columns));
    }

    // A key read through its string form is ordered by the base column, not
    // the string alias, so the cursor comparison and the ordering agree
    let table_ident = quote_tsql_ident(table);
    query.push_str(" ORDER BY ");
    query.push_str(
        &key_columns
            .iter()
            .map(|k| {
                let cast = columns.iter().any(|c| &c.name == k && reads_as_string(c));
                if cast {
                    format!("{}.{} ASC", table_ident, quote_tsql_ident(k))
                } else {
                    format!("{} ASC", quote_tsql_ident(k))
                }
            })
            .collect::<Vec<_>>()
            .join(", "),
    );
    query
}

fn keyset_predicate(key_columns: &[String]) -> String {
    let mut branches = Vec::with_capacity(key_columns.len());
    for (i, key) in key_columns.iter().enumerate() {
        let mut terms: Vec<String> = key_columns[..i]
            .iter()
            .enumerate()
            .map(|(j, prefix)| format!("{} = @P{}", quote_tsql_ident(prefix), j + 1))
            .collect();
        terms.push(format!("{} > @P{}", quote_tsql_ident(key), i + 1));
        branches.push(format!("({})", terms.join(" AND ")));
    }
    branches.join(" OR ")
}

/// Page at `offset` under an explicit ordering. Without orderable columns
/// the order is `(SELECT NULL)`, which SQL Server does not keep stable.
pub fn offset_page_query(
    table: &str,
    columns: &[ColumnDescriptor],
    order_by: &[String],
    offset: u64,
    limit: usize,
) -> String {
    let order = if order_by.is_empty() {
        "(SELECT NULL)".to_string()
    } else {
        order_by
            .iter()
            .map(|c| quote_tsql_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        "SELECT {} FROM {} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
        column_list(columns),
        quote_tsql_ident(table),
        order,
        offset,
        limit
    )
}

pub fn count_query(table: &str) -> String {
    format!("SELECT COUNT_BIG(*) AS row_count FROM {}", quote_tsql_ident(table))
}

/// Types the driver cannot decode natively and reads through their string
/// form instead. These are exactly the types the schema maps to STRING by
/// default (CLR types such as geography, geometry and hierarchyid, or
/// sql_variant).
fn reads_as_string(column: &ColumnDescriptor) -> bool {
    map_type(&column.data_type).is_none()
}

fn select_expr(qualifier: &str, column: &ColumnDescriptor) -> String {
    let ident = quote_tsql_ident(&column.name);
    if reads_as_string(column) {
        format!("CAST({}{} AS nvarchar(max)) AS {}", qualifier, ident, ident)
    } else {
        format!("{}{}", qualifier, ident)
    }
}

fn column_list(columns: &[ColumnDescriptor]) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    columns
        .iter()
        .map(|c| select_expr("", c))
        .collect::<Vec<_>>()
        .join(", ")
}

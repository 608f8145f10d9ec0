//! SQL schema for the Tenure SQLite store.
//!
//! The catalog tables are created once at connection startup. Dimension
//! tables are created when their entity is registered; their DDL is derived
//! from the entity's column metadata.

use tenure_core::{
  entity::{ColumnMeta, Dimension},
  value::ColumnType,
  version::{IS_CURRENT, LOAD_DATE, ROW_HASH, VALID_FROM, VALID_TO},
};

/// Canonical JSON of the business key; the lookup column for current rows.
pub const BUSINESS_KEY: &str = "_business_key";

/// Catalog DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS entity_metadata (
    entity_name  TEXT PRIMARY KEY,
    entity_type  TEXT NOT NULL,   -- 'fact' | 'dimension' | 'type2_dimension'
    description  TEXT,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity_column_metadata (
    entity_name     TEXT NOT NULL REFERENCES entity_metadata(entity_name),
    column_name     TEXT NOT NULL,
    ordinal         INTEGER NOT NULL,
    data_type       TEXT NOT NULL,
    is_nullable     INTEGER NOT NULL,
    is_business_key INTEGER NOT NULL,
    track_history   INTEGER NOT NULL,
    description     TEXT,
    PRIMARY KEY (entity_name, column_name)
);

-- Highest surrogate key ever issued per dimension. Only moves forward.
CREATE TABLE IF NOT EXISTS surrogate_sequences (
    entity_name TEXT PRIMARY KEY REFERENCES entity_metadata(entity_name),
    last_value  INTEGER NOT NULL
);

PRAGMA user_version = 1;
";

/// Names used by the catalog; no entity may take them.
pub const CATALOG_TABLES: [&str; 3] =
  ["entity_metadata", "entity_column_metadata", "surrogate_sequences"];

/// Quote a validated identifier.
pub fn quote(ident: &str) -> String { format!("\"{ident}\"") }

fn sql_type(data_type: ColumnType) -> &'static str {
  match data_type {
    ColumnType::Integer | ColumnType::Boolean => "INTEGER",
    ColumnType::Double => "REAL",
    ColumnType::Varchar | ColumnType::Date | ColumnType::Timestamp => "TEXT",
  }
}

fn column_def(column: &ColumnMeta) -> String {
  let not_null = if column.nullable { "" } else { " NOT NULL" };
  format!("    {} {}{not_null}", quote(&column.name), sql_type(column.data_type))
}

/// The table and index names created for a dimension, in DDL order.
pub fn dimension_objects(name: &str) -> [String; 3] {
  [name.to_owned(), format!("{name}__current"), format!("{name}__history")]
}

/// DDL for a dimension table and its indexes.
///
/// The partial unique index holds at most one current row per business key,
/// so a racing writer that slipped past the entity lock fails its commit.
pub fn dimension_ddl(dimension: &Dimension) -> String {
  let [table, current_idx, history_idx] = dimension_objects(dimension.name()).map(|n| quote(&n));

  let mut columns = vec![format!(
    "    {} INTEGER PRIMARY KEY",
    quote(&dimension.surrogate_key_column())
  )];
  columns.extend(dimension.columns().map(column_def));
  columns.extend([
    format!("    {} TEXT NOT NULL", quote(BUSINESS_KEY)),
    format!("    {} TEXT NOT NULL", quote(VALID_FROM)),
    format!("    {} TEXT", quote(VALID_TO)),
    format!("    {} INTEGER NOT NULL CHECK ({} IN (0, 1))", quote(IS_CURRENT), quote(IS_CURRENT)),
    format!("    {} TEXT NOT NULL", quote(ROW_HASH)),
    format!("    {} TEXT NOT NULL", quote(LOAD_DATE)),
  ]);

  format!(
    "CREATE TABLE IF NOT EXISTS {table} (\n{columns}\n);\n\
     CREATE UNIQUE INDEX IF NOT EXISTS {current_idx} ON {table} ({bk}) WHERE {is_current} = 1;\n\
     CREATE INDEX IF NOT EXISTS {history_idx} ON {table} ({bk}, {valid_from});\n",
    columns = columns.join(",\n"),
    bk = quote(BUSINESS_KEY),
    is_current = quote(IS_CURRENT),
    valid_from = quote(VALID_FROM),
  )
}

/// Every column of a dimension table except `_business_key`, in the order
/// rows are decoded.
pub fn select_list(dimension: &Dimension) -> String {
  let mut columns = vec![quote(&dimension.surrogate_key_column())];
  columns.extend(dimension.columns().map(|c| quote(&c.name)));
  columns.extend([VALID_FROM, VALID_TO, IS_CURRENT, ROW_HASH, LOAD_DATE].map(quote));
  columns.join(", ")
}

/// Columns written by an insert, in parameter order.
pub fn insert_sql(dimension: &Dimension) -> String {
  let mut columns = vec![quote(&dimension.surrogate_key_column())];
  columns.extend(dimension.columns().map(|c| quote(&c.name)));
  columns.extend([BUSINESS_KEY, VALID_FROM, VALID_TO, IS_CURRENT, ROW_HASH, LOAD_DATE].map(quote));
  let params: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
  format!(
    "INSERT INTO {} ({}) VALUES ({})",
    quote(dimension.name()),
    columns.join(", "),
    params.join(", ")
  )
}

//! The driver seam: the one interface a concrete SQL engine implements.
//!
//! A driver executes a single statement with bound parameters and must
//! deliver exactly one completion per statement. Everything above this
//! seam (batching, schema migration, query translation) is engine-agnostic.

/// A single bound SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(n: i64) -> Self {
        SqlValue::Integer(n)
    }
}

/// One result row, positional per the statement's SELECT list.
pub type Row = Vec<SqlValue>;

/// What a driver delivers for one statement: rows, or the engine's error
/// text verbatim.
pub type DriverOutcome = Result<Vec<Row>, String>;

/// A SQL-capable backing engine.
///
/// Contract: `execute` invokes `completion` exactly once per call. A second
/// invocation for the same statement is an engine contract violation; the
/// executor surfaces it as a diagnostic rather than silently ignoring it.
pub trait SqlDriver {
    fn execute(&self, sql: &str, params: &[SqlValue], completion: &mut dyn FnMut(DriverOutcome));

    /// Engine ceiling on bound parameters per statement.
    fn max_variables(&self) -> usize;

    /// Engine ceiling on statement text length in bytes.
    fn max_sql_length_bytes(&self) -> usize;

    /// Whether the engine has a native full-text search module. Controls
    /// whether full-text indexes are side-table-backed or degrade to a
    /// pattern-matched term-bag column.
    fn supports_full_text(&self) -> bool;
}

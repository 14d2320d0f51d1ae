use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a statement was created, which decides how it is re-created after a reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Server-side prepared statement, executed later with parameters
    Prepared,
    /// One-shot query whose result set is available right away
    Query,
}

/// Error reporting policy of a connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorMode {
    /// Record the error and report `NotConnected`
    Silent,
    /// Like `Silent`, and also emit a warning through `tracing`
    Warning,
    /// Hand the underlying error to the caller unchanged
    #[default]
    Exception,
}

impl FromStr for ErrorMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(ErrorMode::Silent),
            "warning" => Ok(ErrorMode::Warning),
            "exception" => Ok(ErrorMode::Exception),
            other => Err(Error::BadConfigError(format!(
                "Invalid error_mode '{}', expected silent, warning or exception",
                other
            ))),
        }
    }
}

/// Statement attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    /// Cursor type (forward-only or scrollable)
    Cursor,
    CursorName,
    /// Prefix column names with the catalog name
    FetchCatalogNames,
    /// Prefix column names with the table name
    FetchTableNames,
    /// Convert numeric values to strings when fetching
    StringifyFetches,
    EmulatePrepares,
    /// Query timeout in seconds
    Timeout,
    /// Driver-specific attribute identified by its numeric id
    Driver(i64),
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Cursor => f.write_str("cursor"),
            Attribute::CursorName => f.write_str("cursor_name"),
            Attribute::FetchCatalogNames => f.write_str("fetch_catalog_names"),
            Attribute::FetchTableNames => f.write_str("fetch_table_names"),
            Attribute::StringifyFetches => f.write_str("stringify_fetches"),
            Attribute::EmulatePrepares => f.write_str("emulate_prepares"),
            Attribute::Timeout => f.write_str("timeout"),
            Attribute::Driver(id) => write!(f, "driver({})", id),
        }
    }
}

/// Shape of the rows returned by the fetch family of operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchMode {
    /// Values addressed by column name
    Assoc,
    /// Values addressed by column index
    Num,
    /// Both name and index
    #[default]
    Both,
    /// Write values into the variables registered with `bind_column`
    Bound,
    /// A single column of each row
    Column(usize),
    /// First column as key, second column as value
    KeyPair,
}

/// Declared type of a bound parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParamType {
    Null,
    Int,
    #[default]
    Str,
    /// Large object, sent as raw bytes
    Lob,
    Bool,
}

bitflags::bitflags! {
    /// Column flags reported in column metadata
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        const NOT_NULL = 0x0001;
        const PRIMARY_KEY = 0x0002;
        const UNIQUE_KEY = 0x0004;
        const MULTIPLE_KEY = 0x0008;
        const BLOB = 0x0010;
        const UNSIGNED = 0x0020;
        const BINARY = 0x0080;
        const AUTO_INCREMENT = 0x0200;
    }
}

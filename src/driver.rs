//! The boundary with a native database driver

use auto_impl::auto_impl;

use crate::captured::{BindColumnArgs, BindParamArgs, BindValueArgs, ColumnKey, ParamKey};
use crate::constant::{Attribute, ColumnFlags, FetchMode, StatementKind};
use crate::error::Result;
use crate::opts::Opts;
use crate::value::Value;

/// Everything needed to create a statement again on a new connection
#[derive(Debug, Clone, PartialEq)]
pub struct CreationArgs {
    pub sql: String,
    /// Driver options passed to `prepare`
    pub options: Vec<(Attribute, Value)>,
    /// Fetch mode passed to `query`
    pub fetch_mode: Option<FetchMode>,
}

impl CreationArgs {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            options: Vec::new(),
            fetch_mode: None,
        }
    }

    pub fn with_option(mut self, attr: Attribute, value: impl Into<Value>) -> Self {
        self.options.push((attr, value.into()));
        self
    }

    pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
        self.fetch_mode = Some(mode);
        self
    }
}

/// Extended error information of the last operation on a statement
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorInfo {
    /// `"00000"` when the last operation succeeded
    pub sqlstate: String,
    pub code: Option<i64>,
    pub message: Option<String>,
}

impl ErrorInfo {
    pub fn ok() -> Self {
        Self {
            sqlstate: "00000".to_string(),
            code: None,
            message: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.sqlstate == "00000"
    }
}

impl From<&crate::error::Error> for ErrorInfo {
    fn from(err: &crate::error::Error) -> Self {
        use crate::error::Error;
        match err {
            Error::Driver(e) => Self {
                sqlstate: e.sqlstate.clone(),
                code: e.code,
                message: Some(e.message.clone()),
            },
            // SQLSTATE class 08: connection exception
            other if other.is_connection_lost() => Self {
                sqlstate: "08006".to_string(),
                code: None,
                message: Some(other.to_string()),
            },
            other => Self {
                sqlstate: "HY000".to_string(),
                code: None,
                message: Some(other.to_string()),
            },
        }
    }
}

/// Column metadata of a result set
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnMeta {
    pub name: String,
    pub table: Option<String>,
    pub native_type: String,
    pub len: Option<usize>,
    pub precision: u32,
    pub flags: ColumnFlags,
}

/// A fetched row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Value at a 0-based index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.iter().position(|c| c == name)?;
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A driver-level statement handle
///
/// Configuration calls answer `Ok(false)` when the driver declines them
/// without raising, and `Err` when it raises.
#[auto_impl(&mut, Box)]
pub trait RawStatement {
    /// `params` replaces every bound parameter for this execution only
    fn execute(&mut self, params: Option<&[Value]>) -> Result<bool>;

    fn set_attribute(&mut self, attr: Attribute, value: &Value) -> Result<bool>;
    fn get_attribute(&self, attr: Attribute) -> Result<Option<Value>>;

    fn bind_column(&mut self, column: &ColumnKey, args: &BindColumnArgs) -> Result<bool>;
    fn bind_param(&mut self, param: &ParamKey, args: &BindParamArgs) -> Result<bool>;
    fn bind_value(&mut self, param: &ParamKey, args: &BindValueArgs) -> Result<bool>;
    fn set_fetch_mode(&mut self, mode: FetchMode) -> Result<bool>;

    fn error_code(&self) -> Option<String>;
    fn error_info(&self) -> ErrorInfo;
    fn row_count(&self) -> u64;
    fn column_count(&self) -> usize;
    /// Metadata of a 0-based column, `None` past the last column
    fn column_meta(&self, column: usize) -> Result<Option<ColumnMeta>>;

    fn next_rowset(&mut self) -> Result<bool>;
    fn close_cursor(&mut self) -> Result<bool>;
    fn fetch(&mut self, mode: Option<FetchMode>) -> Result<Option<Row>>;
    fn fetch_all(&mut self, mode: Option<FetchMode>) -> Result<Vec<Row>>;
    /// A 0-based column of the next row
    fn fetch_column(&mut self, column: usize) -> Result<Option<Value>>;
    /// The next row with every column addressable by name
    fn fetch_object(&mut self) -> Result<Option<Row>>;
    fn debug_dump_params(&self) -> String;
}

/// A physical connection
pub trait Connection {
    type Statement: RawStatement;

    fn prepare(&mut self, args: &CreationArgs) -> Result<Self::Statement>;
    fn query(&mut self, args: &CreationArgs) -> Result<Self::Statement>;
    /// Run a statement without a result set, returning the affected rows
    fn exec(&mut self, sql: &str) -> Result<u64>;
    fn ping(&mut self) -> Result<()>;

    /// Create a statement the way `kind` says
    fn create(&mut self, kind: StatementKind, args: &CreationArgs) -> Result<Self::Statement> {
        match kind {
            StatementKind::Prepared => self.prepare(args),
            StatementKind::Query => self.query(args),
        }
    }
}

/// Opens physical connections
#[auto_impl(&, Box, Rc)]
pub trait Driver {
    type Connection: Connection;

    fn connect(&self, opts: &Opts) -> Result<Self::Connection>;
}

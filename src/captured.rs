//! Replay log of the configuration calls a driver has accepted on a statement

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use crate::constant::{Attribute, FetchMode, ParamType};
use crate::driver::RawStatement;
use crate::error::Result;
use crate::value::{BoundVar, Value};

/// A result column addressed by 1-based index or by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnKey {
    Index(usize),
    Name(String),
}

impl From<usize> for ColumnKey {
    fn from(index: usize) -> Self {
        ColumnKey::Index(index)
    }
}

impl From<&str> for ColumnKey {
    fn from(name: &str) -> Self {
        ColumnKey::Name(name.to_string())
    }
}

impl From<String> for ColumnKey {
    fn from(name: String) -> Self {
        ColumnKey::Name(name)
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKey::Index(i) => write!(f, "{}", i),
            ColumnKey::Name(name) => f.write_str(name),
        }
    }
}

/// A placeholder addressed by 1-based position (`?`) or by name (`:name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamKey {
    Position(usize),
    Name(String),
}

impl From<usize> for ParamKey {
    fn from(position: usize) -> Self {
        ParamKey::Position(position)
    }
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> Self {
        ParamKey::Name(name.to_string())
    }
}

impl From<String> for ParamKey {
    fn from(name: String) -> Self {
        ParamKey::Name(name)
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Position(p) => write!(f, "{}", p),
            ParamKey::Name(name) => write!(f, ":{}", name.trim_start_matches(':')),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindColumnArgs {
    /// Receives the column value on every fetch in `FetchMode::Bound`
    pub target: BoundVar,
    pub param_type: Option<ParamType>,
    pub max_len: Option<usize>,
}

impl BindColumnArgs {
    pub fn new(target: &BoundVar) -> Self {
        Self {
            target: target.clone(),
            param_type: None,
            max_len: None,
        }
    }

    pub fn with_type(mut self, param_type: ParamType) -> Self {
        self.param_type = Some(param_type);
        self
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindParamArgs {
    /// Read at execute time, written back for in/out parameters
    pub var: BoundVar,
    pub param_type: ParamType,
    pub max_len: Option<usize>,
    pub inout: bool,
}

impl BindParamArgs {
    pub fn new(var: &BoundVar, param_type: ParamType) -> Self {
        Self {
            var: var.clone(),
            param_type,
            max_len: None,
            inout: false,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }

    pub fn inout(mut self) -> Self {
        self.inout = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindValueArgs {
    /// Snapshot taken at bind time
    pub value: Value,
    pub param_type: ParamType,
}

impl BindValueArgs {
    pub fn new(value: impl Into<Value>, param_type: ParamType) -> Self {
        Self {
            value: value.into(),
            param_type,
        }
    }
}

/// One capturable configuration call with its arguments
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedCall {
    SetAttribute(Attribute, Value),
    BindColumn(ColumnKey, BindColumnArgs),
    BindParam(ParamKey, BindParamArgs),
    BindValue(ParamKey, BindValueArgs),
    SetFetchMode(FetchMode),
}

impl CapturedCall {
    /// Issue this call against a driver statement
    pub fn apply<S: RawStatement + ?Sized>(&self, stmt: &mut S) -> Result<bool> {
        match self {
            CapturedCall::SetAttribute(attr, value) => stmt.set_attribute(*attr, value),
            CapturedCall::BindColumn(column, args) => stmt.bind_column(column, args),
            CapturedCall::BindParam(param, args) => stmt.bind_param(param, args),
            CapturedCall::BindValue(param, args) => stmt.bind_value(param, args),
            CapturedCall::SetFetchMode(mode) => stmt.set_fetch_mode(*mode),
        }
    }
}

/// Every accepted configuration call, last write wins per key
///
/// A parameter key is bound either by reference or by value, never both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapturedState {
    attributes: IndexMap<Attribute, Value>,
    columns: IndexMap<ColumnKey, BindColumnArgs>,
    deferred: IndexSet<ColumnKey>,
    params: IndexMap<ParamKey, BindParamArgs>,
    values: IndexMap<ParamKey, BindValueArgs>,
    fetch_mode: Option<FetchMode>,
}

impl CapturedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nothing to replay
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
            && self.columns.is_empty()
            && self.params.is_empty()
            && self.values.is_empty()
            && self.fetch_mode.is_none()
    }

    pub fn record(&mut self, call: CapturedCall) {
        match call {
            CapturedCall::SetAttribute(attr, value) => {
                self.attributes.insert(attr, value);
            }
            CapturedCall::BindColumn(column, args) => {
                self.columns.insert(column, args);
            }
            CapturedCall::BindParam(param, args) => {
                self.values.shift_remove(&param);
                self.params.insert(param, args);
            }
            CapturedCall::BindValue(param, args) => {
                self.params.shift_remove(&param);
                self.values.insert(param, args);
            }
            CapturedCall::SetFetchMode(mode) => {
                self.fetch_mode = Some(mode);
            }
        }
    }

    pub fn attributes(&self) -> &IndexMap<Attribute, Value> {
        &self.attributes
    }

    pub fn column_bindings(&self) -> &IndexMap<ColumnKey, BindColumnArgs> {
        &self.columns
    }

    pub fn param_bindings(&self) -> &IndexMap<ParamKey, BindParamArgs> {
        &self.params
    }

    pub fn value_bindings(&self) -> &IndexMap<ParamKey, BindValueArgs> {
        &self.values
    }

    pub fn fetch_mode(&self) -> Option<FetchMode> {
        self.fetch_mode
    }

    pub fn deferred_columns(&self) -> &IndexSet<ColumnKey> {
        &self.deferred
    }

    /// Remember a column whose binding has to wait for the next execute
    ///
    /// Keys without a recorded binding are ignored.
    pub fn defer_column(&mut self, column: ColumnKey) {
        if self.columns.contains_key(&column) {
            self.deferred.insert(column);
        }
    }

    pub fn clear_deferred(&mut self) {
        self.deferred.clear();
    }

    /// Empty the deferred set, returning the bindings to retry
    pub fn take_deferred(&mut self) -> Vec<(ColumnKey, BindColumnArgs)> {
        let deferred = std::mem::take(&mut self.deferred);
        deferred
            .into_iter()
            .filter_map(|column| {
                let args = self.columns.get(&column)?.clone();
                Some((column, args))
            })
            .collect()
    }

    /// The calls that rebuild this state on a fresh statement, in replay order:
    /// attributes, column bindings, parameter bindings, value bindings, fetch mode
    pub fn replay_plan(&self) -> Vec<CapturedCall> {
        let attributes = self
            .attributes
            .iter()
            .map(|(attr, value)| CapturedCall::SetAttribute(*attr, value.clone()));
        let columns = self
            .columns
            .iter()
            .map(|(column, args)| CapturedCall::BindColumn(column.clone(), args.clone()));
        let params = self
            .params
            .iter()
            .map(|(param, args)| CapturedCall::BindParam(param.clone(), args.clone()));
        let values = self
            .values
            .iter()
            .map(|(param, args)| CapturedCall::BindValue(param.clone(), args.clone()));
        let fetch_mode = self.fetch_mode.map(CapturedCall::SetFetchMode);

        attributes
            .chain(columns)
            .chain(params)
            .chain(values)
            .chain(fetch_mode)
            .collect()
    }
}

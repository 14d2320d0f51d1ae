use tracing::{debug, instrument};

use crate::captured::{
    BindColumnArgs, BindParamArgs, BindValueArgs, CapturedCall, CapturedState, ColumnKey,
    ParamKey,
};
use crate::constant::{Attribute, FetchMode, ParamType, StatementKind};
use crate::driver::{ColumnMeta, CreationArgs, ErrorInfo, RawStatement, Row};
use crate::error::{Error, Result, eyre};
use crate::liveness::Liveness;
use crate::manager::{ConnectionManager, StatementId, StatementSlot};
use crate::value::{BoundVar, Value};

/// A statement handle that outlives the physical connection it runs on
///
/// When the driver statement is gone (the connection dropped), the next
/// operation asks the connection manager to create it again and replays every
/// accepted configuration call onto it before going on.
///
/// Call [`close`](Self::close) when done; dropping the proxy closes it too.
pub struct StatementProxy<M: ConnectionManager> {
    manager: M,
    id: StatementId,
    kind: StatementKind,
    args: CreationArgs,
    slot: StatementSlot<M::Statement>,
    liveness: Liveness,
    captured: CapturedState,
    closed: bool,
}

impl<M: ConnectionManager> StatementProxy<M> {
    /// Wrap a slot that `manager` has registered under `id`
    ///
    /// The slot may be empty if the manager is currently disconnected.
    pub fn new(
        manager: M,
        id: StatementId,
        kind: StatementKind,
        args: CreationArgs,
        slot: StatementSlot<M::Statement>,
    ) -> Self {
        let liveness = manager.liveness();
        Self {
            manager,
            id,
            kind,
            args,
            slot,
            liveness,
            captured: CapturedState::new(),
            closed: false,
        }
    }

    pub fn id(&self) -> StatementId {
        self.id
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn creation_args(&self) -> &CreationArgs {
        &self.args
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// The replay log
    pub fn captured(&self) -> &CapturedState {
        &self.captured
    }

    /// Whether a driver statement is currently in place
    pub fn is_connected(&self) -> bool {
        self.slot.is_occupied()
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::NotConnected);
        }
        if self.slot.is_occupied() {
            return Ok(());
        }
        self.reconstruct()
    }

    #[instrument(skip_all, fields(id = %self.id))]
    fn reconstruct(&mut self) -> Result<()> {
        self.manager
            .reconstruct_statement(self.id, self.kind, &self.args)?;
        debug!("statement recreated, replaying captured state");
        self.replay()
    }

    fn replay(&mut self) -> Result<()> {
        self.captured.clear_deferred();
        let plan = self.captured.replay_plan();
        let replayed = self.slot.with_mut(|stmt| -> Result<Vec<ColumnKey>> {
            let mut deferred = Vec::new();
            for call in &plan {
                let accepted = call.apply(stmt);
                // Some drivers refuse result column bindings until a result set
                // exists; those are retried after the next execute.
                if let CapturedCall::BindColumn(column, _) = call {
                    match accepted {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(%column, "column binding deferred");
                            deferred.push(column.clone());
                        }
                        Err(err) => {
                            debug!(%column, %err, "column binding deferred");
                            deferred.push(column.clone());
                        }
                    }
                    continue;
                }
                if !accepted? {
                    debug!(?call, "call declined during replay");
                }
            }
            Ok(deferred)
        });

        let deferred = match replayed {
            Some(Ok(deferred)) => deferred,
            // a half-configured statement must not be used; the next call starts over
            Some(Err(err)) => {
                drop(self.slot.take());
                return Err(self.on_error(err));
            }
            None => {
                return Err(Error::LibraryBug(eyre!(
                    "{} was not installed after reconstruction",
                    self.id
                )));
            }
        };
        for column in deferred {
            self.captured.defer_column(column);
        }
        Ok(())
    }

    /// Give up the driver statement when `err` means the connection is gone
    ///
    /// The manager is told so that every other statement on the same
    /// connection is recreated too.
    fn on_error(&mut self, err: Error) -> Error {
        if err.is_connection_lost() {
            debug!(id = %self.id, %err, "connection lost");
            drop(self.slot.take());
            self.manager.connection_lost();
        }
        err
    }

    /// Forward `f` to the driver statement, reconnecting first if needed
    fn forward<R>(&mut self, f: impl FnOnce(&mut M::Statement) -> Result<R>) -> Result<R> {
        self.ensure_connected()?;
        let result = self.slot.with_mut(f).ok_or(Error::NotConnected)?;
        result.map_err(|err| self.on_error(err))
    }

    /// Forward a configuration call and record it once the driver accepts it
    fn forward_captured(&mut self, call: CapturedCall) -> Result<bool> {
        let accepted = self.forward(|stmt| call.apply(stmt))?;
        if accepted {
            self.captured.record(call);
        }
        Ok(accepted)
    }

    pub fn set_attribute(&mut self, attr: Attribute, value: impl Into<Value>) -> Result<bool> {
        self.forward_captured(CapturedCall::SetAttribute(attr, value.into()))
    }

    /// Bind a result column to `target`, filled on each fetch in `FetchMode::Bound`
    pub fn bind_column(&mut self, column: impl Into<ColumnKey>, target: &BoundVar) -> Result<bool> {
        self.bind_column_with(column, BindColumnArgs::new(target))
    }

    pub fn bind_column_with(
        &mut self,
        column: impl Into<ColumnKey>,
        args: BindColumnArgs,
    ) -> Result<bool> {
        self.forward_captured(CapturedCall::BindColumn(column.into(), args))
    }

    /// Bind a parameter by reference: `var` is read when the statement executes
    pub fn bind_param(
        &mut self,
        param: impl Into<ParamKey>,
        var: &BoundVar,
        param_type: ParamType,
    ) -> Result<bool> {
        self.bind_param_with(param, BindParamArgs::new(var, param_type))
    }

    pub fn bind_param_with(
        &mut self,
        param: impl Into<ParamKey>,
        args: BindParamArgs,
    ) -> Result<bool> {
        self.forward_captured(CapturedCall::BindParam(param.into(), args))
    }

    /// Bind a parameter to a snapshot of `value`
    pub fn bind_value(
        &mut self,
        param: impl Into<ParamKey>,
        value: impl Into<Value>,
        param_type: ParamType,
    ) -> Result<bool> {
        self.forward_captured(CapturedCall::BindValue(
            param.into(),
            BindValueArgs::new(value, param_type),
        ))
    }

    pub fn set_fetch_mode(&mut self, mode: FetchMode) -> Result<bool> {
        self.forward_captured(CapturedCall::SetFetchMode(mode))
    }

    /// Execute the statement
    ///
    /// On success the shared liveness cell is marked alive as of the moment
    /// right before the execute, and deferred column bindings are retried once.
    #[instrument(skip_all, fields(id = %self.id))]
    pub fn execute(&mut self, params: Option<&[Value]>) -> Result<bool> {
        self.ensure_connected()?;
        let started_at = self.manager.now();
        let executed = self
            .slot
            .with_mut(|stmt| stmt.execute(params))
            .ok_or(Error::NotConnected)?
            .map_err(|err| self.on_error(err))?;
        if executed {
            self.liveness.mark_alive(started_at);
            self.retry_deferred_columns();
        }
        Ok(executed)
    }

    fn retry_deferred_columns(&mut self) {
        let deferred = self.captured.take_deferred();
        if deferred.is_empty() {
            return;
        }
        self.slot.with_mut(|stmt| {
            for (column, args) in &deferred {
                // a second refusal leaves the column unbound
                match stmt.bind_column(column, args) {
                    Ok(true) => debug!(%column, "deferred column bound"),
                    Ok(false) => debug!(%column, "deferred column binding declined"),
                    Err(err) => debug!(%column, %err, "deferred column binding failed"),
                }
            }
        });
    }

    pub fn error_code(&mut self) -> Result<Option<String>> {
        self.forward(|stmt| Ok(stmt.error_code()))
    }

    pub fn error_info(&mut self) -> Result<ErrorInfo> {
        self.forward(|stmt| Ok(stmt.error_info()))
    }

    pub fn get_attribute(&mut self, attr: Attribute) -> Result<Option<Value>> {
        self.forward(|stmt| stmt.get_attribute(attr))
    }

    pub fn row_count(&mut self) -> Result<u64> {
        self.forward(|stmt| Ok(stmt.row_count()))
    }

    pub fn column_count(&mut self) -> Result<usize> {
        self.forward(|stmt| Ok(stmt.column_count()))
    }

    pub fn column_meta(&mut self, column: usize) -> Result<Option<ColumnMeta>> {
        self.forward(|stmt| stmt.column_meta(column))
    }

    pub fn next_rowset(&mut self) -> Result<bool> {
        self.forward(|stmt| stmt.next_rowset())
    }

    pub fn close_cursor(&mut self) -> Result<bool> {
        self.forward(|stmt| stmt.close_cursor())
    }

    pub fn fetch(&mut self, mode: Option<FetchMode>) -> Result<Option<Row>> {
        self.forward(|stmt| stmt.fetch(mode))
    }

    pub fn fetch_all(&mut self, mode: Option<FetchMode>) -> Result<Vec<Row>> {
        self.forward(|stmt| stmt.fetch_all(mode))
    }

    pub fn fetch_column(&mut self, column: usize) -> Result<Option<Value>> {
        self.forward(|stmt| stmt.fetch_column(column))
    }

    pub fn fetch_object(&mut self) -> Result<Option<Row>> {
        self.forward(|stmt| stmt.fetch_object())
    }

    pub fn debug_dump_params(&mut self) -> Result<String> {
        self.forward(|stmt| Ok(stmt.debug_dump_params()))
    }

    /// Release the driver statement and tell the manager to forget it
    ///
    /// Only the first call has an effect. A proxy whose statement is already
    /// gone does not notify the manager. Every later operation fails with
    /// `Error::NotConnected`.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.slot.is_occupied() {
            self.manager.forget_statement(self.id);
            drop(self.slot.take());
        }
    }
}

impl<M: ConnectionManager> Drop for StatementProxy<M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M: ConnectionManager> std::fmt::Debug for StatementProxy<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementProxy")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("slot", &self.slot)
            .field("captured", &self.captured)
            .field("closed", &self.closed)
            .finish()
    }
}

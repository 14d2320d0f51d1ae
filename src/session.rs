use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::backoff::Backoff;
use crate::constant::{ErrorMode, StatementKind};
use crate::driver::{Connection, CreationArgs, Driver, ErrorInfo};
use crate::error::{Error, Result};
use crate::liveness::{Clock, Liveness, SystemClock};
use crate::manager::{ConnectionManager, Registry, StatementId, StatementSlot};
use crate::opts::Opts;
use crate::statement::StatementProxy;

type DriverStatement<D> = <<D as Driver>::Connection as Connection>::Statement;

/// A statement proxy handed out by a `Session`
pub type Statement<D> = StatementProxy<Session<D>>;

struct Inner<D: Driver> {
    driver: D,
    opts: Opts,
    backoff: Backoff,
    clock: Box<dyn Clock>,
    conn: RefCell<Option<D::Connection>>,
    registry: Registry<DriverStatement<D>>,
    liveness: Liveness,
    last_error: RefCell<Option<ErrorInfo>>,
}

/// A logical connection that re-establishes its physical connection on demand
///
/// Cloning gives another handle to the same session. Statements created by a
/// session are recreated on the new physical connection after a reconnect.
pub struct Session<D: Driver> {
    inner: Rc<Inner<D>>,
}

impl<D: Driver> Clone for Session<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<D: Driver> Session<D> {
    /// Create a session without connecting; the first statement connects
    pub fn new<O: TryInto<Opts>>(driver: D, opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::with_clock(driver, opts, SystemClock)
    }

    /// Like `new`, with a custom clock for liveness timestamps
    pub fn with_clock<O, C>(driver: D, opts: O, clock: C) -> Result<Self>
    where
        O: TryInto<Opts>,
        Error: From<O::Error>,
        C: Clock + 'static,
    {
        let opts: Opts = opts.try_into()?;
        Ok(Self {
            inner: Rc::new(Inner {
                driver,
                backoff: Backoff::from(&opts),
                opts,
                clock: Box::new(clock),
                conn: RefCell::new(None),
                registry: Registry::new(),
                liveness: Liveness::new(),
                last_error: RefCell::new(None),
            }),
        })
    }

    /// Create a session and connect right away
    ///
    /// Connection errors are returned regardless of the error mode.
    pub fn connect<O: TryInto<Opts>>(driver: D, opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let session = Self::new(driver, opts)?;
        session.reconnect()?;
        Ok(session)
    }

    pub fn opts(&self) -> &Opts {
        &self.inner.opts
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.borrow().is_some()
    }

    /// Error recorded by the last failure under a non-throwing error mode
    pub fn last_error(&self) -> Option<ErrorInfo> {
        self.inner.last_error.borrow().clone()
    }

    /// Statements handed out and not yet closed or dropped
    pub fn outstanding(&self) -> usize {
        self.inner.registry.outstanding()
    }

    /// Prepare a statement for later execution
    pub fn prepare(&self, sql: &str) -> Result<Statement<D>> {
        self.create(StatementKind::Prepared, CreationArgs::new(sql))
    }

    pub fn prepare_with(&self, args: CreationArgs) -> Result<Statement<D>> {
        self.create(StatementKind::Prepared, args)
    }

    /// Run a query whose result set is fetched from the returned statement
    pub fn query(&self, sql: &str) -> Result<Statement<D>> {
        self.create(StatementKind::Query, CreationArgs::new(sql))
    }

    pub fn query_with(&self, args: CreationArgs) -> Result<Statement<D>> {
        self.create(StatementKind::Query, args)
    }

    /// Create a proxy, with its driver statement if currently connected
    ///
    /// Driver errors while creating the statement are returned as-is so a
    /// broken query is reported where it is written.
    fn create(&self, kind: StatementKind, args: CreationArgs) -> Result<Statement<D>> {
        let slot = StatementSlot::empty();
        let created = self
            .inner
            .conn
            .borrow_mut()
            .as_mut()
            .map(|conn| conn.create(kind, &args));
        match created {
            Some(Ok(statement)) => slot.install(statement),
            Some(Err(err)) if err.is_connection_lost() => {
                debug!(%err, "connection lost while creating a statement");
                self.disconnect();
            }
            Some(Err(err)) => return Err(err),
            None => {}
        }
        let id = self.inner.registry.register(&slot);
        Ok(StatementProxy::new(self.clone(), id, kind, args, slot))
    }

    /// Run a statement without a result set on the current connection
    pub fn exec(&self, sql: &str) -> Result<u64> {
        self.ensure_connection().map_err(|err| self.fail(err))?;
        let result = self
            .inner
            .conn
            .borrow_mut()
            .as_mut()
            .map(|conn| conn.exec(sql))
            .ok_or(Error::NotConnected)?;
        if let Err(err) = &result {
            if err.is_connection_lost() {
                self.disconnect();
            }
        }
        result
    }

    /// Whether the physical connection is alive
    ///
    /// A connection known alive within `opts.ping_interval` is trusted without
    /// a round-trip; otherwise it is pinged, and dropped if the ping fails.
    pub fn check_alive(&self) -> bool {
        let now = self.inner.clock.now();
        if !self.is_connected() {
            return false;
        }
        if self.inner.liveness.is_fresh(now, self.inner.opts.ping_interval) {
            return true;
        }
        let pinged = self
            .inner
            .conn
            .borrow_mut()
            .as_mut()
            .map(|conn| conn.ping());
        match pinged {
            Some(Ok(())) => {
                self.inner.liveness.mark_alive(now);
                true
            }
            Some(Err(err)) => {
                debug!(%err, "ping failed");
                self.disconnect();
                false
            }
            None => false,
        }
    }

    /// Drop the physical connection and every driver statement on it
    ///
    /// Statements stay registered and are recreated on their next use.
    pub fn disconnect(&self) {
        self.inner.registry.clear_all();
        drop(self.inner.conn.take());
        self.inner.liveness.mark_dead();
    }

    /// Replace the physical connection with a new one
    ///
    /// Tries up to `opts.reconnect_attempts` times with exponential backoff.
    #[instrument(skip_all)]
    pub fn reconnect(&self) -> Result<()> {
        self.disconnect();
        let attempts = self.inner.opts.reconnect_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            let delay = self.inner.backoff.delay(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            match self.open() {
                Ok(conn) => {
                    *self.inner.conn.borrow_mut() = Some(conn);
                    self.inner.liveness.mark_alive(self.inner.clock.now());
                    debug!(attempt, "connected");
                    return Ok(());
                }
                Err(err) => {
                    debug!(attempt, %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        let source = last_err.unwrap_or(Error::NotConnected);
        Err(Error::ReconnectFailed {
            attempts,
            source: Box::new(source),
        })
    }

    fn open(&self) -> Result<D::Connection> {
        let mut conn = self.inner.driver.connect(&self.inner.opts)?;
        if let Some(init_command) = &self.inner.opts.init_command {
            conn.exec(init_command)?;
        }
        Ok(conn)
    }

    fn ensure_connection(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if !self.inner.opts.auto_reconnect {
            return Err(Error::NotConnected);
        }
        self.reconnect()
    }

    /// Apply the error mode to a failure
    fn fail(&self, err: Error) -> Error {
        match self.inner.opts.error_mode {
            ErrorMode::Exception => err,
            ErrorMode::Warning => {
                warn!(%err, "statement unavailable");
                *self.inner.last_error.borrow_mut() = Some(ErrorInfo::from(&err));
                Error::NotConnected
            }
            ErrorMode::Silent => {
                *self.inner.last_error.borrow_mut() = Some(ErrorInfo::from(&err));
                Error::NotConnected
            }
        }
    }

    fn try_reconstruct(
        &self,
        id: StatementId,
        kind: StatementKind,
        args: &CreationArgs,
    ) -> Result<()> {
        self.ensure_connection()?;
        let created = self
            .inner
            .conn
            .borrow_mut()
            .as_mut()
            .map(|conn| conn.create(kind, args))
            .ok_or(Error::NotConnected)?;
        let statement = match created {
            Ok(statement) => statement,
            Err(err) => {
                if err.is_connection_lost() {
                    self.disconnect();
                }
                return Err(err);
            }
        };
        if !self.inner.registry.install(id, statement) {
            debug!(%id, "statement no longer registered");
        }
        Ok(())
    }
}

impl<D: Driver> ConnectionManager for Session<D> {
    type Statement = DriverStatement<D>;

    #[instrument(skip_all, fields(id = %id))]
    fn reconstruct_statement(
        &self,
        id: StatementId,
        kind: StatementKind,
        args: &CreationArgs,
    ) -> Result<()> {
        self.try_reconstruct(id, kind, args)
            .map_err(|err| self.fail(err))
    }

    fn forget_statement(&self, id: StatementId) {
        self.inner.registry.forget(id);
    }

    fn connection_lost(&self) {
        warn!("connection lost, dropping every statement");
        self.disconnect();
    }

    fn liveness(&self) -> Liveness {
        self.inner.liveness.clone()
    }

    fn now(&self) -> Instant {
        self.inner.clock.now()
    }
}

impl<D: Driver> std::fmt::Debug for Session<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("opts", &self.inner.opts)
            .field("connected", &self.is_connected())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

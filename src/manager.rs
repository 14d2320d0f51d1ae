use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::constant::StatementKind;
use crate::driver::{CreationArgs, RawStatement};
use crate::error::Result;
use crate::liveness::Liveness;

/// Identity of a statement proxy inside its connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementId(pub u64);

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt#{}", self.0)
    }
}

/// The place where a proxy's driver statement lives
///
/// The proxy owns the slot; the connection manager keeps a weak handle so it
/// can install a recreated statement, or empty the slot when the physical
/// connection goes away.
pub struct StatementSlot<S>(Rc<RefCell<Option<S>>>);

impl<S> StatementSlot<S> {
    pub fn new(statement: Option<S>) -> Self {
        Self(Rc::new(RefCell::new(statement)))
    }

    pub fn empty() -> Self {
        Self::new(None)
    }

    pub fn is_occupied(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn downgrade(&self) -> WeakSlot<S> {
        WeakSlot(Rc::downgrade(&self.0))
    }

    pub fn install(&self, statement: S) {
        *self.0.borrow_mut() = Some(statement);
    }

    pub fn take(&self) -> Option<S> {
        self.0.borrow_mut().take()
    }

    /// Run `f` on the statement, `None` when the slot is empty
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut S) -> R) -> Option<R> {
        self.0.borrow_mut().as_mut().map(f)
    }
}

impl<S> fmt::Debug for StatementSlot<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementSlot")
            .field("occupied", &self.is_occupied())
            .finish()
    }
}

/// Manager-side handle of a `StatementSlot`
pub struct WeakSlot<S>(Weak<RefCell<Option<S>>>);

impl<S> WeakSlot<S> {
    /// `false` once the owning proxy is gone
    pub fn is_live(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Returns `false` when the owning proxy is gone
    pub fn install(&self, statement: S) -> bool {
        match self.0.upgrade() {
            Some(slot) => {
                *slot.borrow_mut() = Some(statement);
                true
            }
            None => false,
        }
    }

    /// Drop the statement, if any
    pub fn clear(&self) {
        if let Some(slot) = self.0.upgrade() {
            drop(slot.take());
        }
    }
}

/// Outstanding statements of one connection manager
pub struct Registry<S> {
    next_id: Cell<u64>,
    slots: RefCell<Vec<(StatementId, WeakSlot<S>)>>,
}

impl<S> Registry<S> {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            slots: RefCell::new(Vec::new()),
        }
    }

    /// Track a slot under a fresh id, dropping entries whose proxies are gone
    pub fn register(&self, slot: &StatementSlot<S>) -> StatementId {
        let id = StatementId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let mut slots = self.slots.borrow_mut();
        slots.retain(|(_, weak)| weak.is_live());
        slots.push((id, slot.downgrade()));
        id
    }

    /// Returns `false` when `id` is unknown or its proxy is gone
    pub fn install(&self, id: StatementId, statement: S) -> bool {
        let slots = self.slots.borrow();
        match slots.iter().find(|(entry, _)| *entry == id) {
            Some((_, weak)) => weak.install(statement),
            None => false,
        }
    }

    pub fn forget(&self, id: StatementId) {
        self.slots.borrow_mut().retain(|(entry, _)| *entry != id);
    }

    /// Destroy every driver statement, keeping the registrations
    pub fn clear_all(&self) {
        for (_, weak) in self.slots.borrow().iter() {
            weak.clear();
        }
    }

    pub fn contains(&self, id: StatementId) -> bool {
        self.slots
            .borrow()
            .iter()
            .any(|(entry, weak)| *entry == id && weak.is_live())
    }

    /// Number of registered statements whose proxies are still around
    pub fn outstanding(&self) -> usize {
        self.slots
            .borrow()
            .iter()
            .filter(|(_, weak)| weak.is_live())
            .count()
    }
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// What a statement proxy needs from the owner of the physical connection
///
/// Implementations use interior mutability: the manager is shared by every
/// proxy it handed out.
pub trait ConnectionManager {
    type Statement: RawStatement;

    /// Create the driver statement again and install it into the slot
    /// registered under `id`
    ///
    /// Either the slot holds the new statement and `Ok(())` is returned, or
    /// the slot is left empty and an error is returned. A manager that does
    /// not raise errors answers `Error::NotConnected`.
    fn reconstruct_statement(
        &self,
        id: StatementId,
        kind: StatementKind,
        args: &CreationArgs,
    ) -> Result<()>;

    /// Drop the bookkeeping of a statement whose proxy is closing; idempotent
    fn forget_statement(&self, id: StatementId);

    /// A driver statement reported that the physical connection is gone
    ///
    /// The reporting proxy has already emptied its own slot. Managers that
    /// own a connection drop it here so that every proxy reconstructs.
    fn connection_lost(&self) {}

    fn liveness(&self) -> Liveness;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<M: ConnectionManager + ?Sized> ConnectionManager for Rc<M> {
    type Statement = M::Statement;

    fn reconstruct_statement(
        &self,
        id: StatementId,
        kind: StatementKind,
        args: &CreationArgs,
    ) -> Result<()> {
        (**self).reconstruct_statement(id, kind, args)
    }

    fn forget_statement(&self, id: StatementId) {
        (**self).forget_statement(id)
    }

    fn connection_lost(&self) {
        (**self).connection_lost()
    }

    fn liveness(&self) -> Liveness {
        (**self).liveness()
    }

    fn now(&self) -> Instant {
        (**self).now()
    }
}

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of timestamps for liveness bookkeeping
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Default)]
struct LivenessState {
    is_alive: Cell<Option<bool>>,
    last_checked_at: Cell<Option<Instant>>,
}

/// Whether the logical connection was last known alive, and since when
///
/// One cell is shared by a connection manager and every statement proxy on
/// the same connection. Writers:
/// - a statement proxy writes only `mark_alive`, right after its own
///   successful execute, with the timestamp taken before the execute.
/// - the connection manager writes both fields when it pings, connects or
///   disconnects.
///
/// Every reader must tolerate stale or absent values. The cell is `!Send`,
/// so all sharers live on one thread.
#[derive(Debug, Clone, Default)]
pub struct Liveness(Rc<LivenessState>);

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` until anyone has checked
    pub fn is_alive(&self) -> Option<bool> {
        self.0.is_alive.get()
    }

    pub fn last_checked_at(&self) -> Option<Instant> {
        self.0.last_checked_at.get()
    }

    pub fn mark_alive(&self, at: Instant) {
        self.0.is_alive.set(Some(true));
        self.0.last_checked_at.set(Some(at));
    }

    pub fn mark_dead(&self) {
        self.0.is_alive.set(Some(false));
    }

    /// Known alive and checked no longer than `window` before `now`
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        match (self.is_alive(), self.last_checked_at()) {
            (Some(true), Some(at)) => now.saturating_duration_since(at) <= window,
            _ => false,
        }
    }

    pub fn ptr_eq(&self, other: &Liveness) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_starts_unknown() {
        let liveness = Liveness::new();
        assert_eq!(liveness.is_alive(), None);
        assert_eq!(liveness.last_checked_at(), None);
        assert!(!liveness.is_fresh(Instant::now(), Duration::from_secs(60)));
    }

    #[test]
    fn test_liveness_shared_between_clones() {
        let a = Liveness::new();
        let b = a.clone();
        let now = Instant::now();
        b.mark_alive(now);
        assert!(a.ptr_eq(&b));
        assert_eq!(a.is_alive(), Some(true));
        assert_eq!(a.last_checked_at(), Some(now));
    }

    #[test]
    fn test_liveness_freshness_window() {
        let liveness = Liveness::new();
        let t0 = Instant::now();
        liveness.mark_alive(t0);
        assert!(liveness.is_fresh(t0 + Duration::from_secs(5), Duration::from_secs(10)));
        assert!(!liveness.is_fresh(t0 + Duration::from_secs(11), Duration::from_secs(10)));
    }

    #[test]
    fn test_mark_dead_keeps_timestamp() {
        let liveness = Liveness::new();
        let t0 = Instant::now();
        liveness.mark_alive(t0);
        liveness.mark_dead();
        assert_eq!(liveness.is_alive(), Some(false));
        assert_eq!(liveness.last_checked_at(), Some(t0));
        assert!(!liveness.is_fresh(t0, Duration::from_secs(10)));
    }
}

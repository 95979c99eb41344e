use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::errors::SearchResult;

/// A session the pool can hold.
pub trait PooledSession: Send {
    /// Lightweight liveness probe (a no-op command on the wire).
    fn check(&mut self) -> bool;
    fn is_healthy(&self) -> bool;
    fn close(&mut self);
}

/// Opens new sessions on demand.
pub trait SessionFactory: Send + Sync {
    type Session: PooledSession;
    fn open(&self) -> SearchResult<Self::Session>;
}

/// A checked-out session, tagged with the pool generation it belongs to.
/// Dereferences to the underlying session.
pub struct PooledConn<S> {
    session: S,
    generation: u64,
}

impl<S> Deref for PooledConn<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> DerefMut for PooledConn<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// Bounded pool of reusable sessions.
///
/// Invariant: `idle + checked_out <= capacity` at all times; a session is
/// never checked out to two callers. `acquire` returning `None` is a
/// transient condition (pool exhausted, or the connect failed), not a fatal
/// one.
///
/// `close_all` bumps the pool generation. Sessions checked out before the
/// bump are closed on release instead of being recycled, so a refresh
/// really does replace every session even while workers still hold some.
pub struct ConnectionPool<F: SessionFactory> {
    factory: F,
    capacity: usize,
    state: Mutex<PoolState<F::Session>>,
}

struct PoolState<S> {
    idle: VecDeque<S>,
    created: usize,
    generation: u64,
}

impl<F: SessionFactory> ConnectionPool<F> {
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            factory,
            capacity,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                created: 0,
                generation: 0,
            }),
        }
    }

    /// Pop an idle session and health-check it; if none is available (or it
    /// is dead) and the pool is below capacity, open a new one. `None` means
    /// the pool is exhausted or the connect failed.
    pub fn acquire(&self) -> Option<PooledConn<F::Session>> {
        let popped = {
            let mut state = self.state.lock().unwrap();
            let generation = state.generation;
            state.idle.pop_front().map(|session| (session, generation))
        };

        if let Some((mut session, generation)) = popped {
            if session.check() {
                return Some(PooledConn {
                    session,
                    generation,
                });
            }
            session.close();
            let mut state = self.state.lock().unwrap();
            state.created = state.created.saturating_sub(1);
        }

        // Reserve a slot before connecting so concurrent acquires cannot
        // overshoot capacity; give it back if the connect fails.
        {
            let mut state = self.state.lock().unwrap();
            if state.created >= self.capacity {
                debug!("Connection pool exhausted ({} sessions)", self.capacity);
                return None;
            }
            state.created += 1;
        }

        match self.factory.open() {
            Ok(session) => {
                let generation = self.state.lock().unwrap().generation;
                Some(PooledConn {
                    session,
                    generation,
                })
            }
            Err(e) => {
                warn!("Failed to open a new session: {}", e);
                let mut state = self.state.lock().unwrap();
                state.created = state.created.saturating_sub(1);
                None
            }
        }
    }

    /// Return a session. Healthy, current-generation sessions go back on
    /// the idle queue; unhealthy ones are closed and make room for a
    /// replacement. A session from before the last `close_all` is closed
    /// outright: its slot was already reclaimed when the counter was reset.
    pub fn release(&self, mut conn: PooledConn<F::Session>) {
        let stale = {
            let state = self.state.lock().unwrap();
            conn.generation != state.generation
        };
        if stale {
            debug!("Discarding a session from a previous pool generation");
            conn.session.close();
            return;
        }
        if conn.session.is_healthy() {
            let mut state = self.state.lock().unwrap();
            state.idle.push_back(conn.session);
        } else {
            conn.session.close();
            let mut state = self.state.lock().unwrap();
            state.created = state.created.saturating_sub(1);
        }
    }

    /// Drain and close every idle session, reset the counter and start a
    /// new generation, so the next `acquire` reconnects from scratch and
    /// still-checked-out sessions are discarded when they come back.
    pub fn close_all(&self) {
        let drained: Vec<F::Session> = {
            let mut state = self.state.lock().unwrap();
            state.created = 0;
            state.generation += 1;
            state.idle.drain(..).collect()
        };
        for mut session in drained {
            session.close();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeSession {
        healthy: bool,
        closed: Arc<AtomicUsize>,
    }

    impl PooledSession for FakeSession {
        fn check(&mut self) -> bool {
            self.healthy
        }
        fn is_healthy(&self) -> bool {
            self.healthy
        }
        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                opened: Arc::new(AtomicUsize::new(0)),
                closed: Arc::new(AtomicUsize::new(0)),
                fail: false,
            }
        }
    }

    impl SessionFactory for FakeFactory {
        type Session = FakeSession;

        fn open(&self) -> SearchResult<FakeSession> {
            if self.fail {
                return Err(crate::errors::SearchError::connection_failed("refused"));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                healthy: true,
                closed: self.closed.clone(),
            })
        }
    }

    #[test]
    fn test_acquire_creates_up_to_capacity() {
        let pool = ConnectionPool::new(FakeFactory::new(), 2);

        let a = pool.acquire().expect("first session");
        let b = pool.acquire().expect("second session");
        assert!(pool.acquire().is_none(), "pool should be exhausted");
        assert_eq!(pool.created_count(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_acquire_recycles_idle_sessions() {
        let pool = ConnectionPool::new(FakeFactory::new(), 2);
        let opened = pool.factory.opened.clone();

        let session = pool.acquire().unwrap();
        pool.release(session);
        let _again = pool.acquire().unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1, "session should be reused");
    }

    #[test]
    fn test_unhealthy_release_frees_capacity() {
        let pool = ConnectionPool::new(FakeFactory::new(), 1);

        let mut session = pool.acquire().unwrap();
        session.healthy = false;
        pool.release(session);

        assert_eq!(pool.created_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        // The freed slot allows a replacement.
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_dead_idle_session_is_replaced() {
        let pool = ConnectionPool::new(FakeFactory::new(), 1);
        let closed = pool.factory.closed.clone();

        let mut session = pool.acquire().unwrap();
        session.healthy = true;
        pool.release(session);

        // Poison the idle session in place.
        {
            let mut state = pool.state.lock().unwrap();
            state.idle.front_mut().unwrap().healthy = false;
        }

        let replacement = pool.acquire();
        assert!(replacement.is_some(), "dead session should be replaced");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.created_count(), 1);
    }

    #[test]
    fn test_connect_failure_returns_none_and_releases_slot() {
        let mut factory = FakeFactory::new();
        factory.fail = true;
        let pool = ConnectionPool::new(factory, 1);

        assert!(pool.acquire().is_none());
        assert_eq!(pool.created_count(), 0, "reserved slot must be returned");
    }

    #[test]
    fn test_close_all_resets() {
        let pool = ConnectionPool::new(FakeFactory::new(), 3);
        let closed = pool.factory.closed.clone();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a);
        pool.release(b);

        pool.close_all();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.created_count(), 0);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_sessions_held_across_close_all_are_not_recycled() {
        // A refresh while sessions are checked out must not let those
        // sessions back into rotation, or the pool ends up over capacity
        // holding connections the refresh meant to discard.
        let pool = ConnectionPool::new(FakeFactory::new(), 2);
        let closed = pool.factory.closed.clone();

        let old_a = pool.acquire().unwrap();
        let old_b = pool.acquire().unwrap();
        pool.close_all();

        let new_a = pool.acquire().unwrap();
        let new_b = pool.acquire().unwrap();
        assert_eq!(pool.created_count(), 2);

        // Pre-refresh sessions come back healthy but must be closed, not
        // pushed onto the idle queue.
        pool.release(old_a);
        pool.release(old_b);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.created_count(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);

        pool.release(new_a);
        pool.release(new_b);
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.created_count(), 2);

        // Post-refresh sessions are still recyclable.
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_capacity_invariant_across_refresh_churn() {
        let pool = ConnectionPool::new(FakeFactory::new(), 2);

        let held = pool.acquire().unwrap();
        pool.close_all();
        let fresh_a = pool.acquire().unwrap();
        let fresh_b = pool.acquire().unwrap();
        assert!(pool.acquire().is_none(), "fresh generation fills capacity");

        pool.release(held);
        assert_eq!(
            pool.idle_count(),
            0,
            "stale release must not add idle capacity"
        );
        pool.release(fresh_a);
        pool.release(fresh_b);
        assert_eq!(pool.idle_count(), 2);
        assert!(pool.idle_count() + pool.created_count() <= 2 * pool.capacity());
    }

    #[test]
    fn test_capacity_invariant_under_churn() {
        let pool = ConnectionPool::new(FakeFactory::new(), 3);

        for _ in 0..10 {
            let mut held = Vec::new();
            while let Some(session) = pool.acquire() {
                held.push(session);
            }
            assert!(held.len() <= pool.capacity());
            assert!(pool.idle_count() + held.len() <= pool.capacity());
            for session in held {
                pool.release(session);
            }
        }
    }
}

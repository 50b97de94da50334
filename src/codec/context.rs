//! Per-connection decoder state management.

use crate::connection::Connection;

/// Mutable parse state owned by one connection for one decoder.
///
/// Contexts are created lazily on the first byte of a message, reset once
/// the message has been fully handled, and released when the connection
/// closes or hits an unrecoverable error.
pub trait DecoderContext: Send + 'static {
    /// Restore the initial state, keeping reusable allocations.
    fn reset(&mut self);

    /// Free every owned resource. Calling it more than once is a no-op.
    fn release(&mut self);
}

/// Run `f` with the context stored under `key`, creating it with `init` if
/// absent.
///
/// The context is taken out of the attribute store for the duration of `f`
/// so no lock is held while `f` runs, then put back unless `f` returned
/// `false` for `keep`.
pub fn with_context<C, R>(
    connection: &Connection,
    key: &str,
    init: impl FnOnce() -> C,
    f: impl FnOnce(&mut C) -> (R, bool),
) -> R
where
    C: DecoderContext,
{
    let taken = connection.with_attributes(|attrs| attrs.take::<C>(key));
    let mut ctx = taken.unwrap_or_else(init);
    let (result, keep) = f(&mut ctx);
    if keep {
        let key = key.to_owned();
        connection.with_attributes(|attrs| attrs.insert(key, ctx));
    } else {
        ctx.release();
    }
    result
}

/// Run `f` with the context stored under `key`, if one exists.
///
/// Behaves like [`with_context`] but never creates a context; returns
/// `None` when none is stored.
pub fn resume_context<C, R>(
    connection: &Connection,
    key: &str,
    f: impl FnOnce(&mut C) -> (R, bool),
) -> Option<R>
where
    C: DecoderContext,
{
    let mut ctx = connection.with_attributes(|attrs| attrs.take::<C>(key))?;
    let (result, keep) = f(&mut ctx);
    if keep {
        let key = key.to_owned();
        connection.with_attributes(|attrs| attrs.insert(key, ctx));
    } else {
        ctx.release();
    }
    Some(result)
}

/// Remove the context stored under `key` and release it.
///
/// Returns `false` when no context of type `C` was stored.
pub fn release_context<C: DecoderContext>(connection: &Connection, key: &str) -> bool {
    let taken = connection.with_attributes(|attrs| attrs.take::<C>(key));
    match taken {
        Some(mut ctx) => {
            ctx.release();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Default)]
    struct Counter {
        calls: u32,
        releases: Arc<AtomicUsize>,
    }

    impl DecoderContext for Counter {
        fn reset(&mut self) { self.calls = 0; }

        fn release(&mut self) { self.releases.fetch_add(1, Ordering::SeqCst); }
    }

    #[test]
    fn context_persists_between_calls() {
        let conn = Connection::detached();
        for expected in 1..=3 {
            let calls = with_context(&conn, "counter", Counter::default, |c| {
                c.calls += 1;
                (c.calls, true)
            });
            assert_eq!(calls, expected);
        }
        assert!(conn.with_attributes(|a| a.contains("counter")));
    }

    #[test]
    fn discarded_context_is_released_and_removed() {
        let conn = Connection::detached();
        let releases = Arc::new(AtomicUsize::new(0));
        let init = {
            let releases = Arc::clone(&releases);
            move || Counter {
                calls: 0,
                releases,
            }
        };
        with_context(&conn, "counter", init, |c| {
            c.calls += 1;
            ((), false)
        });
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!conn.with_attributes(|a| a.contains("counter")));
    }

    #[test]
    fn resume_never_creates_a_context() {
        let conn = Connection::detached();
        assert_eq!(resume_context::<Counter, _>(&conn, "counter", |_| ((), true)), None);
        with_context(&conn, "counter", Counter::default, |c| {
            c.calls = 4;
            ((), true)
        });
        let calls = resume_context::<Counter, _>(&conn, "counter", |c| (c.calls, true));
        assert_eq!(calls, Some(4));
    }

    #[test]
    fn release_context_reports_missing_state() {
        let conn = Connection::detached();
        assert!(!release_context::<Counter>(&conn, "counter"));
        with_context(&conn, "counter", Counter::default, |_| ((), true));
        assert!(release_context::<Counter>(&conn, "counter"));
        assert!(!release_context::<Counter>(&conn, "counter"));
    }
}

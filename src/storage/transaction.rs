//! Explicit unit of work shared by the update pipeline.
//!
//! Writers open named sections around multi-table updates. Sections nest:
//! opening a section while another one is open merges it into the running
//! unit of work instead of starting a competing one. Work that must not run
//! while a unit of work is open (statistics counters, ID disposal) is handed
//! to [`TransactionContext::on_idle`], which either runs it immediately or
//! queues it until the outermost section ends. The returned [`Deferral`]
//! tells the caller which of the two happened. A rollback drops queued work
//! unless it was registered with [`TransactionContext::on_idle_or_rollback`].

use std::fmt;

use parking_lot::Mutex;

use crate::error::{StoreError, StoreResult};

type DeferredFn = Box<dyn FnOnce() -> StoreResult<()> + Send>;

struct DeferredAction {
    label: &'static str,
    action: DeferredFn,
    /// Runs on rollback too.
    durable: bool,
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("label", &self.label)
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct TxState {
    sections: Vec<String>,
    deferred: Vec<DeferredAction>,
}

/// Whether an [`TransactionContext::on_idle`] action ran immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    /// No section was open; the action already ran.
    RanNow,
    /// The action is queued until the outermost section ends.
    Deferred,
}

/// Section-based unit of work with commit-time continuations.
#[derive(Debug, Default)]
pub struct TransactionContext {
    state: Mutex<TxState>,
}

impl TransactionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a named section. Nested sections merge into the outer one.
    pub fn begin_section(&self, name: &str) {
        let mut state = self.state.lock();
        if !state.sections.is_empty() {
            tracing::trace!(
                target: "semstore::storage",
                section = name,
                outer = %state.sections[0],
                "merging section into open unit of work"
            );
        }
        state.sections.push(name.to_string());
    }

    /// Closes a named section. When the outermost section closes, every
    /// deferred action runs in registration order.
    ///
    /// # Errors
    /// Returns an internal error when `name` is not open, or the first error
    /// raised by a deferred action (the remaining actions still run).
    pub fn end_section(&self, name: &str) -> StoreResult<()> {
        let pending = {
            let mut state = self.state.lock();
            Self::close(&mut state, name)?;
            if state.sections.is_empty() {
                std::mem::take(&mut state.deferred)
            } else {
                Vec::new()
            }
        };
        Self::run_all(pending)
    }

    /// Closes a named section after a failure. When it was the outermost
    /// section, deferred actions are discarded except those registered with
    /// [`TransactionContext::on_idle_or_rollback`], which run. Their errors
    /// are logged.
    pub fn rollback_section(&self, name: &str) {
        let durable = {
            let mut state = self.state.lock();
            if let Err(e) = Self::close(&mut state, name) {
                tracing::warn!(target: "semstore::storage", error = %e, "rollback of unknown section");
                return;
            }
            if !state.sections.is_empty() {
                return;
            }
            let (durable, discarded): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.deferred).into_iter().partition(|d| d.durable);
            if !discarded.is_empty() {
                tracing::warn!(
                    target: "semstore::storage",
                    section = name,
                    discarded = discarded.len(),
                    "discarding deferred actions after rollback"
                );
            }
            durable
        };
        if let Err(e) = Self::run_all(durable) {
            tracing::warn!(
                target: "semstore::storage",
                section = name,
                error = %e,
                "deferred action failed after rollback"
            );
        }
    }

    /// Runs `action` now when no section is open, otherwise queues it. A
    /// rollback of the outermost section drops the queued action.
    ///
    /// # Errors
    /// Propagates the action's error when it runs immediately.
    pub fn on_idle<F>(&self, label: &'static str, action: F) -> StoreResult<Deferral>
    where
        F: FnOnce() -> StoreResult<()> + Send + 'static,
    {
        self.defer(label, Box::new(action), false)
    }

    /// Like [`TransactionContext::on_idle`], but the queued action also runs
    /// when the outermost section is rolled back. For bookkeeping of writes
    /// that already reached the connection.
    ///
    /// # Errors
    /// Propagates the action's error when it runs immediately.
    pub fn on_idle_or_rollback<F>(&self, label: &'static str, action: F) -> StoreResult<Deferral>
    where
        F: FnOnce() -> StoreResult<()> + Send + 'static,
    {
        self.defer(label, Box::new(action), true)
    }

    fn defer(&self, label: &'static str, action: DeferredFn, durable: bool) -> StoreResult<Deferral> {
        {
            let mut state = self.state.lock();
            if !state.sections.is_empty() {
                state.deferred.push(DeferredAction { label, action, durable });
                return Ok(Deferral::Deferred);
            }
        }
        action()?;
        Ok(Deferral::RanNow)
    }

    /// Returns true when no section is open.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.lock().sections.is_empty()
    }

    /// Number of queued actions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().deferred.len()
    }

    fn close(state: &mut TxState, name: &str) -> StoreResult<()> {
        let Some(pos) = state.sections.iter().rposition(|s| s == name) else {
            return Err(StoreError::internal(format!(
                "transaction section '{name}' is not open"
            )));
        };
        state.sections.remove(pos);
        Ok(())
    }

    fn run_all(pending: Vec<DeferredAction>) -> StoreResult<()> {
        let mut first_err = None;
        for deferred in pending {
            tracing::trace!(target: "semstore::storage", label = deferred.label, "running deferred action");
            if let Err(e) = (deferred.action)() {
                tracing::warn!(
                    target: "semstore::storage",
                    label = deferred.label,
                    error = %e,
                    "deferred action failed"
                );
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_runs_immediately_when_idle() {
        let tx = TransactionContext::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let deferral = tx
            .on_idle("count", move || {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(deferral, Deferral::RanNow);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_defers_until_outermost_section_ends() {
        let tx = TransactionContext::new();
        let hits = Arc::new(AtomicUsize::new(0));

        tx.begin_section("outer");
        tx.begin_section("inner");
        let h = Arc::clone(&hits);
        let deferral = tx
            .on_idle("count", move || {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        assert_eq!(deferral, Deferral::Deferred);

        tx.end_section("inner").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!tx.is_idle());

        tx.end_section("outer").unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(tx.is_idle());
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn test_rollback_discards_deferred() {
        let tx = TransactionContext::new();
        let hits = Arc::new(AtomicUsize::new(0));
        tx.begin_section("outer");
        let h = Arc::clone(&hits);
        tx.on_idle("count", move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        tx.rollback_section("outer");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn test_rollback_runs_durable_actions() {
        let tx = TransactionContext::new();
        let hits = Arc::new(AtomicUsize::new(0));
        tx.begin_section("outer");
        tx.begin_section("inner");
        let h = Arc::clone(&hits);
        tx.on_idle_or_rollback("durable", move || {
            h.fetch_add(10, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let h = Arc::clone(&hits);
        tx.on_idle("dropped", move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        tx.rollback_section("inner");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tx.rollback_section("outer");
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(tx.pending(), 0);
    }

    #[test]
    fn test_unknown_section_is_an_error() {
        let tx = TransactionContext::new();
        assert!(tx.end_section("never-opened").is_err());
    }

    #[test]
    fn test_first_error_is_reported_after_all_actions_run() {
        let tx = TransactionContext::new();
        let hits = Arc::new(AtomicUsize::new(0));
        tx.begin_section("s");
        tx.on_idle("fail", || Err(StoreError::internal("boom"))).unwrap();
        let h = Arc::clone(&hits);
        tx.on_idle("count", move || {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        let err = tx.end_section("s").unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// weft - Diagnostics
// Pluggable observability sink and recoverable-fault reporting
// ============================================================================
//
// Neither hook is required for correctness. When no sink is installed every
// notification is a no-op; when no fault reporter is installed faults go to
// the `tracing` error level. Reporters must not panic and must not block.
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::core::types::DynObservable;

// =============================================================================
// DIAGNOSTIC SINK
// =============================================================================

/// Observer of graph-internal events, for debuggers and loggers.
///
/// All methods have empty default bodies; implement only what you need.
pub trait DiagnosticSink {
    /// A node joined the graph.
    fn node_created(&self, _node: &dyn DynObservable) {}

    /// A value node stored a new value. `did_change` is false when an update
    /// was recomputed but gated off by the equality comparator.
    fn value_updated(&self, _node: &dyn DynObservable, _did_change: bool) {}

    /// A transaction was opened.
    fn transaction_begun(&self, _name: Option<&str>) {}

    /// A transaction finished and all deferred notifications were delivered.
    fn transaction_finished(&self, _name: Option<&str>) {}

    /// A node's observer count changed.
    fn observer_count_changed(&self, _node: &dyn DynObservable, _count: usize) {}
}

thread_local! {
    static SINK: RefCell<Option<Rc<dyn DiagnosticSink>>> = const { RefCell::new(None) };
    static FAULT_REPORTER: RefCell<Option<Rc<dyn Fn(&GraphFault)>>> = const { RefCell::new(None) };
}

/// Install (or clear) the diagnostic sink for the current thread.
pub fn set_diagnostic_sink(sink: Option<Rc<dyn DiagnosticSink>>) {
    SINK.with(|slot| *slot.borrow_mut() = sink);
}

/// Invoke the installed sink, if any.
///
/// The sink is cloned out of the registry before the call so that a sink may
/// itself touch the graph (and thereby re-enter diagnostics) without
/// conflicting borrows.
pub(crate) fn emit(f: impl FnOnce(&dyn DiagnosticSink)) {
    let sink = SINK.with(|slot| slot.borrow().clone());
    if let Some(sink) = sink {
        f(&*sink);
    }
}

/// A sink that forwards every event to `tracing` at trace level.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn node_created(&self, node: &dyn DynObservable) {
        tracing::trace!(node = %node.debug_name(), "observable created");
    }

    fn value_updated(&self, node: &dyn DynObservable, did_change: bool) {
        tracing::trace!(node = %node.debug_name(), did_change, "observable updated");
    }

    fn transaction_begun(&self, name: Option<&str>) {
        tracing::trace!(name = name.unwrap_or("<unnamed>"), "transaction begun");
    }

    fn transaction_finished(&self, name: Option<&str>) {
        tracing::trace!(name = name.unwrap_or("<unnamed>"), "transaction finished");
    }

    fn observer_count_changed(&self, node: &dyn DynObservable, count: usize) {
        tracing::trace!(node = %node.debug_name(), count, "observer count changed");
    }
}

// =============================================================================
// FAULT REPORTING
// =============================================================================

/// A bug-indicating condition the graph recovered from.
///
/// These are reported, never thrown: the coordinator favors carrying the
/// requested update through over crashing or silently dropping it.
#[derive(Debug, Error)]
pub enum GraphFault {
    /// `update_observer` was called on a finished transaction. Typically a
    /// mutation issued from a detached asynchronous continuation without
    /// re-establishing a transaction. The update is replayed in a fresh
    /// transaction.
    #[error("transaction already finished; update carried out in a fresh transaction")]
    TransactionAlreadyFinished,

    /// `finish()` was called more than once on the same transaction.
    #[error("transaction finish() called more than once")]
    TransactionFinishedTwice,

    /// An observer received more `end_update` calls than `begin_update`
    /// calls. The counter is clamped back to zero.
    #[error("unbalanced end_update on `{node}`")]
    UnbalancedEndUpdate { node: String },
}

/// Install (or clear) the fault reporter for the current thread.
///
/// The reporter must not panic and must not block.
pub fn set_fault_reporter(reporter: Option<Rc<dyn Fn(&GraphFault)>>) {
    FAULT_REPORTER.with(|slot| *slot.borrow_mut() = reporter);
}

/// Report a recovered fault to the installed reporter, or to `tracing` when
/// none is installed.
pub fn report_fault(fault: GraphFault) {
    let reporter = FAULT_REPORTER.with(|slot| slot.borrow().clone());
    match reporter {
        Some(reporter) => reporter(&fault),
        None => tracing::error!(fault = %fault, "recovered from a bug-indicating graph fault"),
    }
}

// =============================================================================
// TESTS
// =============================================================================

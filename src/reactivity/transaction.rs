// ============================================================================
// weft - Transaction Coordinator
// The two-phase (begin/end) notification protocol
// ============================================================================
//
// A transaction accumulates (observer, observable) pairs while open. Each
// registration immediately delivers begin_update; every end_update is
// deferred until finish(), delivered in registration order. An observer
// touched by several mutations inside one transaction therefore sees all
// begin_updates before any end_update and can wait for every input to
// stabilize before reacting.
//
// finish() runs exactly once on every exit path: the explicit call in
// transaction() covers the normal path, Drop covers panics (the guard
// pattern used throughout this crate).
// ============================================================================

use std::cell::RefCell;
use std::rc::Rc;

use crate::core::types::{DynObservable, Observer};
use crate::shared::diagnostics::{self, report_fault, GraphFault};

type UpdatingPairs = Vec<(Rc<dyn Observer>, Rc<dyn DynObservable>)>;

// =============================================================================
// TRANSACTION
// =============================================================================

/// A batch boundary for one or more observable mutations.
pub struct Transaction {
    debug_name: Option<String>,
    /// `Some` while open; `None` once finished. Pairs are processed in
    /// registration order.
    updating: RefCell<Option<UpdatingPairs>>,
}

impl Transaction {
    pub fn new(debug_name: Option<String>) -> Self {
        diagnostics::emit(|sink| sink.transaction_begun(debug_name.as_deref()));
        Self {
            debug_name,
            updating: RefCell::new(Some(Vec::new())),
        }
    }

    pub fn debug_name(&self) -> Option<&str> {
        self.debug_name.as_deref()
    }

    /// Register an (observer, observable) pair and deliver `begin_update`.
    ///
    /// Calling this on a finished transaction indicates a bug (typically a
    /// mutation issued from a detached asynchronous continuation). It is not
    /// fatal: the fault is reported and the update is carried through a
    /// fresh transaction so the mutation is never dropped.
    pub fn update_observer(&self, observer: Rc<dyn Observer>, observable: Rc<dyn DynObservable>) {
        let open = {
            let mut slot = self.updating.borrow_mut();
            match slot.as_mut() {
                Some(pairs) => {
                    // Pairs registered while finish() is running are still
                    // processed by its index walk.
                    pairs.push((observer.clone(), observable.clone()));
                    true
                }
                None => false,
            }
        };

        if open {
            observer.begin_update(&*observable);
        } else {
            report_fault(GraphFault::TransactionAlreadyFinished);
            transaction(|tx| tx.update_observer(observer, observable));
        }
    }

    /// Deliver every deferred `end_update` in registration order, then seal
    /// the transaction.
    pub fn finish(&self) {
        if self.updating.borrow().is_none() {
            report_fault(GraphFault::TransactionFinishedTwice);
            return;
        }

        // Walk by index rather than draining: an end_update may register
        // further pairs on this transaction, and those must be processed too.
        let mut index = 0;
        loop {
            let next = {
                let slot = self.updating.borrow();
                slot.as_ref().and_then(|pairs| pairs.get(index).cloned())
            };
            let Some((observer, observable)) = next else {
                break;
            };
            observer.end_update(&*observable);
            index += 1;
        }

        *self.updating.borrow_mut() = None;
        diagnostics::emit(|sink| sink.transaction_finished(self.debug_name.as_deref()));
    }

    pub fn is_finished(&self) -> bool {
        self.updating.borrow().is_none()
    }

    #[cfg(test)]
    pub(crate) fn pending_pairs(&self) -> usize {
        self.updating.borrow().as_ref().map_or(0, |pairs| pairs.len())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.is_finished() {
            self.finish();
        }
    }
}

// =============================================================================
// SCOPED HELPERS
// =============================================================================

/// Run `f` inside a transaction that is finished when `f` returns (or
/// unwinds).
///
/// # Example
///
/// ```
/// use weft::{observable_value, transaction};
///
/// let a = observable_value(1);
/// let b = observable_value(2);
///
/// transaction(|tx| {
///     a.set(10, Some(tx));
///     b.set(20, Some(tx));
/// });
/// ```
pub fn transaction<R>(f: impl FnOnce(&Transaction) -> R) -> R {
    let tx = Transaction::new(None);
    let result = f(&tx);
    tx.finish();
    result
}

/// Like [`transaction`], with a name reported to the diagnostic sink.
pub fn transaction_named<R>(name: impl Into<String>, f: impl FnOnce(&Transaction) -> R) -> R {
    let tx = Transaction::new(Some(name.into()));
    let result = f(&tx);
    tx.finish();
    result
}

/// Chain onto an existing transaction, or open a fresh one.
///
/// This is the explicit coalescing mechanism: callers that want independent
/// updates batched together thread an optional `&Transaction` through the
/// call chain instead of relying on ambient global state.
pub fn subtransaction<R>(tx: Option<&Transaction>, f: impl FnOnce(&Transaction) -> R) -> R {
    match tx {
        Some(tx) => f(tx),
        None => transaction(f),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NodeId;
    use std::any::Any;
    use std::cell::{Cell, RefCell};

    struct ProbeNode {
        id: NodeId,
    }

    impl ProbeNode {
        fn new() -> Rc<Self> {
            Rc::new(Self { id: NodeId::next() })
        }
    }

    impl DynObservable for ProbeNode {
        fn node_id(&self) -> NodeId {
            self.id
        }
        fn debug_name(&self) -> String {
            "probe".into()
        }
        fn add_observer(&self, _observer: Rc<dyn Observer>) {}
        fn remove_observer(&self, _observer: &Rc<dyn Observer>) {}
        fn report_changes(&self) {}
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct ProbeObserver {
        label: &'static str,
        log: Rc<RefCell<Vec<String>>>,
        begins: Cell<u32>,
        ends: Cell<u32>,
    }

    impl ProbeObserver {
        fn new(label: &'static str, log: Rc<RefCell<Vec<String>>>) -> Rc<Self> {
            Rc::new(Self {
                label,
                log,
                ..Default::default()
            })
        }
    }

    impl Observer for ProbeObserver {
        fn begin_update(&self, _observable: &dyn DynObservable) {
            self.begins.set(self.begins.get() + 1);
            self.log.borrow_mut().push(format!("begin {}", self.label));
        }
        fn end_update(&self, _observable: &dyn DynObservable) {
            self.ends.set(self.ends.get() + 1);
            self.log.borrow_mut().push(format!("end {}", self.label));
        }
        fn handle_possible_change(&self, _observable: &dyn DynObservable) {}
        fn handle_change(&self, _observable: &dyn DynObservable, _change: Option<&dyn Any>) {}
    }

    #[test]
    fn begins_are_immediate_ends_are_deferred_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = ProbeObserver::new("a", log.clone());
        let b = ProbeObserver::new("b", log.clone());
        let node = ProbeNode::new();

        transaction(|tx| {
            tx.update_observer(a.clone(), node.clone());
            tx.update_observer(b.clone(), node.clone());
            assert_eq!(*log.borrow(), vec!["begin a", "begin b"]);
        });

        assert_eq!(
            *log.borrow(),
            vec!["begin a", "begin b", "end a", "end b"]
        );
        assert_eq!(a.begins.get(), a.ends.get());
        assert_eq!(b.begins.get(), b.ends.get());
    }

    #[test]
    fn observer_touched_twice_gets_balanced_calls() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = ProbeObserver::new("a", log.clone());
        let node = ProbeNode::new();

        transaction(|tx| {
            tx.update_observer(a.clone(), node.clone());
            tx.update_observer(a.clone(), node.clone());
        });

        assert_eq!(a.begins.get(), 2);
        assert_eq!(a.ends.get(), 2);
        assert_eq!(
            *log.borrow(),
            vec!["begin a", "begin a", "end a", "end a"]
        );
    }

    #[test]
    fn update_after_finish_recovers_through_fresh_transaction() {
        let faults = Rc::new(Cell::new(0));
        let faults_clone = faults.clone();
        diagnostics::set_fault_reporter(Some(Rc::new(move |_fault| {
            faults_clone.set(faults_clone.get() + 1)
        })));

        let log = Rc::new(RefCell::new(Vec::new()));
        let a = ProbeObserver::new("a", log.clone());
        let node = ProbeNode::new();

        let tx = Transaction::new(None);
        tx.finish();

        // The mutation is not dropped: it runs inside a recovery transaction.
        tx.update_observer(a.clone(), node.clone());

        assert_eq!(faults.get(), 1);
        assert_eq!(a.begins.get(), 1);
        assert_eq!(a.ends.get(), 1);

        diagnostics::set_fault_reporter(None);
    }

    #[test]
    fn double_finish_is_reported_not_fatal() {
        let faults = Rc::new(Cell::new(0));
        let faults_clone = faults.clone();
        diagnostics::set_fault_reporter(Some(Rc::new(move |_fault| {
            faults_clone.set(faults_clone.get() + 1)
        })));

        let tx = Transaction::new(None);
        tx.finish();
        tx.finish();
        assert_eq!(faults.get(), 1);

        diagnostics::set_fault_reporter(None);
    }

    #[test]
    fn drop_finishes_unfinished_transaction() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = ProbeObserver::new("a", log.clone());
        let node = ProbeNode::new();

        {
            let tx = Transaction::new(None);
            tx.update_observer(a.clone(), node.clone());
            // No explicit finish; Drop must deliver the end_update.
        }

        assert_eq!(a.ends.get(), 1);
    }

    #[test]
    fn pairs_added_during_finish_are_processed() {
        // An observer whose end_update registers one more pair on the same
        // transaction, as a recompute triggered mid-finish would.
        struct Chaining {
            tx: RefCell<Option<Rc<Transaction>>>,
            node: Rc<ProbeNode>,
            tail: Rc<ProbeObserver>,
        }

        impl Observer for Chaining {
            fn begin_update(&self, _observable: &dyn DynObservable) {}
            fn end_update(&self, _observable: &dyn DynObservable) {
                let tx = self.tx.borrow_mut().take();
                if let Some(tx) = tx {
                    tx.update_observer(self.tail.clone(), self.node.clone());
                }
            }
            fn handle_possible_change(&self, _observable: &dyn DynObservable) {}
            fn handle_change(&self, _observable: &dyn DynObservable, _change: Option<&dyn Any>) {}
        }

        let log = Rc::new(RefCell::new(Vec::new()));
        let tail = ProbeObserver::new("tail", log.clone());
        let node = ProbeNode::new();
        let tx = Rc::new(Transaction::new(None));
        let chaining = Rc::new(Chaining {
            tx: RefCell::new(Some(tx.clone())),
            node: node.clone(),
            tail: tail.clone(),
        });

        tx.update_observer(chaining.clone(), node.clone());
        assert_eq!(tx.pending_pairs(), 1);
        tx.finish();

        assert_eq!(tail.begins.get(), 1);
        assert_eq!(tail.ends.get(), 1);
    }

    #[test]
    fn subtransaction_reuses_open_transaction() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = ProbeObserver::new("a", log.clone());
        let node = ProbeNode::new();

        transaction(|tx| {
            subtransaction(Some(tx), |inner| {
                inner.update_observer(a.clone(), node.clone());
            });
            // Still deferred: the outer transaction owns the finish.
            assert_eq!(a.ends.get(), 0);
        });
        assert_eq!(a.ends.get(), 1);

        // Without an outer transaction a fresh one is opened and finished.
        subtransaction(None, |inner| {
            inner.update_observer(a.clone(), node.clone());
        });
        assert_eq!(a.ends.get(), 2);
    }
}

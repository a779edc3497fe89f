// ============================================================================
// weft - Autorun
// Eagerly recomputed reactions over the observable graph
// ============================================================================
//
// An autorun is the subscription-driven counterpart of a derived: it runs
// its function once on creation and again, synchronously, after every
// finished transaction in which a tracked dependency changed. Like a
// derived it rebuilds its dependency set on every run and defers while any
// dependency is mid-update, so a run always sees a consistent graph.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::core::types::{DynObservable, NodeId, Observer};
use crate::reactivity::reader::{Reader, TrackingScope};
use crate::shared::diagnostics::{report_fault, GraphFault};
use crate::shared::lifecycle::Subscription;

// =============================================================================
// INNER OBSERVER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AutorunState {
    /// A dependency definitely changed (or the autorun never ran).
    Stale,
    /// A dependency began an update; staleness not yet known.
    DepsMightHaveChanged,
    UpToDate,
}

type DependencyMap = IndexMap<NodeId, Rc<dyn DynObservable>>;

struct AutorunInner {
    debug_name: Option<String>,
    state: Cell<AutorunState>,
    update_count: Cell<i32>,
    disposed: Cell<bool>,
    run_fn: RefCell<Option<Box<dyn FnMut(&Reader<'_>)>>>,
    dependencies: RefCell<DependencyMap>,
    dependencies_to_remove: RefCell<DependencyMap>,
    self_ref: RefCell<Weak<AutorunInner>>,
}

impl AutorunInner {
    fn as_observer(&self) -> Option<Rc<dyn Observer>> {
        self.self_ref
            .borrow()
            .upgrade()
            .map(|rc| rc as Rc<dyn Observer>)
    }

    fn run_if_needed(&self) {
        if self.state.get() == AutorunState::UpToDate {
            return;
        }

        {
            let mut current = self.dependencies.borrow_mut();
            let mut stale = self.dependencies_to_remove.borrow_mut();
            debug_assert!(stale.is_empty());
            std::mem::swap(&mut *current, &mut *stale);
        }

        self.state.set(AutorunState::UpToDate);
        {
            let _release = ReleaseStaleDeps { inner: self };
            if !self.disposed.get() {
                let mut run_fn = self.run_fn.borrow_mut();
                if let Some(run_fn) = run_fn.as_mut() {
                    run_fn(&Reader::new(self));
                }
            }
        }
    }

    /// Re-run until a run completes without being re-dirtied: a run that
    /// writes to its own inputs converges here instead of glitching.
    fn settle(&self) {
        loop {
            if self.state.get() == AutorunState::DepsMightHaveChanged {
                self.state.set(AutorunState::UpToDate);
                let deps: Vec<Rc<dyn DynObservable>> =
                    self.dependencies.borrow().values().cloned().collect();
                for dep in deps {
                    dep.report_changes();
                    if self.state.get() == AutorunState::Stale {
                        break;
                    }
                }
            }
            self.run_if_needed();
            if self.state.get() == AutorunState::UpToDate {
                break;
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        let deps: Vec<Rc<dyn DynObservable>> = {
            let mut current = self.dependencies.borrow_mut();
            let mut stale = self.dependencies_to_remove.borrow_mut();
            current
                .drain(..)
                .chain(stale.drain(..))
                .map(|(_, dep)| dep)
                .collect()
        };
        if let Some(observer) = self.as_observer() {
            for dep in deps {
                dep.remove_observer(&observer);
            }
        }
        // Drop the closure so captured handles are released.
        *self.run_fn.borrow_mut() = None;
    }

    fn is_tracked_dependency(&self, id: NodeId) -> bool {
        self.dependencies.borrow().contains_key(&id)
            && !self.dependencies_to_remove.borrow().contains_key(&id)
    }
}

struct ReleaseStaleDeps<'a> {
    inner: &'a AutorunInner,
}

impl<'a> Drop for ReleaseStaleDeps<'a> {
    fn drop(&mut self) {
        let Some(observer) = self.inner.as_observer() else {
            return;
        };
        let stale: Vec<Rc<dyn DynObservable>> = self
            .inner
            .dependencies_to_remove
            .borrow_mut()
            .drain(..)
            .map(|(_, dep)| dep)
            .collect();
        for dep in stale {
            dep.remove_observer(&observer);
        }
    }
}

impl TrackingScope for AutorunInner {
    fn subscribe_to(&self, observable: &Rc<dyn DynObservable>) {
        if self.disposed.get() {
            return;
        }
        if let Some(observer) = self.as_observer() {
            observable.add_observer(observer);
        }
    }

    fn record_dependency(&self, observable: Rc<dyn DynObservable>) {
        if self.disposed.get() {
            return;
        }
        let id = observable.node_id();
        self.dependencies_to_remove.borrow_mut().shift_remove(&id);
        self.dependencies.borrow_mut().insert(id, observable);
    }
}

impl Observer for AutorunInner {
    fn begin_update(&self, _observable: &dyn DynObservable) {
        if self.state.get() == AutorunState::UpToDate {
            self.state.set(AutorunState::DepsMightHaveChanged);
        }
        self.update_count.set(self.update_count.get() + 1);
    }

    fn end_update(&self, _observable: &dyn DynObservable) {
        if self.update_count.get() == 1 {
            self.settle();
        }
        self.update_count.set(self.update_count.get() - 1);
        if self.update_count.get() < 0 {
            report_fault(GraphFault::UnbalancedEndUpdate {
                node: self
                    .debug_name
                    .clone()
                    .unwrap_or_else(|| "autorun".into()),
            });
            self.update_count.set(0);
        }
    }

    fn handle_possible_change(&self, observable: &dyn DynObservable) {
        if self.state.get() == AutorunState::UpToDate
            && self.is_tracked_dependency(observable.node_id())
        {
            self.state.set(AutorunState::DepsMightHaveChanged);
        }
    }

    fn handle_change(&self, observable: &dyn DynObservable, _change: Option<&dyn Any>) {
        if self.is_tracked_dependency(observable.node_id()) {
            self.state.set(AutorunState::Stale);
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// RAII handle for an autorun; dropping it (or calling
/// [`dispose`](Self::dispose)) detaches from all dependencies synchronously.
pub struct Autorun {
    inner: Rc<AutorunInner>,
}

impl Autorun {
    /// Stop re-running and detach from every tracked dependency.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Move the handle into a [`Subscription`], e.g. to store it in a
    /// [`DisposableBag`](crate::DisposableBag).
    pub fn into_subscription(self) -> Subscription {
        Subscription::new(move || drop(self))
    }
}

impl Drop for Autorun {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Run `run_fn` now and after every transaction in which a tracked
/// dependency changed.
///
/// # Example
///
/// ```
/// use weft::{autorun, observable_value, Observable};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let count = observable_value(1);
/// let seen = Rc::new(Cell::new(0));
///
/// let _run = autorun({
///     let count = count.clone();
///     let seen = seen.clone();
///     move |reader| seen.set(count.read(reader))
/// });
/// assert_eq!(seen.get(), 1);
///
/// count.set(7, None);
/// assert_eq!(seen.get(), 7);
/// ```
pub fn autorun(run_fn: impl FnMut(&Reader<'_>) + 'static) -> Autorun {
    autorun_named(None, run_fn)
}

/// Like [`autorun`], with a name reported on faults.
pub fn autorun_opts(name: impl Into<String>, run_fn: impl FnMut(&Reader<'_>) + 'static) -> Autorun {
    autorun_named(Some(name.into()), run_fn)
}

fn autorun_named(debug_name: Option<String>, run_fn: impl FnMut(&Reader<'_>) + 'static) -> Autorun {
    let inner = Rc::new(AutorunInner {
        debug_name,
        state: Cell::new(AutorunState::Stale),
        update_count: Cell::new(0),
        disposed: Cell::new(false),
        run_fn: RefCell::new(Some(Box::new(run_fn))),
        dependencies: RefCell::new(IndexMap::new()),
        dependencies_to_remove: RefCell::new(IndexMap::new()),
        self_ref: RefCell::new(Weak::new()),
    });
    *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);
    inner.run_if_needed();
    Autorun { inner }
}

// =============================================================================
// TESTS
// =============================================================================

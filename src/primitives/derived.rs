// ============================================================================
// weft - Derived Computation Engine
// Lazily computed, cached, dependency-tracked nodes
// ============================================================================
//
// A Derived is BOTH an observable (it can be read and has observers) AND an
// observer (it watches its dependencies through the two-phase protocol).
// This dual nature is what makes glitch-free propagation work: while any
// dependency is inside an update (the re-entrancy counter is non-zero), the
// derived only forwards "possible change" downstream and defers its own
// recomputation until every input has stabilized.
//
// The dependency set is rebuilt from scratch on every run: reads subscribe
// and record through the tracking Reader, and whatever was not re-read gets
// unsubscribed after the run. Dependencies may therefore change run to run.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::core::observable::Observable;
use crate::core::observers::ObserverList;
use crate::core::types::{DynObservable, NodeId, Observer};
use crate::reactivity::equality::{equals, never_equals, EqualsFn};
use crate::reactivity::reader::{Reader, TrackingScope};
use crate::shared::diagnostics::{self, report_fault, GraphFault};

// =============================================================================
// STATE MACHINE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerivedState {
    /// No cached value yet; the next read must compute.
    Initial,
    /// A dependency began an update; the cache may or may not be stale.
    DepsMightHaveChanged,
    /// A dependency definitely changed; the cache is stale.
    Stale,
    /// Cache valid.
    UpToDate,
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Construction options for [`derived_opts`].
pub struct DerivedOpts<T> {
    pub debug_name: Option<String>,
    /// Comparator gating downstream propagation; defaults to PartialEq.
    pub equals: Option<EqualsFn<T>>,
    /// Invoked on the 1→0 observer transition, after the cache and the
    /// dependency subscriptions have been released.
    pub on_last_observer_removed: Option<Box<dyn Fn()>>,
}

impl<T> Default for DerivedOpts<T> {
    fn default() -> Self {
        Self {
            debug_name: None,
            equals: None,
            on_last_observer_removed: None,
        }
    }
}

// =============================================================================
// INNER NODE
// =============================================================================

type DependencyMap = IndexMap<NodeId, Rc<dyn DynObservable>>;

pub struct DerivedInner<T> {
    id: NodeId,
    debug_name: Option<String>,
    state: Cell<DerivedState>,
    value: RefCell<Option<T>>,
    /// In-flight begin_updates from dependencies.
    update_count: Cell<i32>,
    compute: Box<dyn Fn(&Reader<'_>) -> T>,
    equals: EqualsFn<T>,
    observers: ObserverList,
    /// Dependencies recorded by the current/last run.
    dependencies: RefCell<DependencyMap>,
    /// Previous run's dependencies, pending unsubscription while a run is
    /// in progress. Kept subscribed during the run so they never see a
    /// spurious 1→0→1 observer transition.
    dependencies_to_remove: RefCell<DependencyMap>,
    on_last_observer_removed: Option<Box<dyn Fn()>>,
    /// Weak self-reference for trait-object conversion.
    self_ref: RefCell<Weak<DerivedInner<T>>>,
}

impl<T: Clone + 'static> DerivedInner<T> {
    fn new(
        debug_name: Option<String>,
        on_last_observer_removed: Option<Box<dyn Fn()>>,
        compute: Box<dyn Fn(&Reader<'_>) -> T>,
        equals: EqualsFn<T>,
    ) -> Rc<Self> {
        let inner = Rc::new(Self {
            id: NodeId::next(),
            debug_name,
            state: Cell::new(DerivedState::Initial),
            value: RefCell::new(None),
            update_count: Cell::new(0),
            compute,
            equals,
            observers: ObserverList::new(),
            dependencies: RefCell::new(IndexMap::new()),
            dependencies_to_remove: RefCell::new(IndexMap::new()),
            on_last_observer_removed,
            self_ref: RefCell::new(Weak::new()),
        });
        *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);
        diagnostics::emit(|sink| sink.node_created(&*inner));
        inner
    }

    fn as_observer(&self) -> Option<Rc<dyn Observer>> {
        self.self_ref
            .borrow()
            .upgrade()
            .map(|rc| rc as Rc<dyn Observer>)
    }

    /// Resolve the current value, recomputing as needed.
    fn resolve(&self) -> T {
        if self.observers.is_empty() {
            // Nothing subscribed means no invalidation signals will arrive,
            // so a cache could go silently stale. Compute fresh and release
            // everything the run subscribed to.
            self.recompute();
            let value = self
                .value
                .borrow()
                .clone()
                .expect("derived produced a value");
            self.release_subscriptions();
            value
        } else {
            loop {
                if self.state.get() == DerivedState::DepsMightHaveChanged {
                    // A dependency began an update but we have not heard a
                    // definite change. Ask each one to settle; any of them
                    // may flip us to Stale via handle_change.
                    let deps: Vec<Rc<dyn DynObservable>> =
                        self.dependencies.borrow().values().cloned().collect();
                    for dep in deps {
                        dep.report_changes();
                        if self.state.get() == DerivedState::Stale {
                            break;
                        }
                    }
                    if self.state.get() == DerivedState::DepsMightHaveChanged {
                        self.state.set(DerivedState::UpToDate);
                    }
                }
                if self.state.get() != DerivedState::UpToDate {
                    self.recompute();
                }
                if self.state.get() == DerivedState::UpToDate {
                    break;
                }
            }
            self.value
                .borrow()
                .clone()
                .expect("derived cache valid while up to date")
        }
    }

    /// Run the computation, rebuild the dependency set, and propagate
    /// handle_change when the result differs by the comparator.
    fn recompute(&self) {
        {
            let mut current = self.dependencies.borrow_mut();
            let mut stale = self.dependencies_to_remove.borrow_mut();
            debug_assert!(stale.is_empty());
            std::mem::swap(&mut *current, &mut *stale);
        }

        let old_value = self.value.borrow().clone();
        let had_value = old_value.is_some();
        self.state.set(DerivedState::UpToDate);

        let new_value = {
            // Unsubscribes from dependencies that were not re-read, on both
            // the normal and the unwinding path.
            let _release = ReleaseStaleDeps { inner: self };
            (self.compute)(&Reader::new(self))
        };

        let did_change = match (&old_value, had_value) {
            (Some(old), true) => !(self.equals)(old, &new_value),
            _ => true,
        };
        *self.value.borrow_mut() = Some(new_value);
        diagnostics::emit(|sink| sink.value_updated(self, did_change));

        if had_value && did_change {
            for observer in self.observers.snapshot() {
                observer.handle_change(self, None);
            }
        }
    }

    /// Unsubscribe from everything and drop the cache. Runs on the 1→0
    /// observer transition and after unobserved reads.
    fn release_subscriptions(&self) {
        self.state.set(DerivedState::Initial);
        *self.value.borrow_mut() = None;

        let Some(observer) = self.as_observer() else {
            return;
        };
        let deps: Vec<Rc<dyn DynObservable>> = {
            let mut current = self.dependencies.borrow_mut();
            let mut stale = self.dependencies_to_remove.borrow_mut();
            current.drain(..).chain(stale.drain(..)).map(|(_, dep)| dep).collect()
        };
        for dep in deps {
            dep.remove_observer(&observer);
        }

        if let Some(hook) = &self.on_last_observer_removed {
            hook();
        }
    }

    fn is_tracked_dependency(&self, id: NodeId) -> bool {
        self.dependencies.borrow().contains_key(&id)
            && !self.dependencies_to_remove.borrow().contains_key(&id)
    }
}

struct ReleaseStaleDeps<'a, T: Clone + 'static> {
    inner: &'a DerivedInner<T>,
}

impl<'a, T: Clone + 'static> Drop for ReleaseStaleDeps<'a, T> {
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

// =============================================================================
// TRAIT WIRING
// =============================================================================

impl<T: Clone + 'static> TrackingScope for DerivedInner<T> {
    fn subscribe_to(&self, observable: &Rc<dyn DynObservable>) {
        if let Some(observer) = self.as_observer() {
            observable.add_observer(observer);
        }
    }

    fn record_dependency(&self, observable: Rc<dyn DynObservable>) {
        let id = observable.node_id();
        self.dependencies_to_remove.borrow_mut().shift_remove(&id);
        self.dependencies.borrow_mut().insert(id, observable);
    }
}

impl<T: Clone + 'static> DynObservable for DerivedInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn debug_name(&self) -> String {
        self.debug_name.clone().unwrap_or_else(|| "derived".into())
    }

    fn add_observer(&self, observer: Rc<dyn Observer>) {
        let outcome = self.observers.add(&observer);
        if outcome.added {
            diagnostics::emit(|sink| sink.observer_count_changed(self, self.observers.len()));
        }
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        let outcome = self.observers.remove(observer);
        if outcome.removed {
            diagnostics::emit(|sink| sink.observer_count_changed(self, self.observers.len()));
            if outcome.last {
                self.release_subscriptions();
            }
        }
    }

    fn report_changes(&self) {
        let _ = self.resolve();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: Clone + 'static> Observer for DerivedInner<T> {
    fn begin_update(&self, _observable: &dyn DynObservable) {
        self.update_count.set(self.update_count.get() + 1);
        let propagate = self.update_count.get() == 1;

        if self.state.get() == DerivedState::UpToDate {
            self.state.set(DerivedState::DepsMightHaveChanged);
            // A propagated begin_update already announces a possible change;
            // only signal explicitly when this is a nested begin.
            if !propagate {
                for observer in self.observers.snapshot() {
                    observer.handle_possible_change(self);
                }
            }
        }

        if propagate {
            for observer in self.observers.snapshot() {
                observer.begin_update(self);
            }
        }
    }

    fn end_update(&self, _observable: &dyn DynObservable) {
        self.update_count.set(self.update_count.get() - 1);
        if self.update_count.get() == 0 {
            for observer in self.observers.snapshot() {
                observer.end_update(self);
            }
        }
        if self.update_count.get() < 0 {
            report_fault(GraphFault::UnbalancedEndUpdate {
                node: self.debug_name(),
            });
            self.update_count.set(0);
        }
    }

    fn handle_possible_change(&self, observable: &dyn DynObservable) {
        if self.state.get() == DerivedState::UpToDate
            && self.is_tracked_dependency(observable.node_id())
        {
            self.state.set(DerivedState::DepsMightHaveChanged);
            for observer in self.observers.snapshot() {
                observer.handle_possible_change(self);
            }
        }
    }

    fn handle_change(&self, observable: &dyn DynObservable, _change: Option<&dyn Any>) {
        if !self.is_tracked_dependency(observable.node_id()) {
            return;
        }
        let state = self.state.get();
        let was_up_to_date = state == DerivedState::UpToDate;
        if was_up_to_date || state == DerivedState::DepsMightHaveChanged {
            self.state.set(DerivedState::Stale);
            if was_up_to_date {
                for observer in self.observers.snapshot() {
                    observer.handle_possible_change(self);
                }
            }
        }
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A node whose value is a pure function of other nodes.
///
/// Reads are pull-based and cached: the computation runs only when the
/// value is read and a tracked dependency has changed since the last run.
/// Without observers no cache is retained (nothing would invalidate it);
/// attach [`keep_observed`](crate::combinators::keep_observed) to keep the
/// cache alive without reacting to changes.
///
/// # Example
///
/// ```
/// use weft::{derived, observable_value, Observable};
///
/// let count = observable_value(2);
/// let squared = {
///     let count = count.clone();
///     derived(move |reader| {
///         let n = count.read(reader);
///         n * n
///     })
/// };
///
/// assert_eq!(squared.get(), 4);
/// count.set(3, None);
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Derived<T: Clone + 'static> {
    inner: Rc<DerivedInner<T>>,
}

impl<T: Clone + 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Handle identity: two handles are equal when they point at the same node.
impl<T: Clone + 'static> PartialEq for Derived<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> Derived<T> {
    /// Number of currently registered observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl<T: Clone + 'static> Observable<T> for Derived<T> {
    fn get(&self) -> T {
        self.inner.resolve()
    }

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.clone()
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Create a derived node with PartialEq change gating.
pub fn derived<T, F>(compute: F) -> Derived<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn(&Reader<'_>) -> T + 'static,
{
    Derived {
        inner: DerivedInner::new(None, None, Box::new(compute), equals),
    }
}

/// Create a derived node with a custom comparator. Supplying
/// [`never_equals`](crate::equality::never_equals) forces every
/// recomputation to count as a change.
pub fn derived_with_equals<T, F>(compute: F, equals: EqualsFn<T>) -> Derived<T>
where
    T: Clone + 'static,
    F: Fn(&Reader<'_>) -> T + 'static,
{
    Derived {
        inner: DerivedInner::new(None, None, Box::new(compute), equals),
    }
}

/// Create a derived node with full options. Without an explicit comparator
/// every recomputation counts as a change.
pub fn derived_opts<T, F>(opts: DerivedOpts<T>, compute: F) -> Derived<T>
where
    T: Clone + 'static,
    F: Fn(&Reader<'_>) -> T + 'static,
{
    let DerivedOpts {
        debug_name,
        equals,
        on_last_observer_removed,
    } = opts;
    Derived {
        inner: DerivedInner::new(
            debug_name,
            on_last_observer_removed,
            Box::new(compute),
            equals.unwrap_or(never_equals),
        ),
    }
}

/// Turn an observable into a pure change signal: the result propagates on
/// every source change regardless of value equality.
pub fn signal_from_observable<T, O>(source: O) -> Derived<()>
where
    T: Clone + 'static,
    O: Observable<T> + Clone + 'static,
{
    derived_with_equals(
        move |reader| {
            source.read(reader);
        },
        never_equals,
    )
}

// =============================================================================
// TESTS
// =============================================================================

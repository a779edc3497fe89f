// ============================================================================
// weft - Observable Value
// The mutable root node of the graph
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::core::observable::Observable;
use crate::core::observers::ObserverList;
use crate::core::types::{DynObservable, NodeId, Observer};
use crate::reactivity::equality::{equals, never_equals, EqualsFn};
use crate::reactivity::transaction::Transaction;
use crate::shared::diagnostics;

// =============================================================================
// INNER NODE
// =============================================================================

/// On-replace policy invoked with each displaced value before it is
/// dropped. Lets resource-owning values release themselves explicitly.
pub type OnReplaceFn<T> = Box<dyn Fn(&mut T)>;

pub struct ObservableValueInner<T> {
    id: NodeId,
    debug_name: Option<String>,
    value: RefCell<T>,
    equals: EqualsFn<T>,
    observers: ObserverList,
    on_replace: Option<OnReplaceFn<T>>,
}

impl<T: Clone + 'static> DynObservable for ObservableValueInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn debug_name(&self) -> String {
        self.debug_name
            .clone()
            .unwrap_or_else(|| "observable value".into())
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
        }
    }

    fn report_changes(&self) {
        // A value node has no deferred state to resolve.
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A mutable observable value.
///
/// Handles are cheap clones sharing one node. Setting a value the
/// comparator considers equal to the current one is a complete no-op: no
/// notification is sent and no transaction is opened.
///
/// # Example
///
/// ```
/// use weft::{observable_value, Observable};
///
/// let count = observable_value(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5, None);
/// assert_eq!(count.get(), 5);
/// ```
pub struct ObservableValue<T: Clone + 'static> {
    inner: Rc<ObservableValueInner<T>>,
}

impl<T: Clone + 'static> Clone for ObservableValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Handle identity: two handles are equal when they point at the same node.
impl<T: Clone + 'static> PartialEq for ObservableValue<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + 'static> ObservableValue<T> {
    pub fn new(initial: T) -> Self
    where
        T: PartialEq,
    {
        Self::build(None, initial, equals, None)
    }

    /// A value node with a diagnostic name.
    pub fn named(name: impl Into<String>, initial: T) -> Self
    where
        T: PartialEq,
    {
        Self::build(Some(name.into()), initial, equals, None)
    }

    /// A value node with a custom equality comparator. Supplying
    /// [`never_equals`](crate::equality::never_equals) makes every set
    /// count as a change.
    pub fn with_equals(initial: T, equals: EqualsFn<T>) -> Self {
        Self::build(None, initial, equals, None)
    }

    /// A value node for resource-owning values: `on_replace` runs on every
    /// displaced value (and on [`dispose`](Self::dispose)). Every set
    /// counts as a change, since resource handles have no meaningful
    /// equality.
    pub fn disposable_with(initial: T, on_replace: impl Fn(&mut T) + 'static) -> Self {
        Self::build(None, initial, never_equals, Some(Box::new(on_replace)))
    }

    fn build(
        debug_name: Option<String>,
        initial: T,
        equals: EqualsFn<T>,
        on_replace: Option<OnReplaceFn<T>>,
    ) -> Self {
        let inner = Rc::new(ObservableValueInner {
            id: NodeId::next(),
            debug_name,
            value: RefCell::new(initial),
            equals,
            observers: ObserverList::new(),
            on_replace,
        });
        diagnostics::emit(|sink| sink.node_created(&*inner));
        Self { inner }
    }

    /// Set the value.
    ///
    /// With `tx` given, notifications join that transaction; otherwise an
    /// implicit single-operation transaction is opened and finished by this
    /// call.
    pub fn set(&self, value: T, tx: Option<&Transaction>) {
        self.set_inner(value, tx, None);
    }

    /// Set the value with an explicit change payload delivered to
    /// `handle_change`. The equality short-circuit does not apply: an
    /// explicit payload always notifies.
    pub fn set_with_change(&self, value: T, tx: Option<&Transaction>, change: &dyn Any) {
        self.set_inner(value, tx, Some(change));
    }

    fn set_inner(&self, value: T, tx: Option<&Transaction>, change: Option<&dyn Any>) {
        if change.is_none() && (self.inner.equals)(&self.inner.value.borrow(), &value) {
            return;
        }

        match tx {
            Some(tx) => self.apply(value, tx, change),
            None => {
                let tx = Transaction::new(Some(format!("set {}", self.inner.debug_name())));
                self.apply(value, &tx, change);
                tx.finish();
            }
        }
    }

    fn apply(&self, value: T, tx: &Transaction, change: Option<&dyn Any>) {
        {
            let mut old = self.inner.value.replace(value);
            if let Some(on_replace) = &self.inner.on_replace {
                on_replace(&mut old);
            }
        }
        diagnostics::emit(|sink| sink.value_updated(&*self.inner, true));

        let node: Rc<dyn DynObservable> = self.inner.clone();
        for observer in self.inner.observers.snapshot() {
            tx.update_observer(observer.clone(), node.clone());
            observer.handle_change(&*node, change);
        }
    }

    /// Run the on-replace policy on the current value. Only meaningful for
    /// nodes built with [`disposable_with`](Self::disposable_with).
    pub fn dispose(&self) {
        if let Some(on_replace) = &self.inner.on_replace {
            on_replace(&mut self.inner.value.borrow_mut());
        }
    }

    /// Number of currently registered observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl<T: Clone + 'static> Observable<T> for ObservableValue<T> {
    fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.clone()
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableValue")
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

/// Create a mutable observable value.
pub fn observable_value<T: Clone + PartialEq + 'static>(initial: T) -> ObservableValue<T> {
    ObservableValue::new(initial)
}

// =============================================================================
// CONST OBSERVABLE
// =============================================================================

struct ConstInner<T> {
    id: NodeId,
    value: T,
}

impl<T: Clone + 'static> DynObservable for ConstInner<T> {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn debug_name(&self) -> String {
        "const".into()
    }
    fn add_observer(&self, _observer: Rc<dyn Observer>) {
        // Never changes; observers would never hear anything.
    }
    fn remove_observer(&self, _observer: &Rc<dyn Observer>) {}
    fn report_changes(&self) {}
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An observable whose value never changes. Observer registration is a
/// no-op, which makes it free to read from computations.
pub struct ConstObservable<T: Clone + 'static> {
    inner: Rc<ConstInner<T>>,
}

impl<T: Clone + 'static> Clone for ConstObservable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Observable<T> for ConstObservable<T> {
    fn get(&self) -> T {
        self.inner.value.clone()
    }

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.clone()
    }
}

/// Create an observable with a fixed value.
pub fn const_observable<T: Clone + 'static>(value: T) -> ConstObservable<T> {
    ConstObservable {
        inner: Rc::new(ConstInner {
            id: NodeId::next(),
            value,
        }),
    }
}

// =============================================================================
// OBSERVABLE SIGNAL
// =============================================================================

struct SignalInner {
    id: NodeId,
    debug_name: Option<String>,
    observers: ObserverList,
}

impl DynObservable for SignalInner {
    fn node_id(&self) -> NodeId {
        self.id
    }
    fn debug_name(&self) -> String {
        self.debug_name
            .clone()
            .unwrap_or_else(|| "observable signal".into())
    }
    fn add_observer(&self, observer: Rc<dyn Observer>) {
        self.observers.add(&observer);
    }
    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        self.observers.remove(observer);
    }
    fn report_changes(&self) {}
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A valueless node that routes explicit triggers through the two-phase
/// protocol. Reading it yields `()`; its purpose is to invalidate
/// computations that track it.
#[derive(Clone)]
pub struct ObservableSignal {
    inner: Rc<SignalInner>,
}

impl ObservableSignal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(SignalInner {
                id: NodeId::next(),
                debug_name: Some(name.into()),
                observers: ObserverList::new(),
            }),
        }
    }

    /// Notify all observers, inside `tx` or an implicit transaction.
    pub fn trigger(&self, tx: Option<&Transaction>) {
        match tx {
            None => {
                let tx = Transaction::new(Some(format!("trigger {}", self.inner.debug_name())));
                self.trigger(Some(&tx));
                tx.finish();
            }
            Some(tx) => {
                let node: Rc<dyn DynObservable> = self.inner.clone();
                for observer in self.inner.observers.snapshot() {
                    tx.update_observer(observer.clone(), node.clone());
                    observer.handle_change(&*node, None);
                }
            }
        }
    }
}

impl Observable<()> for ObservableSignal {
    fn get(&self) {}

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.clone()
    }
}

/// Create a valueless trigger node.
pub fn observable_signal(name: impl Into<String>) -> ObservableSignal {
    ObservableSignal::new(name)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingObserver {
        begins: Cell<u32>,
        ends: Cell<u32>,
        changes: Cell<u32>,
    }

    impl CountingObserver {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                begins: Cell::new(0),
                ends: Cell::new(0),
                changes: Cell::new(0),
            })
        }
    }

    impl Observer for CountingObserver {
        fn begin_update(&self, _observable: &dyn DynObservable) {
            self.begins.set(self.begins.get() + 1);
        }
        fn end_update(&self, _observable: &dyn DynObservable) {
            self.ends.set(self.ends.get() + 1);
        }
        fn handle_possible_change(&self, _observable: &dyn DynObservable) {}
        fn handle_change(&self, _observable: &dyn DynObservable, _change: Option<&dyn Any>) {
            self.changes.set(self.changes.get() + 1);
        }
    }

    #[test]
    fn get_and_set() {
        let value = observable_value(1);
        assert_eq!(value.get(), 1);
        value.set(2, None);
        assert_eq!(value.get(), 2);
    }

    #[test]
    fn equal_set_is_a_complete_noop() {
        let value = observable_value(42);
        let observer = CountingObserver::new();
        value.as_dyn().add_observer(observer.clone());

        value.set(42, None);

        assert_eq!(observer.begins.get(), 0);
        assert_eq!(observer.ends.get(), 0);
        assert_eq!(observer.changes.get(), 0);
    }

    #[test]
    fn changed_set_notifies_with_balanced_updates() {
        let value = observable_value(1);
        let observer = CountingObserver::new();
        value.as_dyn().add_observer(observer.clone());

        value.set(2, None);

        assert_eq!(observer.begins.get(), 1);
        assert_eq!(observer.ends.get(), 1);
        assert_eq!(observer.changes.get(), 1);
    }

    #[test]
    fn explicit_change_payload_bypasses_equality() {
        let value = observable_value(7);
        let observer = CountingObserver::new();
        value.as_dyn().add_observer(observer.clone());

        // Same value, but an explicit delta is attached.
        value.set_with_change(7, None, &"delta");
        assert_eq!(observer.changes.get(), 1);
    }

    #[test]
    fn never_equals_always_notifies() {
        let value = ObservableValue::with_equals(1, never_equals);
        let observer = CountingObserver::new();
        value.as_dyn().add_observer(observer.clone());

        value.set(1, None);
        value.set(1, None);
        assert_eq!(observer.changes.get(), 2);
    }

    #[test]
    fn cloned_handles_share_the_node() {
        let a = observable_value(1);
        let b = a.clone();
        a.set(9, None);
        assert_eq!(b.get(), 9);
        assert!(a == b);
    }

    #[test]
    fn on_replace_runs_for_each_displaced_value() {
        let disposed: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let disposed_clone = disposed.clone();
        let value = ObservableValue::disposable_with(1, move |old: &mut i32| {
            disposed_clone.borrow_mut().push(*old);
        });

        value.set(2, None);
        value.set(3, None);
        assert_eq!(*disposed.borrow(), vec![1, 2]);

        value.dispose();
        assert_eq!(*disposed.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn const_observable_ignores_observers() {
        let constant = const_observable("fixed");
        let observer = CountingObserver::new();
        constant.as_dyn().add_observer(observer.clone());
        assert_eq!(constant.get(), "fixed");
        constant.as_dyn().remove_observer(&(observer as Rc<dyn Observer>));
    }

    #[test]
    fn signal_trigger_notifies_observers() {
        let signal = observable_signal("tick");
        let observer = CountingObserver::new();
        signal.as_dyn().add_observer(observer.clone());

        signal.trigger(None);
        assert_eq!(observer.changes.get(), 1);
        assert_eq!(observer.begins.get(), observer.ends.get());
    }
}

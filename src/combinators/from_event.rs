// ============================================================================
// weft - Event Bridge
// Wrapping external subscribe/unsubscribe sources as observables
// ============================================================================
//
// Anything exposing "subscribe(listener) -> Subscription" satisfies the
// external contract. The bridge subscribes exactly on its own 0→1 observer
// transition and unsubscribes on 1→0, recomputes a projected value per raw
// event, gates propagation through the equality comparator, and publishes
// inside its own per-event transaction.
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::core::observable::Observable;
use crate::core::observers::ObserverList;
use crate::core::types::{DynObservable, NodeId, Observer};
use crate::reactivity::equality::{equals, EqualsFn};
use crate::reactivity::transaction::transaction_named;
use crate::shared::diagnostics;
use crate::shared::lifecycle::Subscription;

// =============================================================================
// EVENT SOURCE CONTRACT
// =============================================================================

/// An external push source of `A` payloads.
pub trait EventSource<A> {
    /// Register a listener; dispose the returned subscription to detach.
    fn subscribe(&self, listener: Rc<dyn Fn(&A)>) -> Subscription;
}

/// An event source defined by a closure, for bridging ad-hoc sources.
pub struct CallbackSource<A> {
    subscribe_fn: Box<dyn Fn(Rc<dyn Fn(&A)>) -> Subscription>,
}

impl<A> CallbackSource<A> {
    pub fn new(subscribe_fn: impl Fn(Rc<dyn Fn(&A)>) -> Subscription + 'static) -> Self {
        Self {
            subscribe_fn: Box::new(subscribe_fn),
        }
    }
}

impl<A> EventSource<A> for CallbackSource<A> {
    fn subscribe(&self, listener: Rc<dyn Fn(&A)>) -> Subscription {
        (self.subscribe_fn)(listener)
    }
}

// =============================================================================
// EMITTER
// =============================================================================

struct EmitterInner<A> {
    next_id: std::cell::Cell<u64>,
    listeners: RefCell<Vec<(u64, Rc<dyn Fn(&A)>)>>,
}

/// An in-process event source: `fire` delivers a payload to every current
/// listener.
pub struct Emitter<A: 'static> {
    inner: Rc<EmitterInner<A>>,
}

impl<A: 'static> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: 'static> Emitter<A> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(EmitterInner {
                next_id: std::cell::Cell::new(0),
                listeners: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn fire(&self, payload: &A) {
        // Snapshot first: a listener may subscribe or unsubscribe mid-fire.
        let listeners: Vec<Rc<dyn Fn(&A)>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(payload);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }
}

impl<A: 'static> Default for Emitter<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> EventSource<A> for Emitter<A> {
    fn subscribe(&self, listener: Rc<dyn Fn(&A)>) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.listeners.borrow_mut().push((id, listener));

        let inner = self.inner.clone();
        Subscription::new(move || {
            inner
                .listeners
                .borrow_mut()
                .retain(|(listener_id, _)| *listener_id != id);
        })
    }
}

// =============================================================================
// FROM-EVENT OBSERVABLE
// =============================================================================

struct FromEventInner<A: 'static, T: Clone + 'static> {
    id: NodeId,
    debug_name: Option<String>,
    source: Box<dyn EventSource<A>>,
    /// Projects an event payload (None on demand-reads) to a value.
    get_value: Box<dyn Fn(Option<&A>) -> T>,
    equals: EqualsFn<T>,
    value: RefCell<Option<T>>,
    subscription: RefCell<Option<Subscription>>,
    observers: ObserverList,
    self_ref: RefCell<Weak<FromEventInner<A, T>>>,
}

impl<A: 'static, T: Clone + 'static> FromEventInner<A, T> {
    fn handle_event(&self, payload: Option<&A>) {
        let new_value = (self.get_value)(payload);
        let (had_value, did_change) = {
            let value = self.value.borrow();
            match value.as_ref() {
                Some(old) => (true, !(self.equals)(old, &new_value)),
                None => (false, true),
            }
        };

        if !did_change {
            return;
        }
        *self.value.borrow_mut() = Some(new_value);
        diagnostics::emit(|sink| sink.value_updated(self, true));

        if had_value {
            // Each raw event publishes in its own transaction; coalescing
            // across sources is the caller's business (subtransaction).
            let Some(this) = self.self_ref.borrow().upgrade() else {
                return;
            };
            transaction_named(self.debug_name(), |tx| {
                let node: Rc<dyn DynObservable> = this.clone();
                for observer in self.observers.snapshot() {
                    tx.update_observer(observer.clone(), node.clone());
                    observer.handle_change(&*node, None);
                }
            });
        }
    }

    fn current(&self) -> T {
        if self.subscription.borrow().is_some() {
            if self.value.borrow().is_none() {
                self.handle_event(None);
            }
            self.value
                .borrow()
                .clone()
                .expect("event observable caches while subscribed")
        } else {
            // Unsubscribed: no cache, since nothing keeps it current.
            (self.get_value)(None)
        }
    }

    fn attach(&self) {
        let weak = self.self_ref.borrow().clone();
        let listener: Rc<dyn Fn(&A)> = Rc::new(move |payload| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(Some(payload));
            }
        });
        *self.subscription.borrow_mut() = Some(self.source.subscribe(listener));
    }

    fn detach(&self) {
        if let Some(subscription) = self.subscription.borrow_mut().take() {
            subscription.dispose();
        }
        *self.value.borrow_mut() = None;
    }
}

impl<A: 'static, T: Clone + 'static> DynObservable for FromEventInner<A, T> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn debug_name(&self) -> String {
        self.debug_name
            .clone()
            .unwrap_or_else(|| "from event".into())
    }

    fn add_observer(&self, observer: Rc<dyn Observer>) {
        let outcome = self.observers.add(&observer);
        if outcome.added {
            diagnostics::emit(|sink| sink.observer_count_changed(self, self.observers.len()));
            if outcome.first {
                self.attach();
            }
        }
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        let outcome = self.observers.remove(observer);
        if outcome.removed {
            diagnostics::emit(|sink| sink.observer_count_changed(self, self.observers.len()));
            if outcome.last {
                self.detach();
            }
        }
    }

    fn report_changes(&self) {
        if self.subscription.borrow().is_some() && self.value.borrow().is_none() {
            self.handle_event(None);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Observable view over an external event source.
pub struct FromEventObservable<A: 'static, T: Clone + 'static> {
    inner: Rc<FromEventInner<A, T>>,
}

impl<A: 'static, T: Clone + 'static> Clone for FromEventObservable<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: 'static, T: Clone + 'static> Observable<T> for FromEventObservable<A, T> {
    fn get(&self) -> T {
        self.inner.current()
    }

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.clone()
    }
}

impl<A: 'static, T: Clone + 'static> FromEventObservable<A, T> {
    /// Whether the bridge currently holds its external subscription.
    pub fn is_attached(&self) -> bool {
        self.inner.subscription.borrow().is_some()
    }
}

/// Bridge an external event source into the graph.
///
/// `get_value` projects the latest payload to the observable's value; it is
/// called with `None` for demand-reads that happen without a payload (no
/// subscriber yet, or first read after attach).
///
/// # Example
///
/// ```
/// use weft::{autorun, observable_from_event, Emitter, Observable};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let emitter: Emitter<i32> = Emitter::new();
/// let latest = observable_from_event(emitter.clone(), |payload| payload.copied().unwrap_or(0));
///
/// let seen = Rc::new(Cell::new(0));
/// let _run = autorun({
///     let latest = latest.clone();
///     let seen = seen.clone();
///     move |reader| seen.set(latest.read(reader))
/// });
///
/// emitter.fire(&7);
/// assert_eq!(seen.get(), 7);
/// ```
pub fn observable_from_event<A, T>(
    source: impl EventSource<A> + 'static,
    get_value: impl Fn(Option<&A>) -> T + 'static,
) -> FromEventObservable<A, T>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
{
    observable_from_event_opts(None, source, get_value, equals)
}

/// [`observable_from_event`] with a name and a custom comparator.
pub fn observable_from_event_opts<A, T>(
    debug_name: Option<String>,
    source: impl EventSource<A> + 'static,
    get_value: impl Fn(Option<&A>) -> T + 'static,
    equals: EqualsFn<T>,
) -> FromEventObservable<A, T>
where
    A: 'static,
    T: Clone + 'static,
{
    let inner = Rc::new(FromEventInner {
        id: NodeId::next(),
        debug_name,
        source: Box::new(source),
        get_value: Box::new(get_value),
        equals,
        value: RefCell::new(None),
        subscription: RefCell::new(None),
        observers: ObserverList::new(),
        self_ref: RefCell::new(Weak::new()),
    });
    *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);
    diagnostics::emit(|sink| sink.node_created(&*inner));
    FromEventObservable { inner }
}

// =============================================================================
// EVENT SIGNAL
// =============================================================================

struct EventSignalInner<A: 'static> {
    id: NodeId,
    debug_name: String,
    source: Box<dyn EventSource<A>>,
    subscription: RefCell<Option<Subscription>>,
    observers: ObserverList,
    self_ref: RefCell<Weak<EventSignalInner<A>>>,
}

impl<A: 'static> EventSignalInner<A> {
    fn handle_event(&self) {
        let Some(this) = self.self_ref.borrow().upgrade() else {
            return;
        };
        transaction_named(self.debug_name.clone(), |tx| {
            let node: Rc<dyn DynObservable> = this.clone();
            for observer in self.observers.snapshot() {
                tx.update_observer(observer.clone(), node.clone());
                observer.handle_change(&*node, None);
            }
        });
    }
}

impl<A: 'static> DynObservable for EventSignalInner<A> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn debug_name(&self) -> String {
        self.debug_name.clone()
    }

    fn add_observer(&self, observer: Rc<dyn Observer>) {
        let outcome = self.observers.add(&observer);
        if outcome.first {
            let weak = self.self_ref.borrow().clone();
            let listener: Rc<dyn Fn(&A)> = Rc::new(move |_payload| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_event();
                }
            });
            *self.subscription.borrow_mut() = Some(self.source.subscribe(listener));
        }
    }

    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        let outcome = self.observers.remove(observer);
        if outcome.last {
            if let Some(subscription) = self.subscription.borrow_mut().take() {
                subscription.dispose();
            }
        }
    }

    fn report_changes(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A valueless observable that fires once per raw event while observed.
pub struct EventSignal<A: 'static> {
    inner: Rc<EventSignalInner<A>>,
}

impl<A: 'static> Clone for EventSignal<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: 'static> Observable<()> for EventSignal<A> {
    fn get(&self) {}

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.clone()
    }
}

/// Bridge an external event source as a pure change signal.
pub fn observable_signal_from_event<A: 'static>(
    name: impl Into<String>,
    source: impl EventSource<A> + 'static,
) -> EventSignal<A> {
    let inner = Rc::new(EventSignalInner {
        id: NodeId::next(),
        debug_name: name.into(),
        source: Box::new(source),
        subscription: RefCell::new(None),
        observers: ObserverList::new(),
        self_ref: RefCell::new(Weak::new()),
    });
    *inner.self_ref.borrow_mut() = Rc::downgrade(&inner);
    EventSignal { inner }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::autorun::autorun;
    use std::cell::Cell;

    #[test]
    fn emitter_delivers_to_all_listeners() {
        let emitter: Emitter<i32> = Emitter::new();
        let total = Rc::new(Cell::new(0));

        let total_a = total.clone();
        let sub_a = emitter.subscribe(Rc::new(move |n| total_a.set(total_a.get() + n)));
        let total_b = total.clone();
        let _sub_b = emitter.subscribe(Rc::new(move |n| total_b.set(total_b.get() + n)));

        emitter.fire(&5);
        assert_eq!(total.get(), 10);

        sub_a.dispose();
        emitter.fire(&1);
        assert_eq!(total.get(), 11);
        assert_eq!(emitter.listener_count(), 1);
    }

    #[test]
    fn bridge_attaches_on_first_observer_and_detaches_on_last() {
        let emitter: Emitter<()> = Emitter::new();
        let value = Rc::new(Cell::new(0));
        let value_for_get = value.clone();
        let bridged =
            observable_from_event(emitter.clone(), move |_| value_for_get.get());

        assert_eq!(emitter.listener_count(), 0);
        assert!(!bridged.is_attached());

        let run = autorun({
            let bridged = bridged.clone();
            move |reader| {
                let _ = bridged.read(reader);
            }
        });
        assert_eq!(emitter.listener_count(), 1);
        assert!(bridged.is_attached());

        drop(run);
        assert_eq!(emitter.listener_count(), 0);
        assert!(!bridged.is_attached());
    }

    #[test]
    fn events_republish_projected_values() {
        let emitter: Emitter<i32> = Emitter::new();
        let bridged = observable_from_event(emitter.clone(), |payload| {
            payload.copied().unwrap_or(0)
        });

        let seen = Rc::new(RefCell::new(Vec::new()));
        let _run = autorun({
            let bridged = bridged.clone();
            let seen = seen.clone();
            move |reader| seen.borrow_mut().push(bridged.read(reader))
        });

        emitter.fire(&1);
        emitter.fire(&2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn equal_projections_are_suppressed() {
        let emitter: Emitter<i32> = Emitter::new();
        // Projection collapses payloads to their sign.
        let bridged = observable_from_event(emitter.clone(), |payload| {
            payload.map(|n| n.signum()).unwrap_or(0)
        });

        let runs = Rc::new(Cell::new(0));
        let _run = autorun({
            let bridged = bridged.clone();
            let runs = runs.clone();
            move |reader| {
                let _ = bridged.read(reader);
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);

        emitter.fire(&5);
        assert_eq!(runs.get(), 2);

        // Same sign: no propagation.
        emitter.fire(&9);
        assert_eq!(runs.get(), 2);

        emitter.fire(&-3);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn unsubscribed_reads_project_directly() {
        let emitter: Emitter<i32> = Emitter::new();
        let calls = Rc::new(Cell::new(0));
        let calls_clone = calls.clone();
        let bridged = observable_from_event(emitter.clone(), move |_| {
            calls_clone.set(calls_clone.get() + 1);
            7
        });

        // No subscriber: every read recomputes the projection.
        assert_eq!(bridged.get(), 7);
        assert_eq!(bridged.get(), 7);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn event_signal_fires_per_event_while_observed() {
        let emitter: Emitter<i32> = Emitter::new();
        let signal = observable_signal_from_event("raw ticks", emitter.clone());

        let runs = Rc::new(Cell::new(0));
        let run = autorun({
            let signal = signal.clone();
            let runs = runs.clone();
            move |reader| {
                signal.read(reader);
                runs.set(runs.get() + 1);
            }
        });
        assert_eq!(runs.get(), 1);

        emitter.fire(&1);
        emitter.fire(&2);
        assert_eq!(runs.get(), 3);

        drop(run);
        assert_eq!(emitter.listener_count(), 0);
        emitter.fire(&3);
        assert_eq!(runs.get(), 3);
    }
}

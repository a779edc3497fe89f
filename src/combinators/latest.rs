// ============================================================================
// weft - Latest-Changed-Of-N
// Republishing whichever of several sources fired last
// ============================================================================
//
// While observed, a single tally observer is registered with every source.
// It counts begin/end re-entrancy across all of them, marks which sources
// actually changed, and resolves once per settled transaction: sources that
// only signalled a possible change are validated first, then the
// highest-declared fired source wins (declaration order breaks ties when
// several fire in one transaction). While unobserved, the value falls back
// to the last-declared source.
// ============================================================================

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::combinators::from_event::{observable_from_event_opts, CallbackSource, FromEventObservable};
use crate::core::observable::{Observable, ObservableRef};
use crate::core::types::{DynObservable, NodeId, Observer};
use crate::reactivity::equality::equals;
use crate::shared::diagnostics::{report_fault, GraphFault};
use crate::shared::lifecycle::Subscription;

// =============================================================================
// TALLY OBSERVER
// =============================================================================

struct LatestTally<T: Clone + 'static> {
    sources: Rc<Vec<ObservableRef<T>>>,
    node_ids: Vec<NodeId>,
    counter: Cell<i64>,
    /// Sources that delivered handle_change since the last resolution.
    fired: RefCell<Vec<bool>>,
    /// Sources that only announced a possible change.
    possibly_changed: RefCell<Vec<bool>>,
    latest: Rc<RefCell<Option<T>>>,
    publish: Rc<dyn Fn(&())>,
}

impl<T: Clone + 'static> LatestTally<T> {
    fn mark(&self, flags: &RefCell<Vec<bool>>, id: NodeId) {
        let mut flags = flags.borrow_mut();
        for (index, node_id) in self.node_ids.iter().enumerate() {
            if *node_id == id {
                flags[index] = true;
            }
        }
    }
}

impl<T: Clone + 'static> Observer for LatestTally<T> {
    fn begin_update(&self, observable: &dyn DynObservable) {
        // A begin without an explicit possible-change notification still
        // means this source may be about to change.
        self.mark(&self.possibly_changed, observable.node_id());
        self.counter.set(self.counter.get() + 1);
    }

    fn end_update(&self, _observable: &dyn DynObservable) {
        if self.counter.get() == 1 {
            // Validate sources that never confirmed: forcing them resolves
            // either to a handle_change (marking fired) or to nothing.
            let unconfirmed: Vec<usize> = {
                let fired = self.fired.borrow();
                let possibly = self.possibly_changed.borrow();
                (0..self.sources.len())
                    .filter(|&index| possibly[index] && !fired[index])
                    .collect()
            };
            for index in unconfirmed {
                self.sources[index].as_dyn().report_changes();
            }

            let winner = self.fired.borrow().iter().rposition(|fired| *fired);
            if let Some(index) = winner {
                *self.latest.borrow_mut() = Some(self.sources[index].get());
                self.fired.borrow_mut().fill(false);
                self.possibly_changed.borrow_mut().fill(false);
                (self.publish)(&());
            } else {
                self.possibly_changed.borrow_mut().fill(false);
            }
        }
        self.counter.set(self.counter.get() - 1);
        if self.counter.get() < 0 {
            report_fault(GraphFault::UnbalancedEndUpdate {
                node: "latest changed".into(),
            });
            self.counter.set(0);
        }
    }

    fn handle_possible_change(&self, observable: &dyn DynObservable) {
        self.mark(&self.possibly_changed, observable.node_id());
    }

    fn handle_change(&self, observable: &dyn DynObservable, _change: Option<&dyn Any>) {
        self.mark(&self.fired, observable.node_id());
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// An observable holding the value of whichever source changed most
/// recently.
///
/// When several sources change within one transaction the last-declared one
/// among them wins. While unobserved the value is the last-declared
/// source's value.
///
/// # Panics
///
/// Panics when `sources` is empty; there is nothing to fall back to.
///
/// # Example
///
/// ```
/// use weft::{autorun, latest_changed_value, observable_value, Observable, ObservableExt};
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let x = observable_value(1);
/// let y = observable_value(2);
/// let latest = latest_changed_value(vec![x.to_ref(), y.to_ref()]);
///
/// let seen = Rc::new(Cell::new(0));
/// let _run = autorun({
///     let latest = latest.clone();
///     let seen = seen.clone();
///     move |reader| seen.set(latest.read(reader))
/// });
///
/// x.set(10, None);
/// assert_eq!(seen.get(), 10);
/// y.set(20, None);
/// assert_eq!(seen.get(), 20);
/// ```
pub fn latest_changed_value<T>(sources: Vec<ObservableRef<T>>) -> FromEventObservable<(), T>
where
    T: Clone + PartialEq + 'static,
{
    assert!(
        !sources.is_empty(),
        "latest_changed_value requires at least one source"
    );

    let sources = Rc::new(sources);
    let latest: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));

    let subscribe = {
        let sources = sources.clone();
        let latest = latest.clone();
        move |publish: Rc<dyn Fn(&())>| {
            let count = sources.len();
            let tally: Rc<dyn Observer> = Rc::new(LatestTally {
                sources: sources.clone(),
                node_ids: sources.iter().map(|source| source.as_dyn().node_id()).collect(),
                counter: Cell::new(0),
                fired: RefCell::new(vec![false; count]),
                possibly_changed: RefCell::new(vec![false; count]),
                latest: latest.clone(),
                publish,
            });

            for source in sources.iter() {
                source.as_dyn().add_observer(tally.clone());
                // Prime lazily-computed sources so their own dependencies
                // are wired up and change notifications can reach us.
                source.as_dyn().report_changes();
            }

            let sources = sources.clone();
            let latest = latest.clone();
            Subscription::new(move || {
                for source in sources.iter() {
                    source.as_dyn().remove_observer(&tally);
                }
                *latest.borrow_mut() = None;
            })
        }
    };

    observable_from_event_opts(
        Some("latest changed".into()),
        CallbackSource::new(subscribe),
        move |_payload| match &*latest.borrow() {
            Some(value) => value.clone(),
            None => sources[sources.len() - 1].get(),
        },
        equals,
    )
}

// =============================================================================
// TESTS
// =============================================================================

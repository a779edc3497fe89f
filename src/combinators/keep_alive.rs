// ============================================================================
// weft - Keep-Alive Combinators
// Holding subscriptions open without being a real consumer
// ============================================================================
//
// A derived without observers cannot cache (nothing would invalidate it).
// The keep-alive sentinel is a do-nothing observer whose only job is to keep
// the node's subscription - and therefore its cache - alive. The eager
// variant additionally forces one recomputation per finished transaction,
// using the begin/end re-entrancy counter to fire exactly once however many
// mutations touched the node.
// ============================================================================

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use crate::core::observable::Observable;
use crate::core::types::{DynObservable, Observer};
use crate::shared::lifecycle::Subscription;

// =============================================================================
// SENTINEL OBSERVER
// =============================================================================

struct KeepAliveObserver {
    /// In-flight begin_updates across all watched nodes.
    counter: Cell<i64>,
    /// Runs when the counter settles back down; None for cache-retention
    /// only.
    on_settled: Option<Box<dyn Fn()>>,
}

impl Observer for KeepAliveObserver {
    fn begin_update(&self, _observable: &dyn DynObservable) {
        self.counter.set(self.counter.get() + 1);
    }

    fn end_update(&self, _observable: &dyn DynObservable) {
        if self.counter.get() == 1 {
            if let Some(on_settled) = &self.on_settled {
                on_settled();
            }
        }
        self.counter.set(self.counter.get() - 1);
    }

    fn handle_possible_change(&self, _observable: &dyn DynObservable) {}

    fn handle_change(&self, _observable: &dyn DynObservable, _change: Option<&dyn Any>) {}
}

// =============================================================================
// PUBLIC API
// =============================================================================

/// Keep `observable` observed so its cache stays alive.
///
/// Does not force eager evaluation: a derived still computes only when
/// read. Dispose the returned subscription to release the node.
///
/// # Example
///
/// ```
/// use weft::{derived, keep_observed, observable_value, Observable};
///
/// let count = observable_value(1);
/// let doubled = {
///     let count = count.clone();
///     derived(move |reader| count.read(reader) * 2)
/// };
///
/// let keep = keep_observed(&doubled);
/// assert_eq!(doubled.get(), 2); // cached from here on
/// keep.dispose();
/// ```
pub fn keep_observed<T: Clone + 'static>(observable: &impl Observable<T>) -> Subscription {
    let node = observable.as_dyn();
    let sentinel: Rc<dyn Observer> = Rc::new(KeepAliveObserver {
        counter: Cell::new(0),
        on_settled: None,
    });
    node.add_observer(sentinel.clone());
    Subscription::new(move || node.remove_observer(&sentinel))
}

/// Keep `observable` observed, compute it immediately, and recompute once
/// after every finished transaction that touched it.
///
/// `handle_value` receives each settled value; pass `None` to only force
/// the recomputation.
pub fn recompute_initially_and_on_change<T, O>(
    observable: &O,
    handle_value: Option<Box<dyn Fn(T)>>,
) -> Subscription
where
    T: Clone + 'static,
    O: Observable<T> + Clone + 'static,
{
    let node = observable.as_dyn();
    let on_settled: Box<dyn Fn()> = match handle_value {
        Some(handle_value) => {
            let observable = observable.clone();
            Box::new(move || handle_value(observable.get()))
        }
        None => {
            let node = node.clone();
            Box::new(move || node.report_changes())
        }
    };
    let sentinel: Rc<dyn Observer> = Rc::new(KeepAliveObserver {
        counter: Cell::new(0),
        on_settled: Some(on_settled),
    });
    node.add_observer(sentinel.clone());

    // Initial eager computation through a synthetic update cycle.
    sentinel.begin_update(&*node);
    sentinel.end_update(&*node);

    Subscription::new(move || node.remove_observer(&sentinel))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::derived::derived;
    use crate::primitives::value::observable_value;
    use crate::reactivity::transaction::transaction;

    #[test]
    fn keep_observed_retains_cache_without_eager_evaluation() {
        let runs = Rc::new(Cell::new(0));
        let count = observable_value(1);
        let doubled = {
            let count = count.clone();
            let runs = runs.clone();
            derived(move |reader| {
                runs.set(runs.get() + 1);
                count.read(reader) * 2
            })
        };

        let keep = keep_observed(&doubled);
        // Not computed yet: keep-alive is lazy.
        assert_eq!(runs.get(), 0);

        assert_eq!(doubled.get(), 2);
        assert_eq!(doubled.get(), 2);
        assert_eq!(runs.get(), 1);

        keep.dispose();
        assert_eq!(count.observer_count(), 0);
    }

    #[test]
    fn eager_variant_computes_immediately() {
        let runs = Rc::new(Cell::new(0));
        let count = observable_value(1);
        let doubled = {
            let count = count.clone();
            let runs = runs.clone();
            derived(move |reader| {
                runs.set(runs.get() + 1);
                count.read(reader) * 2
            })
        };

        let _keep = recompute_initially_and_on_change(&doubled, None);
        assert_eq!(runs.get(), 1);

        count.set(2, None);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn three_updates_in_one_transaction_recompute_once_with_final_value() {
        let seen: Rc<std::cell::RefCell<Vec<i32>>> = Rc::new(std::cell::RefCell::new(Vec::new()));
        let count = observable_value(0);
        let doubled = {
            let count = count.clone();
            derived(move |reader| count.read(reader) * 2)
        };

        let _keep = recompute_initially_and_on_change(
            &doubled,
            Some(Box::new({
                let seen = seen.clone();
                move |value| seen.borrow_mut().push(value)
            })),
        );
        assert_eq!(*seen.borrow(), vec![0]);

        transaction(|tx| {
            count.set(1, Some(tx));
            count.set(2, Some(tx));
            count.set(3, Some(tx));
        });

        // One recompute, after the transaction, with the final value.
        assert_eq!(*seen.borrow(), vec![0, 6]);
    }

    #[test]
    fn dispose_stops_recomputation() {
        let runs = Rc::new(Cell::new(0));
        let count = observable_value(1);
        let tracked = {
            let count = count.clone();
            let runs = runs.clone();
            derived(move |reader| {
                runs.set(runs.get() + 1);
                count.read(reader)
            })
        };

        let keep = recompute_initially_and_on_change(&tracked, None);
        assert_eq!(runs.get(), 1);

        keep.dispose();
        count.set(2, None);
        assert_eq!(runs.get(), 1);
    }
}

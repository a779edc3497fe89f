// ============================================================================
// weft - Keyed Incremental Array Mapping
// Per-item cached mapping over an observable sequence
// ============================================================================
//
// Items are matched across successive evaluations by a caller-supplied key.
// A key hit reuses the cached output and its per-item disposable scope; a
// miss computes fresh; entries absent from the latest input are evicted and
// their scopes disposed. Item state therefore survives reorderings and
// unrelated insertions.
// ============================================================================

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::observable::Observable;
use crate::primitives::derived::{derived_opts, Derived, DerivedOpts};
use crate::shared::lifecycle::DisposableBag;

struct CacheEntry<U> {
    out: U,
    scope: DisposableBag,
}

struct KeyedCache<T, U, K> {
    map_fn: Box<dyn Fn(&T, &DisposableBag) -> U>,
    key_of: Box<dyn Fn(&T) -> K>,
    entries: RefCell<IndexMap<K, CacheEntry<U>>>,
}

impl<T, U: Clone, K: Hash + Eq + Clone> KeyedCache<T, U, K> {
    fn apply(&self, items: &[T]) -> Vec<U> {
        let mut outputs = Vec::with_capacity(items.len());
        let mut live_keys: Vec<K> = Vec::with_capacity(items.len());

        for item in items {
            let key = (self.key_of)(item);
            let cached = self
                .entries
                .borrow()
                .get(&key)
                .map(|entry| entry.out.clone());
            let out = match cached {
                Some(out) => out,
                None => {
                    let scope = DisposableBag::new();
                    let out = (self.map_fn)(item, &scope);
                    self.entries.borrow_mut().insert(
                        key.clone(),
                        CacheEntry {
                            out: out.clone(),
                            scope,
                        },
                    );
                    out
                }
            };
            live_keys.push(key);
            outputs.push(out);
        }

        // Evict entries whose key vanished from the input; their scopes are
        // disposed with them.
        let stale: Vec<K> = self
            .entries
            .borrow()
            .keys()
            .filter(|key| !live_keys.contains(key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(entry) = self.entries.borrow_mut().shift_remove(&key) {
                entry.scope.dispose();
            }
        }

        outputs
    }

    fn clear(&self) {
        let entries = self.entries.replace(IndexMap::new());
        for (_, entry) in entries {
            entry.scope.dispose();
        }
    }
}

/// Map an observable sequence item-by-item with keyed caching.
///
/// `map_fn` receives the item and a per-item [`DisposableBag`] that is
/// disposed when the item leaves the input (or when the result loses its
/// last observer). Outputs for key hits are the cached results, never
/// recomputed.
///
/// # Example
///
/// ```
/// use weft::{map_observable_array_cached, observable_value, Observable};
///
/// let names = observable_value(vec!["ada".to_string(), "grace".to_string()]);
/// let lengths = map_observable_array_cached(
///     names.clone(),
///     |name, _scope| name.len(),
///     |name| name.clone(),
/// );
/// assert_eq!(lengths.get(), vec![3, 5]);
/// ```
pub fn map_observable_array_cached<T, U, K, O, M, S>(
    items: O,
    map_fn: M,
    key_of: S,
) -> Derived<Vec<U>>
where
    T: Clone + 'static,
    U: Clone + 'static,
    K: Hash + Eq + Clone + 'static,
    O: Observable<Vec<T>> + Clone + 'static,
    M: Fn(&T, &DisposableBag) -> U + 'static,
    S: Fn(&T) -> K + 'static,
{
    let cache = Rc::new(KeyedCache {
        map_fn: Box::new(map_fn),
        key_of: Box::new(key_of),
        entries: RefCell::new(IndexMap::new()),
    });

    let cache_for_teardown = cache.clone();
    derived_opts(
        DerivedOpts {
            debug_name: Some("mapped array".into()),
            equals: None,
            on_last_observer_removed: Some(Box::new(move || cache_for_teardown.clear())),
        },
        move |reader| {
            let items = items.read(reader);
            cache.apply(&items)
        },
    )
}

/// [`map_observable_array_cached`] keyed by the items themselves.
pub fn map_observable_array<T, U, O, M>(items: O, map_fn: M) -> Derived<Vec<U>>
where
    T: Clone + Hash + Eq + 'static,
    U: Clone + 'static,
    O: Observable<Vec<T>> + Clone + 'static,
    M: Fn(&T, &DisposableBag) -> U + 'static,
{
    map_observable_array_cached(items, map_fn, |item: &T| item.clone())
}

// =============================================================================
// TESTS
// =============================================================================

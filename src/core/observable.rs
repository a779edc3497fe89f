// ============================================================================
// weft - Typed Observable Interface
// The value-typed reading surface shared by every node
// ============================================================================

use std::rc::Rc;

use crate::core::types::DynObservable;
use crate::primitives::derived::{derived, Derived};
use crate::reactivity::reader::Reader;

// =============================================================================
// OBSERVABLE<T>
// =============================================================================

/// A readable, possibly-changing value of type `T`.
///
/// `get()` never has side effects on the graph; `read()` additionally
/// registers the node as a dependency of the computation owning the
/// supplied [`Reader`]. The trait is object-safe, so heterogeneous
/// implementations can be erased to [`ObservableRef`].
pub trait Observable<T: Clone + 'static>: 'static {
    /// Current value.
    fn get(&self) -> T;

    /// The type-erased node behind this handle.
    fn as_dyn(&self) -> Rc<dyn DynObservable>;

    /// Tracked read: registers this node as a dependency of the enclosing
    /// computation, then returns the current value.
    ///
    /// The node is subscribed *before* the value is fetched and recorded
    /// *after*, so change notifications raised while the value is being
    /// produced are not mistaken for post-read changes.
    fn read(&self, reader: &Reader<'_>) -> T {
        let node = self.as_dyn();
        reader.subscribe_to(&node);
        let value = self.get();
        reader.record_dependency(node);
        value
    }
}

// =============================================================================
// CONVENIENCE EXTENSIONS
// =============================================================================

/// Combinator-style helpers available on every cloneable observable handle.
pub trait ObservableExt<T: Clone + 'static>: Observable<T> + Clone + Sized + 'static {
    /// Derive a new observable by applying `f` to this one's value.
    ///
    /// # Example
    ///
    /// ```
    /// use weft::{observable_value, Observable, ObservableExt};
    ///
    /// let count = observable_value(2);
    /// let doubled = count.map(|n| n * 2);
    /// assert_eq!(doubled.get(), 4);
    /// ```
    fn map<U, F>(&self, f: F) -> Derived<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        let source = self.clone();
        derived(move |reader| f(&source.read(reader)))
    }

    /// Convert an observable of an observable into a direct observable of
    /// the inner value.
    fn flatten<U>(&self) -> Derived<U>
    where
        U: Clone + PartialEq + 'static,
        T: Observable<U>,
    {
        let source = self.clone();
        derived(move |reader| source.read(reader).read(reader))
    }

    /// Erase the concrete handle type, e.g. to mix values and deriveds in
    /// one collection.
    fn to_ref(&self) -> ObservableRef<T> {
        ObservableRef::new(self.clone())
    }
}

impl<T: Clone + 'static, O: Observable<T> + Clone + 'static> ObservableExt<T> for O {}

// =============================================================================
// TYPE-ERASED HANDLE
// =============================================================================

/// A clonable, type-erased handle to any `Observable<T>`.
pub struct ObservableRef<T: Clone + 'static> {
    inner: Rc<dyn Observable<T>>,
}

impl<T: Clone + 'static> ObservableRef<T> {
    pub fn new(observable: impl Observable<T> + 'static) -> Self {
        Self {
            inner: Rc::new(observable),
        }
    }
}

impl<T: Clone + 'static> Clone for ObservableRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + 'static> Observable<T> for ObservableRef<T> {
    fn get(&self) -> T {
        self.inner.get()
    }

    fn as_dyn(&self) -> Rc<dyn DynObservable> {
        self.inner.as_dyn()
    }
}

// =============================================================================
// TESTS
// =============================================================================

// ============================================================================
// weft - Lifecycle Disposables
// RAII subscriptions and grouped disposal
// ============================================================================
//
// Every resource the graph acquires (observer registrations, external event
// subscriptions, pending timers) is released through one of these two types.
// Disposal is idempotent and runs on drop, so teardown happens on every exit
// path, including panics.
// ============================================================================

use std::cell::{Cell, RefCell};

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// A handle to a resource that must be released exactly once.
///
/// The release action runs when `dispose()` is called or when the handle is
/// dropped, whichever comes first. Further calls are no-ops.
///
/// # Example
///
/// ```
/// use weft::Subscription;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let released = Rc::new(Cell::new(false));
/// let released_clone = released.clone();
/// let sub = Subscription::new(move || released_clone.set(true));
///
/// assert!(!released.get());
/// sub.dispose();
/// assert!(released.get());
///
/// // A second dispose is a no-op
/// sub.dispose();
/// ```
pub struct Subscription {
    action: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Subscription {
    /// Create a subscription that runs `action` on disposal.
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: RefCell::new(Some(Box::new(action))),
        }
    }

    /// A subscription with nothing to release.
    pub fn empty() -> Self {
        Self {
            action: RefCell::new(None),
        }
    }

    /// Release the underlying resource. Idempotent.
    pub fn dispose(&self) {
        let action = self.action.borrow_mut().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether the resource has already been released.
    pub fn is_disposed(&self) -> bool {
        self.action.borrow().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// DISPOSABLE BAG
// =============================================================================

/// Owns a group of subscriptions and disposes them together.
///
/// Subscriptions added after the bag has been disposed are released
/// immediately instead of being retained.
pub struct DisposableBag {
    items: RefCell<Vec<Subscription>>,
    disposed: Cell<bool>,
}

impl DisposableBag {
    pub fn new() -> Self {
        Self {
            items: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }
    }

    /// Add a subscription to the bag.
    ///
    /// If the bag was already disposed, the subscription is disposed right
    /// away.
    pub fn add(&self, subscription: Subscription) {
        if self.disposed.get() {
            subscription.dispose();
        } else {
            self.items.borrow_mut().push(subscription);
        }
    }

    /// Dispose all held subscriptions, keeping the bag usable.
    pub fn clear(&self) {
        let items = self.items.replace(Vec::new());
        for item in items {
            item.dispose();
        }
    }

    /// Dispose all held subscriptions and mark the bag as disposed.
    pub fn dispose(&self) {
        self.disposed.set(true);
        self.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

impl Default for DisposableBag {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DisposableBag {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn subscription_disposes_once() {
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let sub = Subscription::new(move || count_clone.set(count_clone.get() + 1));

        sub.dispose();
        sub.dispose();
        assert_eq!(count.get(), 1);
        assert!(sub.is_disposed());
    }

    #[test]
    fn subscription_disposes_on_drop() {
        let count = Rc::new(Cell::new(0));
        {
            let count_clone = count.clone();
            let _sub = Subscription::new(move || count_clone.set(count_clone.get() + 1));
        }
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn empty_subscription_is_disposed() {
        let sub = Subscription::empty();
        assert!(sub.is_disposed());
        sub.dispose();
    }

    #[test]
    fn bag_disposes_all_items() {
        let count = Rc::new(Cell::new(0));
        let bag = DisposableBag::new();
        for _ in 0..3 {
            let count_clone = count.clone();
            bag.add(Subscription::new(move || {
                count_clone.set(count_clone.get() + 1)
            }));
        }

        assert_eq!(bag.len(), 3);
        bag.dispose();
        assert_eq!(count.get(), 3);
        assert!(bag.is_disposed());
    }

    #[test]
    fn bag_clear_keeps_bag_usable() {
        let count = Rc::new(Cell::new(0));
        let bag = DisposableBag::new();

        let count_clone = count.clone();
        bag.add(Subscription::new(move || {
            count_clone.set(count_clone.get() + 1)
        }));
        bag.clear();
        assert_eq!(count.get(), 1);
        assert!(!bag.is_disposed());

        let count_clone = count.clone();
        bag.add(Subscription::new(move || {
            count_clone.set(count_clone.get() + 1)
        }));
        assert_eq!(bag.len(), 1);
    }

    #[test]
    fn add_after_dispose_releases_immediately() {
        let count = Rc::new(Cell::new(0));
        let bag = DisposableBag::new();
        bag.dispose();

        let count_clone = count.clone();
        bag.add(Subscription::new(move || {
            count_clone.set(count_clone.get() + 1)
        }));
        assert_eq!(count.get(), 1);
        assert!(bag.is_empty());
    }
}

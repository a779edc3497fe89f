// ============================================================================
// weft - Core Type Definitions
// Type-erased traits for the observable graph
// ============================================================================
//
// Graph plumbing (observer registration, change routing, dependency
// bookkeeping) does not need to know a node's value type T. These traits
// erase T so that heterogeneous nodes can share one notification protocol:
//
// - Rc<dyn DynObservable> in dependency sets and transaction queues
// - Weak<dyn Observer> in observer registries
//
// The typed Observable<T> trait lives in core::observable; concrete nodes
// implement both sides.
// ============================================================================

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

// =============================================================================
// NODE IDENTITY
// =============================================================================

/// Unique identity of a graph node, assigned at construction.
///
/// Used for dependency-set membership (a node may be reached through
/// different handle types) and by diagnostic sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

thread_local! {
    static NEXT_NODE_ID: Cell<u64> = const { Cell::new(1) };
}

impl NodeId {
    /// Allocate the next identity on this thread.
    pub fn next() -> Self {
        NEXT_NODE_ID.with(|cell| {
            let id = cell.get();
            cell.set(id + 1);
            NodeId(id)
        })
    }
}

// =============================================================================
// OBSERVER
// =============================================================================

/// A consumer of the two-phase update protocol.
///
/// For every transaction that touches an observer, each `begin_update` call
/// is matched by exactly one `end_update` call, all `begin_update`s happen
/// before any `end_update`, and `end_update`s arrive in `begin_update`
/// order. An observer touched by several mutations in one transaction can
/// therefore defer its own reaction until every input has stabilized.
///
/// Implementors: derived nodes, autorun observers, the keep-alive sentinel,
/// the latest-changed tally. Methods take the notifying node type-erased;
/// observers identify it by `node_id` when they need to.
pub trait Observer: 'static {
    /// A dependency is about to change; do not react yet.
    fn begin_update(&self, observable: &dyn DynObservable);

    /// The matching close of a `begin_update`. Reactions run here, once the
    /// observer's re-entrancy count returns to zero.
    fn end_update(&self, observable: &dyn DynObservable);

    /// The node may have changed (an upstream input of it is updating), but
    /// whether its value actually differs is not yet known.
    fn handle_possible_change(&self, observable: &dyn DynObservable);

    /// The node's value definitely changed. `change` is an optional
    /// structured delta; `None` means "value replaced".
    fn handle_change(&self, observable: &dyn DynObservable, change: Option<&dyn Any>);
}

// =============================================================================
// TYPE-ERASED OBSERVABLE
// =============================================================================

/// Type-erased observable node, for notification routing.
///
/// `add_observer`/`remove_observer` are idempotent; the 0↔1 observer-count
/// transitions fire a node's activation/deactivation hooks exactly once per
/// transition.
pub trait DynObservable: 'static {
    /// The node's identity.
    fn node_id(&self) -> NodeId;

    /// Human-readable name for diagnostics.
    fn debug_name(&self) -> String;

    /// Register an observer. Adding one that is already registered is a
    /// no-op.
    fn add_observer(&self, observer: Rc<dyn Observer>);

    /// Unregister an observer. Removing one that is not registered is a
    /// no-op.
    fn remove_observer(&self, observer: &Rc<dyn Observer>);

    /// Resolve any pending invalidation now, delivering `handle_change` to
    /// observers if the value actually differs. Nodes without deferred state
    /// do nothing.
    fn report_changes(&self);

    /// Upcast for downcasting to the concrete node type.
    fn as_any(&self) -> &dyn Any;
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_increasing() {
        let a = NodeId::next();
        let b = NodeId::next();
        let c = NodeId::next();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(a < b && b < c);
    }

    #[test]
    fn node_id_is_hashable() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(NodeId::next());
        set.insert(NodeId::next());
        assert_eq!(set.len(), 2);
    }
}

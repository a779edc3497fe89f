// ============================================================================
// weft - Reactivity Module
// The two-phase transaction protocol, tracking reader, and equality gating
// ============================================================================

pub mod equality;
pub mod reader;
pub mod transaction;

pub use equality::{always_equals, equals, never_equals, safe_equals_f32, safe_equals_f64, EqualsFn};
pub use reader::{Reader, TrackingScope};
pub use transaction::{subtransaction, transaction, transaction_named, Transaction};

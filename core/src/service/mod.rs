//! Background services: concurrency guard, debounced refetch
//! coordination and the reconciler loop

pub mod guard;
pub mod reconciler;
pub mod refetch;

pub use guard::{ConcurrencyGuard, ViewHandle};
pub use reconciler::{FetchOutcome, Reconciler};
pub use refetch::RefetchCoordinator;

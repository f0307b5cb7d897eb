//! Local cache: view state store and optimistic overlay tracking

pub mod optimistic;
pub mod store;

pub use optimistic::{Mutation, MutationStatus, OptimisticTracker, PendingMutation};
pub use store::{StoreUpdate, ViewState, ViewStateStore};

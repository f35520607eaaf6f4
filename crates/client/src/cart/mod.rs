//! Guest cart and the merge coordinator.

mod coordinator;
mod guest;

pub use coordinator::{CartCoordinator, CartError, MergeState};
pub use guest::{GuestCart, GuestCartItem};

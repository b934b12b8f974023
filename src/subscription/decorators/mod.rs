//! Subscriptions wrapping other subscriptions.
//!
//! Each decorator implements [`Subscription`](super::Subscription) around an
//! inner one, so they stack:
//!
//! ```ignore
//! let subscription = TransactionalSubscription::new(
//!     CommittingSubscription::new(inner, unit_of_work),
//!     store.clone(),
//!     10,
//! );
//! ```

mod committing;
mod lazy;
mod transactional;

pub use committing::CommittingSubscription;
pub use lazy::LazyLoadedSubscription;
pub use transactional::{TransactionalCursor, TransactionalSubscription};

//! Routing and bookkeeping shared across connections: destinations,
//! subscriptions, and client-scoped transactions.

pub mod destinations;
pub mod subscriptions;
pub mod transactions;

pub use destinations::{AckOutcome, Destination, DestinationKind, DestinationRegistry};
pub use subscriptions::{AckMode, PendingDelivery, Subscription};
pub use transactions::{Transaction, TransactionError, TransactionManager};
